//! Analyzer results and their typed payloads.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AnalyzerError, ErrorKind};

/// Current payload schema version understood by the scoring rules.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// Pattern flagged by the claim-credibility analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedFlag {
    MedicalClaims,
    ConspiracyLanguage,
    UrgentLanguage,
    AbsolutistClaims,
    UnverifiedSources,
    EmotionalManipulation,
    Sensationalism,
}

/// Typed analyzer output, decoded at the collaborator boundary.
///
/// Serialized as `{"schema_version": 1, "kind": "...", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyzerPayload {
    ImageAuthenticity {
        ai_detected: bool,
        /// 0.0..=1.0
        confidence: f64,
        #[serde(default)]
        ai_images: u32,
        #[serde(default)]
        total_images: u32,
    },
    TextExtraction {
        combined_text: String,
        #[serde(default)]
        caption: String,
        #[serde(default)]
        words_extracted: u32,
        #[serde(default)]
        has_text: bool,
    },
    Manipulation {
        manipulated: bool,
        #[serde(default)]
        confidence: f64,
    },
    ClaimCredibility {
        /// 0.0..=100.0
        credibility_score: f64,
        #[serde(default)]
        red_flags: Vec<RedFlag>,
        #[serde(default)]
        requires_manual_review: bool,
    },
    SourceReputation {
        #[serde(default)]
        urls_checked: u32,
        #[serde(default)]
        has_conspiracy: bool,
        #[serde(default)]
        has_unreliable: bool,
        #[serde(default)]
        has_satire: bool,
        /// 0.0..=1.0
        avg_reliability: f64,
    },
}

impl AnalyzerPayload {
    /// Variant name as used in the serialized `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyzerPayload::ImageAuthenticity { .. } => "image_authenticity",
            AnalyzerPayload::TextExtraction { .. } => "text_extraction",
            AnalyzerPayload::Manipulation { .. } => "manipulation",
            AnalyzerPayload::ClaimCredibility { .. } => "claim_credibility",
            AnalyzerPayload::SourceReputation { .. } => "source_reputation",
        }
    }

    /// First numeric field holding NaN or an infinity, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        let (field, value) = match self {
            AnalyzerPayload::ImageAuthenticity { confidence, .. }
            | AnalyzerPayload::Manipulation { confidence, .. } => ("confidence", *confidence),
            AnalyzerPayload::ClaimCredibility {
                credibility_score, ..
            } => ("credibility_score", *credibility_score),
            AnalyzerPayload::SourceReputation {
                avg_reliability, ..
            } => ("avg_reliability", *avg_reliability),
            AnalyzerPayload::TextExtraction { .. } => return None,
        };
        (!value.is_finite()).then_some(field)
    }
}

/// A payload together with the schema version it was produced under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedPayload {
    pub schema_version: u32,
    #[serde(flatten)]
    pub payload: AnalyzerPayload,
}

impl VersionedPayload {
    pub fn current(payload: AnalyzerPayload) -> Self {
        Self {
            schema_version: PAYLOAD_SCHEMA_VERSION,
            payload,
        }
    }

    /// Decode a raw collaborator payload, rejecting unknown schema versions.
    pub fn decode(value: serde_json::Value) -> Result<Self, AnalyzerError> {
        let decoded: VersionedPayload = serde_json::from_value(value)
            .map_err(|e| AnalyzerError::InvalidPayload(e.to_string()))?;
        if decoded.schema_version != PAYLOAD_SCHEMA_VERSION {
            return Err(AnalyzerError::InvalidPayload(format!(
                "unsupported schema version {} (expected {})",
                decoded.schema_version, PAYLOAD_SCHEMA_VERSION
            )));
        }
        Ok(decoded)
    }
}

/// Settled outcome of one analyzer slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalyzerResult {
    Success {
        payload: VersionedPayload,
        confidence: Option<f64>,
        duration_ms: u64,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        /// Whether the last error was declared retryable (retries exhausted)
        #[serde(default)]
        retryable: bool,
        #[serde(default)]
        attempts: u32,
        duration_ms: u64,
    },
    Skipped {
        reason: String,
        duration_ms: u64,
    },
}

impl AnalyzerResult {
    pub fn success(payload: AnalyzerPayload) -> Self {
        AnalyzerResult::Success {
            payload: VersionedPayload::current(payload),
            confidence: None,
            duration_ms: 0,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        AnalyzerResult::Skipped {
            reason: reason.into(),
            duration_ms: 0,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        AnalyzerResult::Failure {
            kind,
            message: message.into(),
            retryable: false,
            attempts: 1,
            duration_ms: 0,
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::failure(
            ErrorKind::Timeout,
            format!("exceeded {}ms deadline", timeout.as_millis()),
        )
    }

    pub fn with_confidence(mut self, value: f64) -> Self {
        if let AnalyzerResult::Success { confidence, .. } = &mut self {
            *confidence = Some(value);
        }
        self
    }

    /// Stamp the processing duration measured by the executor.
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        let ms = elapsed.as_millis() as u64;
        match &mut self {
            AnalyzerResult::Success { duration_ms, .. }
            | AnalyzerResult::Failure { duration_ms, .. }
            | AnalyzerResult::Skipped { duration_ms, .. } => *duration_ms = ms,
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalyzerResult::Success { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AnalyzerResult::Failure {
                kind: ErrorKind::Timeout,
                ..
            }
        )
    }

    pub fn payload(&self) -> Option<&AnalyzerPayload> {
        match self {
            AnalyzerResult::Success { payload, .. } => Some(&payload.payload),
            _ => None,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            AnalyzerResult::Success { .. } => "success",
            AnalyzerResult::Failure { .. } => "failure",
            AnalyzerResult::Skipped { .. } => "skipped",
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            AnalyzerResult::Success { duration_ms, .. }
            | AnalyzerResult::Failure { duration_ms, .. }
            | AnalyzerResult::Skipped { duration_ms, .. } => *duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_rejects_unknown_schema_version() {
        let raw = json!({
            "schema_version": 7,
            "kind": "manipulation",
            "manipulated": true
        });
        let err = VersionedPayload::decode(raw).unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidPayload(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_claim_credibility() {
        let raw = json!({
            "schema_version": 1,
            "kind": "claim_credibility",
            "credibility_score": 42.0,
            "red_flags": ["MEDICAL_CLAIMS", "SENSATIONALISM"]
        });
        let decoded = VersionedPayload::decode(raw).unwrap();
        match decoded.payload {
            AnalyzerPayload::ClaimCredibility {
                credibility_score,
                red_flags,
                requires_manual_review,
            } => {
                assert_eq!(credibility_score, 42.0);
                assert_eq!(red_flags, vec![RedFlag::MedicalClaims, RedFlag::Sensationalism]);
                assert!(!requires_manual_review);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_result_status_tag() {
        let value = serde_json::to_value(AnalyzerResult::skipped("no images")).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["reason"], "no images");
    }

    #[test]
    fn test_with_duration_stamps_every_variant() {
        let elapsed = Duration::from_millis(42);
        assert_eq!(AnalyzerResult::skipped("x").with_duration(elapsed).duration_ms(), 42);
        assert_eq!(
            AnalyzerResult::timeout(Duration::from_secs(1))
                .with_duration(elapsed)
                .duration_ms(),
            42
        );
    }
}
