//! HTTP-backed collaborators.
//!
//! Analysis capabilities usually run out of process (model servers, the
//! post scraper). [`RemoteExtractor`] and [`RemoteAnalyzer`] adapt those
//! services to the [`ContentExtractor`] and [`Analyzer`] traits so the
//! orchestrator never deals with transport details.
//!
//! # Wire format
//!
//! - `POST {base}/extract` with `{"content_key": "..."}` returns an
//!   [`ExtractedContent`] document.
//! - `POST {base}/analyze/{name}` with `{"content": ..., "upstream": ...}`
//!   returns a [`RemoteVerdict`]: either `{"skipped": "reason"}` or
//!   `{"payload": {"schema_version": 1, "kind": ...}, "confidence": 0.9}`.
//!
//! 5xx, 408 and 429 responses are transient (retried by the executor);
//! every other non-success status is permanent.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{
    AnalyzerError, AnalyzerOutcome, ExtractError, ExtractResult, PipelineError, Result,
};
use crate::traits::analyzer::{Analyzer, AnalyzerInput, AnalyzerSpec};
use crate::traits::extractor::ContentExtractor;
use crate::types::content::{ContentKey, ExtractedContent};
use crate::types::result::{AnalyzerResult, VersionedPayload};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 200;

fn default_client() -> Result<Client> {
    Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .user_agent("TrustEngine/1.0")
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
}

/// Parse a base URL, forcing a trailing slash so `join` appends.
fn base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| PipelineError::Config(format!("invalid URL {raw}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn endpoint(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| PipelineError::Config(format!("invalid endpoint {path}: {e}")))
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Map a non-success analyzer response to an [`AnalyzerError`].
pub fn analyzer_status_error(status: StatusCode, body: &str) -> AnalyzerError {
    let message = format!("HTTP {}: {}", status, truncate(body));
    if is_transient(status) {
        AnalyzerError::Transient(message)
    } else {
        AnalyzerError::Permanent(message)
    }
}

/// Map a non-success extractor response to an [`ExtractError`].
pub fn extract_status_error(status: StatusCode, body: &str) -> ExtractError {
    let message = format!("HTTP {}: {}", status, truncate(body));
    if is_transient(status) {
        ExtractError::Upstream(message)
    } else {
        ExtractError::Unavailable(message)
    }
}

// ============================================================================
// Extractor
// ============================================================================

#[derive(Serialize)]
struct ExtractRequest<'a> {
    content_key: &'a str,
}

/// Extractor backed by a scraping service.
pub struct RemoteExtractor {
    client: Client,
    endpoint: Url,
}

impl RemoteExtractor {
    pub fn new(base: &str) -> Result<Self> {
        let base = base_url(base)?;
        Ok(Self {
            client: default_client()?,
            endpoint: endpoint(&base, "extract")?,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ContentExtractor for RemoteExtractor {
    async fn extract(&self, key: &ContentKey) -> ExtractResult<ExtractedContent> {
        debug!(content_key = %key, url = %self.endpoint, "Remote extraction starting");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&ExtractRequest {
                content_key: key.as_str(),
            })
            .send()
            .await
            .map_err(|e| {
                warn!(content_key = %key, error = %e, "Extractor request failed");
                ExtractError::Upstream(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(extract_status_error(status, &body));
        }

        let content: ExtractedContent = response
            .json()
            .await
            .map_err(|e| ExtractError::InvalidResponse(e.to_string()))?;

        if content.content_key != *key {
            return Err(ExtractError::InvalidResponse(format!(
                "extractor returned {} for {}",
                content.content_key, key
            )));
        }

        Ok(content)
    }
}

// ============================================================================
// Analyzer
// ============================================================================

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    content: &'a ExtractedContent,
    upstream: &'a BTreeMap<String, AnalyzerResult>,
}

/// Response body returned by a remote analyzer.
#[derive(Debug, Default, Deserialize)]
pub struct RemoteVerdict {
    #[serde(default)]
    pub skipped: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl RemoteVerdict {
    /// Convert into a settled result, validating the payload schema.
    pub fn into_result(self) -> AnalyzerOutcome<AnalyzerResult> {
        if let Some(reason) = self.skipped {
            return Ok(AnalyzerResult::skipped(reason));
        }
        let raw = self
            .payload
            .ok_or_else(|| AnalyzerError::InvalidPayload("response has no payload".into()))?;
        let payload = VersionedPayload::decode(raw)?;
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(AnalyzerError::InvalidPayload(format!(
                    "confidence {c} outside [0, 1]"
                )));
            }
        }
        Ok(AnalyzerResult::Success {
            payload,
            confidence: self.confidence,
            duration_ms: 0,
        })
    }
}

/// Analyzer that delegates to a model server over HTTP.
pub struct RemoteAnalyzer {
    spec: AnalyzerSpec,
    client: Client,
    endpoint: Url,
}

impl RemoteAnalyzer {
    pub fn new(base: &str, spec: AnalyzerSpec) -> Result<Self> {
        let base = base_url(base)?;
        let endpoint = endpoint(&base, &format!("analyze/{}", spec.name))?;
        Ok(Self {
            spec,
            client: default_client()?,
            endpoint,
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Analyzer for RemoteAnalyzer {
    fn spec(&self) -> &AnalyzerSpec {
        &self.spec
    }

    async fn run(&self, input: &AnalyzerInput) -> AnalyzerOutcome<AnalyzerResult> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&AnalyzeRequest {
                content: &input.content,
                upstream: &input.upstream,
            })
            .send()
            .await
            .map_err(|e| {
                warn!(analyzer = %self.spec.name, error = %e, "Analyzer request failed");
                AnalyzerError::Transient(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(analyzer_status_error(status, &body));
        }

        let verdict: RemoteVerdict = response
            .json()
            .await
            .map_err(|e| AnalyzerError::InvalidPayload(e.to_string()))?;
        verdict.into_result()
    }
}
