//! Weight tables for the trust score.
//!
//! Everything the engine knows about how much a finding is worth lives in
//! [`ScoringConfig`]. The defaults mirror the hand-tuned production weights
//! but any deployment can swap in its own table:
//!
//! ```toml
//! base_score = 100.0
//!
//! [[components]]
//! analyzer = "image-authenticity"
//! label = "AI Detection"
//! [components.rule]
//! kind = "confidence_penalty"
//! category = "AI-Generated Content"
//! max_penalty = 30.0
//!
//! [[grades]]
//! grade = "A"
//! min_score = 90.0
//! description = "Excellent"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::result::{AnalyzerPayload, RedFlag};
use crate::types::score::{ScoreAdjustment, ScoreFlag};

/// Complete scoring configuration: base score, component rules, grade bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_score: f64,
    /// Applied in this order; the order of the adjustment list follows it
    pub components: Vec<ComponentRule>,
    /// Highest band first
    pub grades: Vec<GradeBand>,
    /// Catch-all band below the lowest threshold
    pub floor_grade: GradeBand,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 100.0,
            components: default_components(),
            grades: default_grades(),
            floor_grade: GradeBand::new("F", 0.0, "Failing - Highly unreliable"),
        }
    }
}

impl ScoringConfig {
    /// Parse and validate a TOML weight table.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ScoringConfig =
            toml::from_str(s).map_err(|e| PipelineError::Config(format!("scoring config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML weight table from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn with_base_score(mut self, base: f64) -> Self {
        self.base_score = base;
        self
    }

    pub fn with_components(mut self, components: Vec<ComponentRule>) -> Self {
        self.components = components;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.base_score) {
            return Err(PipelineError::Config(format!(
                "base_score {} outside 0..=100",
                self.base_score
            )));
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if !seen.insert(component.analyzer.as_str()) {
                return Err(PipelineError::Config(format!(
                    "analyzer '{}' has more than one scoring rule",
                    component.analyzer
                )));
            }
        }

        let descending = self
            .grades
            .windows(2)
            .all(|pair| pair[0].min_score > pair[1].min_score);
        if !descending {
            return Err(PipelineError::Config(
                "grade bands must be ordered by strictly decreasing min_score".into(),
            ));
        }
        Ok(())
    }

    /// Band for an already clamped score.
    pub fn grade_for(&self, score: f64) -> &GradeBand {
        self.grades
            .iter()
            .find(|band| score >= band.min_score)
            .unwrap_or(&self.floor_grade)
    }

    pub fn component(&self, analyzer: &str) -> Option<&ComponentRule> {
        self.components.iter().find(|c| c.analyzer == analyzer)
    }
}

/// Binds an analyzer's result slot to a scoring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRule {
    /// Analyzer name as registered in the graph
    pub analyzer: String,
    /// Label shown on adjustments, e.g. "Fact-Checking"
    pub label: String,
    pub rule: ScoringRule,
}

impl ComponentRule {
    pub fn new(analyzer: impl Into<String>, label: impl Into<String>, rule: ScoringRule) -> Self {
        Self {
            analyzer: analyzer.into(),
            label: label.into(),
            rule,
        }
    }
}

/// One grade band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeBand {
    pub grade: String,
    pub min_score: f64,
    #[serde(default)]
    pub description: String,
}

impl GradeBand {
    pub fn new(grade: impl Into<String>, min_score: f64, description: impl Into<String>) -> Self {
        Self {
            grade: grade.into(),
            min_score,
            description: description.into(),
        }
    }
}

/// What a rule contributes for one successful payload.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub adjustments: Vec<ScoreAdjustment>,
    pub flags: Vec<ScoreFlag>,
    pub requires_review: bool,
}

/// Deterministic mapping from a payload to adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringRule {
    /// `-confidence * max_penalty` when a detection fired
    ConfidencePenalty { category: String, max_penalty: f64 },
    /// Fixed penalty when a detection fired
    DetectionPenalty { category: String, penalty: f64 },
    /// Recorded for context, never scored
    Informational,
    /// Banded penalty/bonus on a 0-100 credibility value plus red-flag penalties
    CredibilityBands(CredibilityWeights),
    /// Penalties for flagged publishers, else banded on average reliability
    SourceReputation(SourceWeights),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityWeights {
    pub low_threshold: f64,
    pub questionable_threshold: f64,
    pub high_threshold: f64,
    pub low_multiplier: f64,
    pub questionable_multiplier: f64,
    pub high_multiplier: f64,
    /// Checked in this order
    pub red_flags: Vec<RedFlagPenalty>,
}

impl Default for CredibilityWeights {
    fn default() -> Self {
        Self {
            low_threshold: 50.0,
            questionable_threshold: 70.0,
            high_threshold: 80.0,
            low_multiplier: 0.8,
            questionable_multiplier: 0.5,
            high_multiplier: 0.2,
            red_flags: vec![
                RedFlagPenalty::new(RedFlag::MedicalClaims, "Medical Claims", 15.0, "Medical or health claims without verification"),
                RedFlagPenalty::new(RedFlag::ConspiracyLanguage, "Conspiracy Language", 12.0, "Conspiracy theory language detected"),
                RedFlagPenalty::new(RedFlag::UrgentLanguage, "Urgent Language", 8.0, "Urgent/alarmist language detected"),
                RedFlagPenalty::new(RedFlag::AbsolutistClaims, "Absolutist Claims", 6.0, "Absolutist language (always/never) detected"),
                RedFlagPenalty::new(RedFlag::UnverifiedSources, "Unverified Sources", 10.0, "Unverified or anonymous sources cited"),
                RedFlagPenalty::new(RedFlag::EmotionalManipulation, "Emotional Manipulation", 7.0, "Emotionally manipulative language detected"),
                RedFlagPenalty::new(RedFlag::Sensationalism, "Sensationalism", 5.0, "Sensationalist language detected"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlagPenalty {
    pub flag: RedFlag,
    pub category: String,
    pub penalty: f64,
    pub reason: String,
}

impl RedFlagPenalty {
    pub fn new(flag: RedFlag, category: &str, penalty: f64, reason: &str) -> Self {
        Self {
            flag,
            category: category.to_string(),
            penalty,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceWeights {
    pub conspiracy_penalty: f64,
    pub unreliable_penalty: f64,
    pub satire_penalty: f64,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub low_multiplier: f64,
    pub high_multiplier: f64,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            conspiracy_penalty: 25.0,
            unreliable_penalty: 20.0,
            satire_penalty: 15.0,
            low_threshold: 0.5,
            high_threshold: 0.7,
            low_multiplier: 20.0,
            high_multiplier: 10.0,
        }
    }
}

/// Pull `(detected, confidence)` out of detector-style payloads.
fn detection(payload: &AnalyzerPayload) -> Option<(bool, f64)> {
    match payload {
        AnalyzerPayload::ImageAuthenticity {
            ai_detected,
            confidence,
            ..
        } => Some((*ai_detected, *confidence)),
        AnalyzerPayload::Manipulation {
            manipulated,
            confidence,
        } => Some((*manipulated, *confidence)),
        _ => None,
    }
}

impl ScoringRule {
    /// Apply the rule to a successful payload.
    ///
    /// Returns `None` when the payload kind does not fit the rule, which the
    /// engine records as an omission rather than guessing.
    pub fn apply(&self, label: &str, payload: &AnalyzerPayload) -> Option<RuleOutcome> {
        let mut out = RuleOutcome::default();

        match self {
            ScoringRule::Informational => {}

            ScoringRule::ConfidencePenalty {
                category,
                max_penalty,
            } => {
                let (detected, confidence) = detection(payload)?;
                if detected {
                    let confidence = confidence.clamp(0.0, 1.0);
                    let mut adj = ScoreAdjustment::new(
                        label,
                        category.as_str(),
                        -confidence * max_penalty,
                        format!(
                            "{category} detected with {:.0}% confidence",
                            confidence * 100.0
                        ),
                    )
                    .with_metadata("confidence", confidence);
                    if let AnalyzerPayload::ImageAuthenticity {
                        ai_images,
                        total_images,
                        ..
                    } = payload
                    {
                        adj = adj
                            .with_metadata("ai_images", *ai_images)
                            .with_metadata("total_images", *total_images);
                    }
                    out.adjustments.push(adj);
                }
            }

            ScoringRule::DetectionPenalty { category, penalty } => {
                let (detected, confidence) = detection(payload)?;
                if detected {
                    out.adjustments.push(
                        ScoreAdjustment::new(
                            label,
                            category.as_str(),
                            -penalty,
                            format!("{category} detected"),
                        )
                        .with_metadata("confidence", confidence),
                    );
                }
            }

            ScoringRule::CredibilityBands(w) => {
                let AnalyzerPayload::ClaimCredibility {
                    credibility_score,
                    red_flags,
                    requires_manual_review,
                } = payload
                else {
                    return None;
                };
                let s = *credibility_score;

                let band = if s < w.low_threshold {
                    Some(("Low Credibility", "low", -(w.low_threshold - s) * w.low_multiplier))
                } else if s < w.questionable_threshold {
                    Some((
                        "Questionable Credibility",
                        "questionable",
                        -(w.questionable_threshold - s) * w.questionable_multiplier,
                    ))
                } else if s >= w.high_threshold {
                    Some(("High Credibility", "high", (s - w.high_threshold) * w.high_multiplier))
                } else {
                    None
                };
                if let Some((category, word, impact)) = band {
                    out.adjustments.push(
                        ScoreAdjustment::new(
                            label,
                            category,
                            impact,
                            format!("Claims show {word} credibility (score: {s:.0}/100)"),
                        )
                        .with_metadata("credibility_score", s),
                    );
                }

                for rf in &w.red_flags {
                    if !red_flags.contains(&rf.flag) {
                        continue;
                    }
                    out.adjustments.push(ScoreAdjustment::new(
                        label,
                        rf.category.as_str(),
                        -rf.penalty,
                        rf.reason.as_str(),
                    ));
                    match rf.flag {
                        RedFlag::MedicalClaims => out.flags.push(ScoreFlag::MedicalClaims),
                        RedFlag::ConspiracyLanguage => out.flags.push(ScoreFlag::ConspiracyLanguage),
                        _ => {}
                    }
                }

                if *requires_manual_review {
                    out.requires_review = true;
                    out.flags.push(ScoreFlag::ManualReview);
                }
            }

            ScoringRule::SourceReputation(w) => {
                let AnalyzerPayload::SourceReputation {
                    has_conspiracy,
                    has_unreliable,
                    has_satire,
                    avg_reliability,
                    urls_checked,
                } = payload
                else {
                    return None;
                };

                // The three publisher categories are exclusive, worst first
                if *has_conspiracy {
                    out.adjustments.push(ScoreAdjustment::new(
                        label,
                        "Conspiracy Sources",
                        -w.conspiracy_penalty,
                        "Links to known conspiracy theory websites",
                    ));
                    out.flags.push(ScoreFlag::ConspiracySources);
                } else if *has_unreliable {
                    out.adjustments.push(ScoreAdjustment::new(
                        label,
                        "Unreliable Sources",
                        -w.unreliable_penalty,
                        "Links to unreliable or low-credibility sources",
                    ));
                    out.flags.push(ScoreFlag::UnreliableSources);
                } else if *has_satire {
                    out.adjustments.push(ScoreAdjustment::new(
                        label,
                        "Satire Content",
                        -w.satire_penalty,
                        "Links to satire/parody content (may be mistaken as factual)",
                    ));
                    out.flags.push(ScoreFlag::SatireContent);
                } else {
                    let r = avg_reliability.clamp(0.0, 1.0);
                    if r < w.low_threshold {
                        out.adjustments.push(
                            ScoreAdjustment::new(
                                label,
                                "Low Source Reliability",
                                -(w.low_threshold - r) * w.low_multiplier,
                                format!("Sources have low average reliability ({:.0}%)", r * 100.0),
                            )
                            .with_metadata("avg_reliability", r)
                            .with_metadata("urls_checked", *urls_checked),
                        );
                    } else if r > w.high_threshold {
                        out.adjustments.push(
                            ScoreAdjustment::new(
                                label,
                                "High Source Reliability",
                                (r - w.high_threshold) * w.high_multiplier,
                                format!("Sources have high reliability ({:.0}%)", r * 100.0),
                            )
                            .with_metadata("avg_reliability", r)
                            .with_metadata("urls_checked", *urls_checked),
                        );
                    }
                }
            }
        }

        Some(out)
    }
}

fn default_components() -> Vec<ComponentRule> {
    vec![
        ComponentRule::new(
            "image-authenticity",
            "AI Detection",
            ScoringRule::ConfidencePenalty {
                category: "AI-Generated Content".into(),
                max_penalty: 30.0,
            },
        ),
        ComponentRule::new("text-extraction", "Text Extraction", ScoringRule::Informational),
        ComponentRule::new(
            "manipulation-detection",
            "Deepfake Detection",
            ScoringRule::DetectionPenalty {
                category: "Deepfake/Manipulation".into(),
                penalty: 40.0,
            },
        ),
        ComponentRule::new(
            "claim-credibility",
            "Fact-Checking",
            ScoringRule::CredibilityBands(CredibilityWeights::default()),
        ),
        ComponentRule::new(
            "source-reputation",
            "Source Credibility",
            ScoringRule::SourceReputation(SourceWeights::default()),
        ),
    ]
}

fn default_grades() -> Vec<GradeBand> {
    vec![
        GradeBand::new("A+", 95.0, "Excellent - Highly trustworthy content"),
        GradeBand::new("A", 90.0, "Excellent - Very trustworthy"),
        GradeBand::new("A-", 85.0, "Very Good - Trustworthy"),
        GradeBand::new("B+", 80.0, "Good - Generally trustworthy"),
        GradeBand::new("B", 75.0, "Good - Mostly reliable"),
        GradeBand::new("B-", 70.0, "Satisfactory - Some concerns"),
        GradeBand::new("C+", 65.0, "Fair - Multiple concerns"),
        GradeBand::new("C", 60.0, "Fair - Questionable reliability"),
        GradeBand::new("C-", 55.0, "Poor - Significant concerns"),
        GradeBand::new("D+", 50.0, "Poor - Low credibility"),
        GradeBand::new("D", 45.0, "Very Poor - Not trustworthy"),
        GradeBand::new("D-", 40.0, "Very Poor - Unreliable"),
    ]
}
