//! Trust score output types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single scored contribution (penalty or bonus) with its reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    /// Display label of the component, e.g. "AI Detection"
    pub component: String,
    /// e.g. "AI-Generated Content", "Low Credibility"
    pub category: String,
    /// Positive = bonus, negative = penalty
    pub impact: f64,
    pub reason: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ScoreAdjustment {
    pub fn new(
        component: impl Into<String>,
        category: impl Into<String>,
        impact: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            category: category.into(),
            impact,
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Warning attached to a score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum ScoreFlag {
    /// No component produced a usable result; the score carries no signal
    InsufficientSignal,
    AnalyzerTimedOut { component: String },
    AnalyzerFailed { component: String },
    ManualReview,
    MedicalClaims,
    ConspiracyLanguage,
    ConspiracySources,
    UnreliableSources,
    SatireContent,
}

impl std::fmt::Display for ScoreFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoreFlag::InsufficientSignal => f.write_str("Insufficient signal: no analyzer produced a result"),
            ScoreFlag::AnalyzerTimedOut { component } => write!(f, "{component} timed out"),
            ScoreFlag::AnalyzerFailed { component } => write!(f, "{component} failed"),
            ScoreFlag::ManualReview => f.write_str("Flagged for manual review"),
            ScoreFlag::MedicalClaims => f.write_str("Medical claims require verification"),
            ScoreFlag::ConspiracyLanguage => f.write_str("Conspiracy theory language detected"),
            ScoreFlag::ConspiracySources => f.write_str("Conspiracy theory sources detected"),
            ScoreFlag::UnreliableSources => f.write_str("Unreliable sources detected"),
            ScoreFlag::SatireContent => f.write_str("Satire content detected"),
        }
    }
}

/// A component that contributed nothing because its analyzer did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Omission {
    pub component: String,
    pub analyzer: String,
    /// "failure", "skipped", "missing" or "mismatched"
    pub status: String,
    pub reason: String,
}

/// Net contribution of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub component: String,
    pub impact: f64,
}

/// Final, explainable trust score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    /// 0.0..=100.0, rounded to two decimals
    pub score: f64,
    pub grade: String,
    #[serde(default)]
    pub grade_description: String,
    /// In rule application order. Impacts are rounded to two decimals, so
    /// `base + sum(impact)`, clamped, is exactly `score`.
    pub adjustments: Vec<ScoreAdjustment>,
    /// Components without a successful result, in declaration order
    #[serde(default)]
    pub omissions: Vec<Omission>,
    #[serde(default)]
    pub flags: Vec<ScoreFlag>,
    /// Net impact per successful component, in declaration order
    #[serde(default)]
    pub component_scores: Vec<ComponentScore>,
    #[serde(default)]
    pub total_penalties: f64,
    #[serde(default)]
    pub total_bonuses: f64,
    #[serde(default)]
    pub requires_review: bool,
}

impl TrustScore {
    /// A score with no adjustments.
    pub fn empty(score: f64, grade: impl Into<String>) -> Self {
        Self {
            score,
            grade: grade.into(),
            grade_description: String::new(),
            adjustments: Vec::new(),
            omissions: Vec::new(),
            flags: Vec::new(),
            component_scores: Vec::new(),
            total_penalties: 0.0,
            total_bonuses: 0.0,
            requires_review: false,
        }
    }

    /// True when no analyzer contributed, as opposed to a clean result.
    pub fn is_unanalyzable(&self) -> bool {
        self.flags.contains(&ScoreFlag::InsufficientSignal)
    }
}
