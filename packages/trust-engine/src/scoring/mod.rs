//! Trust score engine and its weight tables.

pub mod engine;
pub mod rules;

pub use engine::TrustScoreEngine;
pub use rules::{
    ComponentRule, CredibilityWeights, GradeBand, RedFlagPenalty, RuleOutcome, ScoringConfig,
    ScoringRule, SourceWeights,
};
