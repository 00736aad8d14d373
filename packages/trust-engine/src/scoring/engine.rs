//! Trust score computation.
//!
//! A pure function of the settled analyzer results and the weight table:
//! no I/O, no clock, no randomness. Identical inputs serialize to identical
//! outputs.

use std::collections::BTreeMap;
use tracing::debug;

use super::rules::ScoringConfig;
use crate::error::ErrorKind;
use crate::types::result::AnalyzerResult;
use crate::types::score::{ComponentScore, Omission, ScoreFlag, TrustScore};

/// Computes [`TrustScore`]s from a [`ScoringConfig`].
#[derive(Debug, Clone, Default)]
pub struct TrustScoreEngine {
    config: ScoringConfig,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl TrustScoreEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a settled result set.
    ///
    /// Components are visited in declaration order. A component whose
    /// analyzer did not succeed contributes nothing and is listed in
    /// `omissions`. Results for analyzers without a component are ignored.
    pub fn compute(&self, results: &BTreeMap<String, AnalyzerResult>) -> TrustScore {
        let mut adjustments = Vec::new();
        let mut omissions = Vec::new();
        let mut flags = Vec::new();
        let mut component_scores = Vec::new();
        let mut requires_review = false;
        let mut any_signal = false;

        for component in &self.config.components {
            let omit = |status: &str, reason: String| Omission {
                component: component.label.clone(),
                analyzer: component.analyzer.clone(),
                status: status.to_string(),
                reason,
            };

            match results.get(&component.analyzer) {
                None => omissions.push(omit("missing", "analyzer did not run".into())),

                Some(AnalyzerResult::Skipped { reason, .. }) => {
                    omissions.push(omit("skipped", reason.clone()))
                }

                Some(AnalyzerResult::Failure { kind, message, .. }) => {
                    let flag = if *kind == ErrorKind::Timeout {
                        ScoreFlag::AnalyzerTimedOut {
                            component: component.label.clone(),
                        }
                    } else {
                        ScoreFlag::AnalyzerFailed {
                            component: component.label.clone(),
                        }
                    };
                    flags.push(flag);
                    omissions.push(omit("failure", format!("{kind}: {message}")));
                }

                Some(AnalyzerResult::Success { payload, .. }) => {
                    match component.rule.apply(&component.label, &payload.payload) {
                        Some(mut outcome) => {
                            any_signal = true;
                            // Impacts are recorded at the precision the score is reported in
                            for adj in &mut outcome.adjustments {
                                adj.impact = round2(adj.impact);
                            }
                            component_scores.push(ComponentScore {
                                component: component.label.clone(),
                                impact: round2(outcome.adjustments.iter().map(|a| a.impact).sum()),
                            });
                            adjustments.extend(outcome.adjustments);
                            flags.extend(outcome.flags);
                            requires_review |= outcome.requires_review;
                        }
                        None => omissions.push(omit(
                            "mismatched",
                            format!(
                                "payload kind '{}' does not fit this rule",
                                payload.payload.kind()
                            ),
                        )),
                    }
                }
            }
        }

        if !any_signal {
            flags.insert(0, ScoreFlag::InsufficientSignal);
        }

        let raw = self.config.base_score + adjustments.iter().map(|a| a.impact).sum::<f64>();
        let score = round2(raw.clamp(0.0, 100.0));
        let total_penalties = round2(adjustments.iter().map(|a| a.impact).filter(|i| *i < 0.0).sum());
        let total_bonuses = round2(adjustments.iter().map(|a| a.impact).filter(|i| *i > 0.0).sum());
        let band = self.config.grade_for(score);

        debug!(
            score,
            grade = %band.grade,
            adjustments = adjustments.len(),
            omissions = omissions.len(),
            "trust score computed"
        );

        TrustScore {
            score,
            grade: band.grade.clone(),
            grade_description: band.description.clone(),
            adjustments,
            omissions,
            flags,
            component_scores,
            total_penalties,
            total_bonuses,
            requires_review,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::rules::{ComponentRule, ScoringRule};
    use crate::types::result::{AnalyzerPayload, RedFlag};
    use std::time::Duration;

    fn neutral_results() -> BTreeMap<String, AnalyzerResult> {
        let mut results = BTreeMap::new();
        results.insert(
            "image-authenticity".to_string(),
            AnalyzerResult::success(AnalyzerPayload::ImageAuthenticity {
                ai_detected: false,
                confidence: 0.1,
                ai_images: 0,
                total_images: 1,
            }),
        );
        results.insert(
            "text-extraction".to_string(),
            AnalyzerResult::success(AnalyzerPayload::TextExtraction {
                combined_text: "hello".into(),
                caption: "hello".into(),
                words_extracted: 1,
                has_text: true,
            }),
        );
        results.insert(
            "manipulation-detection".to_string(),
            AnalyzerResult::success(AnalyzerPayload::Manipulation {
                manipulated: false,
                confidence: 0.0,
            }),
        );
        results.insert(
            "claim-credibility".to_string(),
            AnalyzerResult::success(AnalyzerPayload::ClaimCredibility {
                credibility_score: 75.0,
                red_flags: vec![],
                requires_manual_review: false,
            }),
        );
        results.insert(
            "source-reputation".to_string(),
            AnalyzerResult::success(AnalyzerPayload::SourceReputation {
                urls_checked: 0,
                has_conspiracy: false,
                has_unreliable: false,
                has_satire: false,
                avg_reliability: 0.6,
            }),
        );
        results
    }

    #[test]
    fn test_neutral_results_score_base() {
        let score = TrustScoreEngine::default().compute(&neutral_results());
        assert_eq!(score.score, 100.0);
        assert_eq!(score.grade, "A+");
        assert!(score.adjustments.is_empty());
        assert!(score.flags.is_empty());
        assert_eq!(score.component_scores.len(), 5);
    }

    #[test]
    fn test_ai_confidence_penalty() {
        let mut results = neutral_results();
        results.insert(
            "image-authenticity".to_string(),
            AnalyzerResult::success(AnalyzerPayload::ImageAuthenticity {
                ai_detected: true,
                confidence: 0.85,
                ai_images: 1,
                total_images: 1,
            }),
        );

        let score = TrustScoreEngine::default().compute(&results);
        assert_eq!(score.score, 74.5);
        assert_eq!(score.grade, "B-");
        assert_eq!(score.adjustments.len(), 1);
        assert!((score.adjustments[0].impact + 25.5).abs() < 1e-9);
        assert_eq!(score.total_penalties, -25.5);
        assert_eq!(score.total_bonuses, 0.0);
    }

    #[test]
    fn test_adjustments_follow_declaration_order() {
        let mut results = neutral_results();
        results.insert(
            "source-reputation".to_string(),
            AnalyzerResult::success(AnalyzerPayload::SourceReputation {
                urls_checked: 1,
                has_conspiracy: false,
                has_unreliable: true,
                has_satire: false,
                avg_reliability: 0.2,
            }),
        );
        results.insert(
            "manipulation-detection".to_string(),
            AnalyzerResult::success(AnalyzerPayload::Manipulation {
                manipulated: true,
                confidence: 0.9,
            }),
        );

        let score = TrustScoreEngine::default().compute(&results);
        let components: Vec<_> = score.adjustments.iter().map(|a| a.component.as_str()).collect();
        assert_eq!(components, vec!["Deepfake Detection", "Source Credibility"]);
        assert_eq!(score.score, 40.0);
        assert_eq!(score.grade, "D-");
    }

    #[test]
    fn test_failure_is_neutral_and_flagged() {
        let mut results = neutral_results();
        results.insert(
            "claim-credibility".to_string(),
            AnalyzerResult::timeout(Duration::from_secs(30)),
        );

        let score = TrustScoreEngine::default().compute(&results);
        assert_eq!(score.score, 100.0);
        assert!(score.flags.contains(&ScoreFlag::AnalyzerTimedOut {
            component: "Fact-Checking".into()
        }));
        assert_eq!(score.omissions.len(), 1);
        assert_eq!(score.omissions[0].status, "failure");
        assert!(!score.is_unanalyzable());
    }

    #[test]
    fn test_all_absent_is_insufficient_signal() {
        let mut results = BTreeMap::new();
        results.insert(
            "image-authenticity".to_string(),
            AnalyzerResult::skipped("no images"),
        );
        results.insert(
            "text-extraction".to_string(),
            AnalyzerResult::failure(ErrorKind::AnalyzerFailure, "model unavailable"),
        );

        let score = TrustScoreEngine::default().compute(&results);
        assert_eq!(score.score, 100.0);
        assert!(score.adjustments.is_empty());
        assert_eq!(score.flags[0], ScoreFlag::InsufficientSignal);
        assert!(score.is_unanalyzable());
        assert_eq!(score.omissions.len(), 5);
    }

    #[test]
    fn test_score_clamps_at_zero() {
        let mut results = neutral_results();
        results.insert(
            "manipulation-detection".to_string(),
            AnalyzerResult::success(AnalyzerPayload::Manipulation {
                manipulated: true,
                confidence: 1.0,
            }),
        );
        results.insert(
            "claim-credibility".to_string(),
            AnalyzerResult::success(AnalyzerPayload::ClaimCredibility {
                credibility_score: 0.0,
                red_flags: vec![
                    RedFlag::MedicalClaims,
                    RedFlag::ConspiracyLanguage,
                    RedFlag::UrgentLanguage,
                ],
                requires_manual_review: true,
            }),
        );
        results.insert(
            "source-reputation".to_string(),
            AnalyzerResult::success(AnalyzerPayload::SourceReputation {
                urls_checked: 2,
                has_conspiracy: true,
                has_unreliable: false,
                has_satire: false,
                avg_reliability: 0.0,
            }),
        );

        let score = TrustScoreEngine::default().compute(&results);
        assert_eq!(score.score, 0.0);
        assert_eq!(score.grade, "F");
        assert!(score.requires_review);
        assert!(score.total_penalties < -100.0);
    }

    #[test]
    fn test_mismatched_payload_is_omitted() {
        let engine = TrustScoreEngine::new(ScoringConfig::default().with_components(vec![
            ComponentRule::new(
                "image-authenticity",
                "AI Detection",
                ScoringRule::SourceReputation(Default::default()),
            ),
        ]));
        let score = engine.compute(&neutral_results());
        assert_eq!(score.omissions[0].status, "mismatched");
        assert!(score.is_unanalyzable());
    }
}
