pub mod heuristics;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PolicyWeights;
use crate::error::{AppError, Result};
use crate::workflow::stage::Stage;
use crate::workflow::state::WorkflowState;

/// How much of the gating is delegated to the quality policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every gate waits for a human.
    Manual,
    /// Policy approves good artifacts; anything below threshold goes to a human.
    #[default]
    SemiAuto,
    /// Policy approves or sends back with feedback.
    FullAuto,
    /// Like `FullAuto` with a lower bar.
    ExpertAuto,
}

impl AutonomyLevel {
    pub fn all() -> &'static [AutonomyLevel] {
        &[
            AutonomyLevel::Manual,
            AutonomyLevel::SemiAuto,
            AutonomyLevel::FullAuto,
            AutonomyLevel::ExpertAuto,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AutonomyLevel::Manual => "manual",
            AutonomyLevel::SemiAuto => "semi_auto",
            AutonomyLevel::FullAuto => "full_auto",
            AutonomyLevel::ExpertAuto => "expert_auto",
        }
    }

    pub fn default_threshold(self) -> f64 {
        match self {
            AutonomyLevel::Manual => 1.0,
            AutonomyLevel::SemiAuto => 0.85,
            AutonomyLevel::FullAuto => 0.75,
            AutonomyLevel::ExpertAuto => 0.70,
        }
    }

    pub fn uses_policy(self) -> bool {
        self != AutonomyLevel::Manual
    }

    /// Whether a failing score sends the artifact back without asking a human.
    pub fn policy_may_deny(self) -> bool {
        matches!(self, AutonomyLevel::FullAuto | AutonomyLevel::ExpertAuto)
    }
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AutonomyLevel {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        AutonomyLevel::all()
            .iter()
            .copied()
            .find(|level| level.as_str() == key)
            .ok_or_else(|| AppError::Config(format!("Unknown autonomy level: {s}")))
    }
}

/// Component scores in `[0, 1]`. `None` means the check does not apply to the stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub completeness: Option<f64>,
    pub consistency: Option<f64>,
    pub security: Option<f64>,
    pub best_practices: Option<f64>,
}

impl Scorecard {
    /// Weighted mean over the applicable components.
    pub fn overall(&self, weights: &PolicyWeights) -> Option<f64> {
        let parts = [
            (self.completeness, weights.completeness),
            (self.consistency, weights.consistency),
            (self.security, weights.security),
            (self.best_practices, weights.best_practices),
        ];

        let (sum, total_weight) = parts
            .iter()
            .filter_map(|(score, weight)| score.map(|s| (s, *weight)))
            .filter(|(_, weight)| *weight > 0.0)
            .fold((0.0, 0.0), |(sum, total), (score, weight)| {
                (sum + score * weight, total + weight)
            });

        if total_weight <= 0.0 {
            return None;
        }
        let overall = sum / total_weight;
        overall.is_finite().then_some(overall)
    }

    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        [
            ("completeness_score", self.completeness),
            ("consistency_score", self.consistency),
            ("security_score", self.security),
            ("best_practices_score", self.best_practices),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

/// Result of scoring one artifact: component scores plus reviewer-style notes.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub scorecard: Scorecard,
    pub notes: String,
}

/// Scores a stage artifact for the quality policy.
pub trait QualityScorer: Send + Sync {
    fn assess(&self, stage: Stage, state: &WorkflowState) -> Result<Assessment>;
}

/// Keyword and pattern heuristics over the artifact text.
pub struct HeuristicScorer;

impl QualityScorer for HeuristicScorer {
    fn assess(&self, stage: Stage, state: &WorkflowState) -> Result<Assessment> {
        let language = state.programming_language;
        let scorecard = match stage {
            Stage::UserStories => {
                heuristics::score_user_stories(&state.user_stories, &state.requirements)
            }
            Stage::DesignDocument => {
                heuristics::score_design(&state.design_document, &state.user_stories)
            }
            Stage::Code => heuristics::score_code(&state.code_text(), language),
            Stage::SecurityReview => heuristics::score_security(
                &state.code_text(),
                &state.security_review,
                language,
            ),
            Stage::TestCases => {
                heuristics::score_test_cases(&state.test_cases, &state.code_text())
            }
            Stage::Qa => heuristics::score_qa(&state.qa_report),
            Stage::Requirements | Stage::Deployment => {
                return Err(AppError::Policy {
                    stage,
                    message: "stage has no review gate".to_string(),
                })
            }
        };

        let notes = heuristics::feedback_for(stage, &scorecard, language);
        Ok(Assessment { scorecard, notes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_skips_missing_components() {
        let card = Scorecard {
            completeness: Some(1.0),
            consistency: Some(0.5),
            security: None,
            best_practices: None,
        };
        let overall = card.overall(&PolicyWeights::default()).unwrap();
        assert!((overall - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_overall_respects_weights() {
        let card = Scorecard {
            completeness: Some(1.0),
            consistency: Some(0.0),
            security: None,
            best_practices: None,
        };
        let weights = PolicyWeights {
            completeness: 3.0,
            consistency: 1.0,
            security: 1.0,
            best_practices: 1.0,
        };
        assert!((card.overall(&weights).unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_overall_none_without_components() {
        assert!(Scorecard::default().overall(&PolicyWeights::default()).is_none());
    }

    #[test]
    fn test_levels_and_thresholds() {
        assert_eq!("semi-auto".parse::<AutonomyLevel>().unwrap(), AutonomyLevel::SemiAuto);
        assert!(!AutonomyLevel::Manual.uses_policy());
        assert!(!AutonomyLevel::SemiAuto.policy_may_deny());
        assert!(AutonomyLevel::ExpertAuto.policy_may_deny());
        assert!(AutonomyLevel::FullAuto.default_threshold() < AutonomyLevel::SemiAuto.default_threshold());
    }
}
