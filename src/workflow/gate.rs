use chrono::Utc;

use crate::config::PolicyConfig;
use crate::policy::{AutonomyLevel, QualityScorer, Scorecard};
use crate::workflow::stage::Stage;
use crate::workflow::state::{AutonomousDecision, DecidedBy, PolicyVerdict, ReviewDecision, WorkflowState};

/// What the quality policy concluded about one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyAssessment {
    pub scorecard: Scorecard,
    pub score: f64,
    pub threshold: f64,
    pub verdict: PolicyVerdict,
    pub notes: String,
}

impl PolicyAssessment {
    pub fn record(&self, stage: Stage, autonomy_level: AutonomyLevel) -> AutonomousDecision {
        AutonomousDecision {
            stage,
            verdict: self.verdict,
            score: self.score,
            threshold: self.threshold,
            autonomy_level,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    /// The policy decided on its own.
    Decided {
        decision: ReviewDecision,
        assessment: PolicyAssessment,
    },
    /// A human has to decide. Carries the policy's advice when it scored the artifact.
    AwaitingHuman { assessment: Option<PolicyAssessment> },
}

/// The single review point every gated stage passes through.
///
/// The run's autonomy level picks the strategy: `manual` always waits for a
/// human, the other levels score the artifact first.
pub struct ReviewGate {
    scorer: Box<dyn QualityScorer>,
    policy: PolicyConfig,
    max_stage_attempts: u32,
}

impl ReviewGate {
    pub fn new(scorer: Box<dyn QualityScorer>, policy: PolicyConfig, max_stage_attempts: u32) -> Self {
        Self {
            scorer,
            policy,
            max_stage_attempts: max_stage_attempts.max(1),
        }
    }

    pub fn review(&self, stage: Stage, state: &WorkflowState) -> GateVerdict {
        let level = state.autonomy_level;
        if !level.uses_policy() {
            return GateVerdict::AwaitingHuman { assessment: None };
        }

        let assessment = match self.scorer.assess(stage, state) {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e, "Quality policy failed, falling back to human review");
                return GateVerdict::AwaitingHuman { assessment: None };
            }
        };

        let Some(score) = assessment.scorecard.overall(&self.policy.weights) else {
            tracing::warn!(stage = %stage, "No applicable quality checks, falling back to human review");
            return GateVerdict::AwaitingHuman { assessment: None };
        };

        let threshold = self.policy.threshold(stage, level);
        let generations = state.policy_denials(stage) as u32 + 1;

        let verdict = if score >= threshold {
            PolicyVerdict::Approved
        } else if level.policy_may_deny() && generations < self.max_stage_attempts {
            PolicyVerdict::Denied
        } else {
            PolicyVerdict::Escalated
        };

        tracing::info!(
            stage = %stage,
            score,
            threshold,
            autonomy = %level,
            verdict = ?verdict,
            "Quality policy assessed artifact"
        );

        let assessment = PolicyAssessment {
            scorecard: assessment.scorecard,
            score,
            threshold,
            verdict,
            notes: assessment.notes,
        };

        match verdict {
            PolicyVerdict::Approved => GateVerdict::Decided {
                decision: ReviewDecision::approve(stage, DecidedBy::Policy),
                assessment,
            },
            PolicyVerdict::Denied => GateVerdict::Decided {
                decision: ReviewDecision::deny(stage, assessment.notes.clone(), DecidedBy::Policy),
                assessment,
            },
            PolicyVerdict::Escalated => GateVerdict::AwaitingHuman {
                assessment: Some(assessment),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use crate::language::Language;
    use crate::policy::Assessment;
    use crate::workflow::state::{Artifact, ReviewOutcome};

    struct Fixed(f64);

    impl QualityScorer for Fixed {
        fn assess(&self, _stage: Stage, _state: &WorkflowState) -> Result<Assessment> {
            Ok(Assessment {
                scorecard: Scorecard {
                    completeness: Some(self.0),
                    ..Scorecard::default()
                },
                notes: "add acceptance criteria".into(),
            })
        }
    }

    struct Broken;

    impl QualityScorer for Broken {
        fn assess(&self, stage: Stage, _state: &WorkflowState) -> Result<Assessment> {
            Err(AppError::Policy {
                stage,
                message: "scorer unavailable".into(),
            })
        }
    }

    fn pending(level: AutonomyLevel) -> WorkflowState {
        WorkflowState::new("Build a CRUD API", Language::Python, "m", level)
            .with_artifact(Artifact::UserStories(vec!["As a user, I want items".into()]))
            .unwrap()
    }

    fn gate(scorer: impl QualityScorer + 'static) -> ReviewGate {
        ReviewGate::new(Box::new(scorer), PolicyConfig::default(), 3)
    }

    #[test]
    fn test_manual_always_waits_for_human() {
        let verdict = gate(Fixed(1.0)).review(Stage::UserStories, &pending(AutonomyLevel::Manual));
        assert_eq!(verdict, GateVerdict::AwaitingHuman { assessment: None });
    }

    #[test]
    fn test_semi_auto_approves_above_threshold() {
        let verdict = gate(Fixed(0.90)).review(Stage::UserStories, &pending(AutonomyLevel::SemiAuto));
        let GateVerdict::Decided { decision, assessment } = verdict else {
            panic!("expected policy decision");
        };
        assert!(decision.is_approved());
        assert_eq!(decision.decided_by, DecidedBy::Policy);
        assert_eq!(assessment.threshold, 0.85);
        assert_eq!(assessment.verdict, PolicyVerdict::Approved);
    }

    #[test]
    fn test_semi_auto_escalates_below_threshold() {
        let verdict = gate(Fixed(0.5)).review(Stage::UserStories, &pending(AutonomyLevel::SemiAuto));
        let GateVerdict::AwaitingHuman { assessment: Some(assessment) } = verdict else {
            panic!("expected escalation");
        };
        assert_eq!(assessment.verdict, PolicyVerdict::Escalated);
    }

    #[test]
    fn test_full_auto_denies_with_feedback() {
        let verdict = gate(Fixed(0.5)).review(Stage::UserStories, &pending(AutonomyLevel::FullAuto));
        let GateVerdict::Decided { decision, .. } = verdict else {
            panic!("expected policy decision");
        };
        assert_eq!(decision.outcome, ReviewOutcome::Denied);
        assert_eq!(decision.feedback, "add acceptance criteria");
    }

    #[test]
    fn test_denials_escalate_once_attempts_are_spent() {
        let gate = gate(Fixed(0.5));
        let mut state = pending(AutonomyLevel::ExpertAuto);

        for _ in 0..2 {
            let GateVerdict::Decided { decision, .. } = gate.review(Stage::UserStories, &state) else {
                panic!("expected denial");
            };
            state = state
                .with_decision(decision)
                .unwrap()
                .with_artifact(Artifact::UserStories(vec!["As a user, I want more".into()]))
                .unwrap();
        }

        assert!(matches!(
            gate.review(Stage::UserStories, &state),
            GateVerdict::AwaitingHuman { assessment: Some(_) }
        ));
    }

    #[test]
    fn test_policy_error_falls_back_to_human() {
        let verdict = gate(Broken).review(Stage::Code, &pending(AutonomyLevel::FullAuto));
        assert_eq!(verdict, GateVerdict::AwaitingHuman { assessment: None });
    }

    #[test]
    fn test_stage_threshold_override_applies() {
        let mut policy = PolicyConfig::default();
        policy.stage_thresholds.insert("user_stories".into(), 0.95);
        let gate = ReviewGate::new(Box::new(Fixed(0.90)), policy, 3);

        let verdict = gate.review(Stage::UserStories, &pending(AutonomyLevel::SemiAuto));
        assert!(matches!(verdict, GateVerdict::AwaitingHuman { assessment: Some(_) }));
    }
}
