use std::future::Future;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::llm::{StageGenerator, TextGenerator};
use crate::policy::HeuristicScorer;
use crate::store::{CheckpointId, CheckpointStore};
use crate::workflow::gate::{GateVerdict, PolicyAssessment, ReviewGate};
use crate::workflow::stage::Stage;
use crate::workflow::state::{ReviewDecision, ReviewStatus, WorkflowState};
use crate::workflow::types::{RunOutcome, StepStatus};

/// Result of one transition.
#[derive(Debug, Clone)]
pub struct Step {
    /// Stage the run continues from.
    pub stage: Stage,
    pub state: WorkflowState,
    pub status: StepStatus,
    /// Checkpoint written for this transition; `None` when nothing changed.
    pub checkpoint: Option<CheckpointId>,
}

/// The stage state machine.
///
/// Owns no run state: every call takes the current `WorkflowState` and hands
/// back the next one, checkpointing it on the way.
pub struct WorkflowController {
    generator: StageGenerator,
    gate: ReviewGate,
    store: Arc<dyn CheckpointStore>,
}

impl WorkflowController {
    pub fn new(generator: StageGenerator, gate: ReviewGate, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            generator,
            gate,
            store,
        }
    }

    /// Controller with the heuristic quality policy and the configured limits.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn TextGenerator>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let generator = StageGenerator::new(client, config.retry.clone());
        let gate = ReviewGate::new(
            Box::new(HeuristicScorer),
            config.policy.clone(),
            config.workflow.max_stage_attempts,
        );
        Self::new(generator, gate, store)
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub async fn advance(&self, run_id: &str, stage: Stage, state: WorkflowState) -> Result<Step> {
        self.advance_cancellable(run_id, stage, state, || async { false })
            .await
    }

    /// Perform one transition from `stage`.
    ///
    /// `is_cancelled` is checked before generating and again before the new
    /// artifact is recorded; a cancelled or failed attempt writes no checkpoint.
    pub async fn advance_cancellable<F, Fut>(
        &self,
        run_id: &str,
        stage: Stage,
        state: WorkflowState,
        is_cancelled: F,
    ) -> Result<Step>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        if is_cancelled().await {
            return Err(AppError::Cancelled { stage });
        }

        match stage {
            Stage::Requirements => {
                if state.requirements.trim().is_empty() {
                    return Err(AppError::validation(stage, "requirements must not be empty"));
                }
                self.transition(run_id, Stage::UserStories, state, StepStatus::Advanced)
                    .await
            }
            Stage::Deployment => {
                if state.has_artifact(stage) {
                    return Ok(Step {
                        stage,
                        state,
                        status: StepStatus::Completed,
                        checkpoint: None,
                    });
                }
                if let Some(open) = Stage::all()
                    .iter()
                    .copied()
                    .find(|s| s.is_gated() && state.status(*s) != ReviewStatus::Approved)
                {
                    return Err(AppError::validation(
                        stage,
                        format!("{open} has not been approved"),
                    ));
                }

                let artifact = self.generator.generate(stage, &state).await?;
                if is_cancelled().await {
                    return Err(AppError::Cancelled { stage });
                }
                let state = state.with_artifact(artifact)?;
                self.transition(run_id, stage, state, StepStatus::Completed)
                    .await
            }
            _ => self.advance_gated(run_id, stage, state, is_cancelled).await,
        }
    }

    async fn advance_gated<F, Fut>(
        &self,
        run_id: &str,
        stage: Stage,
        state: WorkflowState,
        is_cancelled: F,
    ) -> Result<Step>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let previous = Stage::all()[stage.index() - 1];
        if state.status(previous) != ReviewStatus::Approved {
            return Err(AppError::validation(
                stage,
                format!("{previous} has not been approved"),
            ));
        }

        match state.status(stage) {
            ReviewStatus::Approved => {
                let next = stage.next().unwrap_or(stage);
                self.transition(run_id, next, state, StepStatus::Advanced)
                    .await
            }
            _ if !state.needs_generation(stage) => Ok(Step {
                stage,
                state,
                status: StepStatus::AwaitingReview,
                checkpoint: None,
            }),
            _ => {
                if let Some(feedback) = state.pending_feedback(stage) {
                    tracing::info!(run_id, stage = %stage, feedback, "Regenerating with reviewer feedback");
                }

                let artifact = self.generator.generate(stage, &state).await?;
                if is_cancelled().await {
                    return Err(AppError::Cancelled { stage });
                }
                let state = state.with_artifact(artifact)?;
                self.review(run_id, stage, state).await
            }
        }
    }

    async fn review(&self, run_id: &str, stage: Stage, state: WorkflowState) -> Result<Step> {
        match self.gate.review(stage, &state) {
            GateVerdict::Decided {
                decision,
                assessment,
            } => {
                let state = record_assessment(state, stage, &assessment).with_decision(decision)?;
                self.route(run_id, stage, state).await
            }
            GateVerdict::AwaitingHuman { assessment } => {
                let state = match assessment {
                    Some(assessment) => record_assessment(state, stage, &assessment),
                    None => state,
                };
                tracing::info!(run_id, stage = %stage, "Awaiting human review");
                self.transition(run_id, stage, state, StepStatus::AwaitingReview)
                    .await
            }
        }
    }

    /// Apply an external (human) decision to a stage that is awaiting review.
    pub async fn submit_decision(
        &self,
        run_id: &str,
        stage: Stage,
        state: WorkflowState,
        decision: ReviewDecision,
    ) -> Result<Step> {
        if decision.stage != stage {
            return Err(AppError::validation(
                stage,
                format!("decision is for {}", decision.stage),
            ));
        }
        tracing::info!(
            run_id,
            stage = %stage,
            outcome = ?decision.outcome,
            decided_by = ?decision.decided_by,
            "Review decision received"
        );
        let state = state.with_decision(decision)?;
        self.route(run_id, stage, state).await
    }

    async fn route(&self, run_id: &str, stage: Stage, state: WorkflowState) -> Result<Step> {
        match state.status(stage) {
            ReviewStatus::Approved => {
                let next = stage.next().unwrap_or(stage);
                self.transition(run_id, next, state, StepStatus::Advanced)
                    .await
            }
            ReviewStatus::Denied => {
                self.transition(run_id, stage, state, StepStatus::Regenerating)
                    .await
            }
            status => Err(AppError::Internal(format!(
                "{stage} is {status:?} after a decision"
            ))),
        }
    }

    async fn transition(
        &self,
        run_id: &str,
        stage: Stage,
        state: WorkflowState,
        status: StepStatus,
    ) -> Result<Step> {
        let checkpoint = self.store.save(run_id, stage, &state).await?;
        tracing::info!(run_id, stage = %stage, status = ?status, checkpoint = %checkpoint, "Transition");
        Ok(Step {
            stage,
            state,
            status,
            checkpoint: Some(checkpoint),
        })
    }

    /// Advance until the run completes or waits for a human.
    pub async fn drive<F, Fut>(
        &self,
        run_id: &str,
        mut stage: Stage,
        mut state: WorkflowState,
        is_cancelled: F,
    ) -> Result<(WorkflowState, RunOutcome)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut last_checkpoint = None;
        loop {
            let step = self
                .advance_cancellable(run_id, stage, state, &is_cancelled)
                .await?;
            if step.checkpoint.is_some() {
                last_checkpoint = step.checkpoint.clone();
            }

            match step.status {
                StepStatus::Advanced | StepStatus::Regenerating => {
                    stage = step.stage;
                    state = step.state;
                }
                StepStatus::AwaitingReview => {
                    return Ok((
                        step.state,
                        RunOutcome::AwaitingReview {
                            stage: step.stage,
                            checkpoint: last_checkpoint,
                        },
                    ));
                }
                StepStatus::Completed => {
                    tracing::info!(run_id, "Run completed");
                    return Ok((
                        step.state,
                        RunOutcome::Completed {
                            checkpoint: last_checkpoint,
                        },
                    ));
                }
            }
        }
    }

    /// Begin a new run at Requirements. The run id must not have any history yet.
    pub async fn start<F, Fut>(
        &self,
        run_id: &str,
        state: WorkflowState,
        is_cancelled: F,
    ) -> Result<(WorkflowState, RunOutcome)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let existing = self.store.list(run_id).await?;
        if let Some(last) = existing.last() {
            return Err(AppError::InvalidRunState {
                run_id: run_id.to_string(),
                status: format!("already started (latest checkpoint {last})"),
            });
        }
        tracing::info!(run_id, language = %state.programming_language, autonomy = %state.autonomy_level, "Starting run");
        self.drive(run_id, Stage::Requirements, state, is_cancelled)
            .await
    }

    /// Continue a run from its most recent checkpoint.
    pub async fn resume<F, Fut>(&self, run_id: &str, is_cancelled: F) -> Result<(WorkflowState, RunOutcome)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let checkpoint = self.store.latest(run_id).await?;
        tracing::info!(run_id, checkpoint = %checkpoint.id(), stage = %checkpoint.stage, "Resuming run");
        self.drive(run_id, checkpoint.stage, checkpoint.state, is_cancelled)
            .await
    }

    /// Continue a run from a specific checkpoint. New checkpoints are appended
    /// to the same run; earlier ones are untouched.
    pub async fn resume_from<F, Fut>(
        &self,
        id: &CheckpointId,
        is_cancelled: F,
    ) -> Result<(WorkflowState, RunOutcome)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = bool>,
    {
        let checkpoint = self.store.load(id).await?;
        tracing::info!(checkpoint = %id, stage = %checkpoint.stage, "Resuming from checkpoint");
        self.drive(&id.run_id, checkpoint.stage, checkpoint.state, is_cancelled)
            .await
    }
}

fn record_assessment(state: WorkflowState, stage: Stage, assessment: &PolicyAssessment) -> WorkflowState {
    let level = state.autonomy_level;
    state
        .with_quality_metrics(stage, assessment.scorecard.metrics())
        .with_quality_metrics(stage, [("overall_score", assessment.score)])
        .with_autonomous_decision(assessment.record(stage, level))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::config::{PolicyConfig, RetryConfig};
    use crate::error::ServiceError;
    use crate::language::Language;
    use crate::llm::ScriptedGenerator;
    use crate::policy::{Assessment, AutonomyLevel, QualityScorer, Scorecard};
    use crate::store::FileCheckpointStore;
    use crate::workflow::state::{DecidedBy, PolicyVerdict};

    struct Fixed(f64);

    impl QualityScorer for Fixed {
        fn assess(&self, _stage: Stage, _state: &WorkflowState) -> Result<Assessment> {
            Ok(Assessment {
                scorecard: Scorecard {
                    completeness: Some(self.0),
                    consistency: Some(self.0),
                    ..Scorecard::default()
                },
                notes: "add acceptance criteria".into(),
            })
        }
    }

    async fn never() -> bool {
        false
    }

    fn controller(
        client: Arc<ScriptedGenerator>,
        score: f64,
        store: Arc<FileCheckpointStore>,
    ) -> WorkflowController {
        let retry = RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        };
        WorkflowController::new(
            StageGenerator::new(client, retry),
            ReviewGate::new(Box::new(Fixed(score)), PolicyConfig::default(), 3),
            store,
        )
    }

    fn state(level: AutonomyLevel) -> WorkflowState {
        WorkflowState::new("Build a CRUD API", Language::Python, "test-model", level)
    }

    fn without_timestamps(mut state: WorkflowState) -> WorkflowState {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        for d in &mut state.decisions {
            d.timestamp = epoch;
        }
        for d in &mut state.autonomous_decisions {
            d.timestamp = epoch;
        }
        state
    }

    #[tokio::test]
    async fn test_manual_review_denies_then_approves() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let client = Arc::new(ScriptedGenerator::new());
        let c = controller(client.clone(), 1.0, store.clone());

        let (state, outcome) = c
            .drive("crud", Stage::Requirements, state(AutonomyLevel::Manual), never)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::AwaitingReview {
                stage: Stage::UserStories,
                checkpoint: Some(CheckpointId::new("crud", 2)),
            }
        );
        assert_eq!(state.status(Stage::UserStories), ReviewStatus::Pending);
        assert_eq!(client.calls(), 1);

        let step = c
            .submit_decision(
                "crud",
                Stage::UserStories,
                state,
                ReviewDecision::deny(Stage::UserStories, "too vague", DecidedBy::Human),
            )
            .await
            .unwrap();
        assert_eq!(step.status, StepStatus::Regenerating);
        assert_eq!(step.stage, Stage::UserStories);

        let (state, _) = c.drive("crud", step.stage, step.state, never).await.unwrap();
        assert_eq!(client.calls(), 2);
        assert!(client.prompts()[1].contains("too vague"));
        assert_eq!(state.user_story_feedback, vec!["too vague".to_string()]);

        let step = c
            .submit_decision(
                "crud",
                Stage::UserStories,
                state,
                ReviewDecision::approve(Stage::UserStories, DecidedBy::Human),
            )
            .await
            .unwrap();
        assert_eq!(step.status, StepStatus::Advanced);
        assert_eq!(step.stage, Stage::DesignDocument);
        assert_eq!(store.list("crud").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_policy_approves_above_threshold_without_human() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let c = controller(Arc::new(ScriptedGenerator::new()), 0.90, store);

        let (state, outcome) = c
            .drive("auto", Stage::Requirements, state(AutonomyLevel::SemiAuto), never)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert!(state.is_complete());
        assert_eq!(state.decisions.len(), 6);
        assert!(state.decisions.iter().all(|d| d.decided_by == DecidedBy::Policy && d.is_approved()));
        assert!(state
            .autonomous_decisions
            .iter()
            .all(|d| d.verdict == PolicyVerdict::Approved && d.threshold == 0.85));
        assert_eq!(state.quality_metrics["user_stories.overall_score"], 0.90);
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_last_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let client = Arc::new(
            ScriptedGenerator::new()
                .fail(ServiceError::Transient("503".into()))
                .fail(ServiceError::Timeout("slow".into()))
                .fail(ServiceError::QuotaExceeded("429".into())),
        );
        let c = controller(client.clone(), 1.0, store.clone());

        let err = c
            .drive("flaky", Stage::Requirements, state(AutonomyLevel::Manual), never)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::StageFailed { stage: Stage::UserStories, attempts: 3, .. }
        ));

        assert_eq!(store.list("flaky").await.unwrap(), vec![CheckpointId::new("flaky", 1)]);
        let last = store.latest("flaky").await.unwrap();
        assert_eq!(last.stage, Stage::UserStories);
        assert!(last.state.user_stories.is_empty());
    }

    #[tokio::test]
    async fn test_all_approve_run_reaches_deployment() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let c = controller(Arc::new(ScriptedGenerator::new()), 1.0, store);

        let (mut state, mut outcome) = c
            .drive("full", Stage::Requirements, state(AutonomyLevel::Manual), never)
            .await
            .unwrap();

        let mut reviews = 0;
        while let RunOutcome::AwaitingReview { stage, .. } = outcome {
            reviews += 1;
            let step = c
                .submit_decision("full", stage, state, ReviewDecision::approve(stage, DecidedBy::Human))
                .await
                .unwrap();
            (state, outcome) = c.drive("full", step.stage, step.state, never).await.unwrap();
        }

        assert_eq!(reviews, 6);
        assert!(state.is_complete());
        for stage in Stage::all() {
            assert!(state.has_artifact(*stage), "{stage} is empty");
        }
    }

    #[tokio::test]
    async fn test_resume_matches_uninterrupted_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));

        let straight = controller(Arc::new(ScriptedGenerator::new()), 1.0, store.clone());
        let (expected, _) = straight
            .drive("a", Stage::Requirements, state(AutonomyLevel::FullAuto), never)
            .await
            .unwrap();

        // Interrupted run: three transitions, then a fresh controller picks it up
        let first = controller(Arc::new(ScriptedGenerator::new()), 1.0, store.clone());
        let mut step = first
            .advance("b", Stage::Requirements, state(AutonomyLevel::FullAuto))
            .await
            .unwrap();
        for _ in 0..2 {
            step = first.advance("b", step.stage, step.state).await.unwrap();
        }
        assert_eq!(step.stage, Stage::Code);

        let second = controller(Arc::new(ScriptedGenerator::new()), 1.0, store.clone());
        let (resumed, outcome) = second.resume("b", never).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(without_timestamps(resumed), without_timestamps(expected.clone()));

        // Any earlier checkpoint leads to the same place
        let (replayed, _) = second
            .resume_from(&CheckpointId::new("a", 3), never)
            .await
            .unwrap();
        assert_eq!(without_timestamps(replayed), without_timestamps(expected));
    }

    #[tokio::test]
    async fn test_cancelled_attempt_writes_no_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let client = Arc::new(ScriptedGenerator::new());
        let c = controller(client.clone(), 1.0, store.clone());

        // Third check happens after the user stories were generated
        let checks = AtomicUsize::new(0);
        let is_cancelled = || {
            let n = checks.fetch_add(1, Ordering::SeqCst);
            async move { n >= 2 }
        };

        let err = c
            .drive("stop", Stage::Requirements, state(AutonomyLevel::Manual), is_cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled { stage: Stage::UserStories }));
        assert_eq!(client.calls(), 1);
        assert_eq!(store.list("stop").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_policy_denials_regenerate_then_escalate() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let client = Arc::new(ScriptedGenerator::new());
        let c = controller(client.clone(), 0.5, store);

        let (state, outcome) = c
            .drive("strict", Stage::Requirements, state(AutonomyLevel::FullAuto), never)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::AwaitingReview { stage: Stage::UserStories, .. }));
        assert_eq!(client.calls(), 3);
        assert!(client.prompts()[1].contains("add acceptance criteria"));
        assert_eq!(state.policy_denials(Stage::UserStories), 2);
        assert_eq!(state.user_story_feedback.len(), 2);
        assert_eq!(
            state.autonomous_decisions.last().map(|d| d.verdict),
            Some(PolicyVerdict::Escalated)
        );
    }

    #[tokio::test]
    async fn test_start_refuses_a_run_id_with_history() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let client = Arc::new(ScriptedGenerator::new());
        let c = controller(client.clone(), 1.0, store.clone());

        c.start("taken", state(AutonomyLevel::Manual), never).await.unwrap();
        let before = store.list("taken").await.unwrap();
        let calls = client.calls();

        let other = WorkflowState::new("Build a chat bot", Language::Go, "m", AutonomyLevel::Manual);
        let err = c.start("taken", other, never).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidRunState { .. }));

        // The existing history is untouched and nothing was generated
        assert_eq!(store.list("taken").await.unwrap(), before);
        assert_eq!(client.calls(), calls);
        assert_eq!(store.latest("taken").await.unwrap().state.requirements, "Build a CRUD API");
    }

    #[tokio::test]
    async fn test_empty_requirements_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let c = controller(Arc::new(ScriptedGenerator::new()), 1.0, store);

        let blank = WorkflowState::new("  ", Language::Python, "m", AutonomyLevel::Manual);
        let err = c.advance("blank", Stage::Requirements, blank).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { stage: Stage::Requirements, .. }));
    }

    #[tokio::test]
    async fn test_decision_without_pending_artifact_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileCheckpointStore::at(tmp.path()));
        let c = controller(Arc::new(ScriptedGenerator::new()), 1.0, store);

        let err = c
            .submit_decision(
                "idle",
                Stage::Code,
                state(AutonomyLevel::Manual),
                ReviewDecision::approve(Stage::Code, DecidedBy::Human),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotAwaitingReview { stage: Stage::Code }));
    }
}
