use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::language::Language;
use crate::policy::AutonomyLevel;
use crate::store::{Checkpoint, CheckpointId};
use crate::workflow::state::ReviewStatus;
use crate::workflow::{Stage, WorkflowState};

/// Lifecycle of a run as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    AwaitingReview,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::AwaitingReview => "awaiting_review",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// A task for the run is queued or executing.
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live bookkeeping for one run. The durable truth is the checkpoint stream;
/// this is the server's view of it.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub stage: Stage,
    pub state: WorkflowState,
    pub last_checkpoint: Option<CheckpointId>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancel: Arc<AtomicBool>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, state: WorkflowState) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            status: RunStatus::Queued,
            stage: Stage::Requirements,
            state,
            last_checkpoint: None,
            error: None,
            created_at: now,
            updated_at: now,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rebuild the record of a run found in the store.
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        let status = status_at(checkpoint.stage, &checkpoint.state);
        let id = checkpoint.id();
        Self {
            run_id: checkpoint.run_id,
            status,
            stage: checkpoint.stage,
            state: checkpoint.state,
            last_checkpoint: Some(id),
            error: None,
            created_at: checkpoint.timestamp,
            updated_at: checkpoint.timestamp,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            status: self.status,
            stage: self.stage,
            language: self.state.programming_language,
            autonomy: self.state.autonomy_level,
            model: self.state.llm_model.clone(),
            last_checkpoint: self.last_checkpoint.as_ref().map(|id| id.sequence),
            cancel_requested: self.is_cancel_requested(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Where a checkpointed run stands: done, waiting for a human, or mid-flight.
pub fn status_at(stage: Stage, state: &WorkflowState) -> RunStatus {
    if state.is_complete() {
        RunStatus::Completed
    } else if stage.is_gated() && state.status(stage) == ReviewStatus::Pending {
        RunStatus::AwaitingReview
    } else {
        RunStatus::Queued
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub stage: Stage,
    pub language: Language,
    pub autonomy: AutonomyLevel,
    pub model: String,
    pub last_checkpoint: Option<u64>,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::Artifact;

    #[test]
    fn test_checkpointed_status() {
        let state = WorkflowState::new("Build a CRUD API", Language::Python, "m", AutonomyLevel::Manual);
        assert_eq!(status_at(Stage::UserStories, &state), RunStatus::Queued);

        let pending = state
            .with_artifact(Artifact::UserStories(vec!["As a user, I want items".into()]))
            .unwrap();
        assert_eq!(status_at(Stage::UserStories, &pending), RunStatus::AwaitingReview);
    }

    #[test]
    fn test_active_statuses() {
        assert!(RunStatus::Queued.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(!RunStatus::AwaitingReview.is_active());
        assert!(!RunStatus::Failed.is_active());
    }
}
