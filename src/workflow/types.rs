use serde::Serialize;

use crate::store::CheckpointId;
use crate::workflow::stage::Stage;

/// How a single `advance` call left the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The stage was approved (or needs no gate) and the run moved on.
    Advanced,
    /// The artifact was denied; the same stage runs again with the feedback.
    Regenerating,
    /// Waiting for a human decision on the current stage.
    AwaitingReview,
    /// The deployment plan exists and every gate is approved.
    Completed,
}

/// Where a run stopped after being driven as far as it can go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    AwaitingReview { stage: Stage, checkpoint: Option<CheckpointId> },
    Completed { checkpoint: Option<CheckpointId> },
}
