use serde::{Deserialize, Serialize};

use crate::language::{Language, LanguageProfile};
use crate::queue::run::{RunRecord, RunSummary};
use crate::workflow::state::ReviewOutcome;
use crate::workflow::{ReviewStatus, Stage, WorkflowState};

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub requirements: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub autonomy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: crate::queue::run::RunStatus,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub outcome: ReviewOutcome,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeRequest {
    /// Checkpoint sequence to resume from; the latest when absent.
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub id: Language,
    #[serde(flatten)]
    pub profile: LanguageProfile,
}

/// A run with its full state, plus the artifact waiting for review if any.
#[derive(Debug, Serialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub pending_review: Option<PendingReview>,
    pub state: WorkflowState,
}

#[derive(Debug, Serialize)]
pub struct PendingReview {
    pub stage: Stage,
    pub title: &'static str,
    pub artifact: String,
}

impl From<&RunRecord> for RunDetail {
    fn from(record: &RunRecord) -> Self {
        let pending_review = (record.stage.is_gated()
            && record.state.status(record.stage) == ReviewStatus::Pending)
            .then(|| PendingReview {
                stage: record.stage,
                title: record.stage.title(),
                artifact: record.state.artifact_text(record.stage),
            });
        Self {
            summary: record.summary(),
            pending_review,
            state: record.state.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
