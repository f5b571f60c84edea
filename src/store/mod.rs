pub mod file;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::language::Language;
use crate::policy::AutonomyLevel;
use crate::workflow::stage::Stage;
use crate::workflow::state::WorkflowState;

pub use file::FileCheckpointStore;

/// Address of one snapshot: the run it belongs to and its position in the run's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointId {
    pub run_id: String,
    pub sequence: u64,
}

impl CheckpointId {
    pub fn new(run_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            run_id: run_id.into(),
            sequence,
        }
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.run_id, self.sequence)
    }
}

impl std::str::FromStr for CheckpointId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let (run_id, sequence) = s
            .rsplit_once('#')
            .ok_or_else(|| AppError::CheckpointNotFound(format!("malformed checkpoint id: {s}")))?;
        let sequence = sequence
            .parse()
            .map_err(|_| AppError::CheckpointNotFound(format!("malformed checkpoint id: {s}")))?;
        Ok(Self::new(run_id, sequence))
    }
}

/// Full snapshot of a run after one transition. Never rewritten once saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub sequence: u64,
    /// Stage the run will continue from when resumed.
    pub stage: Stage,
    /// Hex SHA-256 of the serialized state.
    pub digest: String,
    pub state: WorkflowState,
    pub language: Language,
    pub model: String,
    pub autonomy: AutonomyLevel,
}

impl Checkpoint {
    pub fn new(run_id: &str, sequence: u64, stage: Stage, state: &WorkflowState) -> Result<Self> {
        Ok(Self {
            timestamp: Utc::now(),
            run_id: run_id.to_string(),
            sequence,
            stage,
            digest: state_digest(state)?,
            state: state.clone(),
            language: state.programming_language,
            model: state.llm_model.clone(),
            autonomy: state.autonomy_level,
        })
    }

    pub fn id(&self) -> CheckpointId {
        CheckpointId::new(self.run_id.clone(), self.sequence)
    }

    /// Fails with `CheckpointCorrupt` when the stored digest no longer matches the state.
    pub fn verify(&self) -> Result<()> {
        let actual = state_digest(&self.state)?;
        if actual != self.digest {
            return Err(AppError::CheckpointCorrupt(format!(
                "{}: digest mismatch",
                self.id()
            )));
        }
        Ok(())
    }
}

fn state_digest(state: &WorkflowState) -> Result<String> {
    let bytes = serde_json::to_vec(state)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Durable, append-only history of checkpoints, one stream per run.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a new snapshot; earlier snapshots are never touched.
    async fn save(&self, run_id: &str, stage: Stage, state: &WorkflowState) -> Result<CheckpointId>;

    async fn load(&self, id: &CheckpointId) -> Result<Checkpoint>;

    /// Checkpoint ids of a run in save order.
    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointId>>;

    /// Run ids with at least one checkpoint.
    async fn runs(&self) -> Result<Vec<String>>;

    async fn latest(&self, run_id: &str) -> Result<Checkpoint> {
        let ids = self.list(run_id).await?;
        let id = ids
            .last()
            .ok_or_else(|| AppError::CheckpointNotFound(format!("no checkpoints for run {run_id}")))?;
        self.load(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_id_round_trip_through_display() {
        let id = CheckpointId::new("run-1", 7);
        assert_eq!(id.to_string(), "run-1#7");
        assert_eq!("run-1#7".parse::<CheckpointId>().unwrap(), id);
        assert!("run-1".parse::<CheckpointId>().is_err());
    }

    #[test]
    fn test_tampered_state_fails_verification() {
        let state = WorkflowState::new("Build a CRUD API", Language::Go, "m", AutonomyLevel::Manual);
        let mut checkpoint = Checkpoint::new("run-1", 1, Stage::UserStories, &state).unwrap();
        assert!(checkpoint.verify().is_ok());

        checkpoint.state.requirements.push_str(" with billing");
        assert!(matches!(checkpoint.verify(), Err(AppError::CheckpointCorrupt(_))));
    }
}
