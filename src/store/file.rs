use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::{AppError, Result};
use crate::store::{Checkpoint, CheckpointId, CheckpointStore};
use crate::workflow::stage::Stage;
use crate::workflow::state::WorkflowState;

/// Checkpoints as pretty-printed JSON files: `<base_dir>/<run_id>/<sequence>.json`.
pub struct FileCheckpointStore {
    base_dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::at(config.base_dir.clone())
    }

    pub fn at(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.base_dir.join(run_id))
    }

    fn checkpoint_path(&self, id: &CheckpointId) -> Result<PathBuf> {
        Ok(self.run_dir(&id.run_id)?.join(file_name(id.sequence)))
    }

    async fn next_sequence(&self, run_id: &str) -> Result<u64> {
        let ids = self.list(run_id).await?;
        Ok(ids.last().map_or(1, |id| id.sequence + 1))
    }
}

fn file_name(sequence: u64) -> String {
    format!("{sequence:06}.json")
}

fn parse_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(".json")?.parse().ok()
}

/// Run ids become directory names, so only a conservative character set is allowed.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Persistence(format!("invalid run id: {run_id:?}")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, run_id: &str, stage: Stage, state: &WorkflowState) -> Result<CheckpointId> {
        let dir = self.run_dir(run_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to create {}: {e}", dir.display())))?;

        let sequence = self.next_sequence(run_id).await?;
        let checkpoint = Checkpoint::new(run_id, sequence, stage, state)?;
        let body = serde_json::to_vec_pretty(&checkpoint)?;

        let target = dir.join(file_name(sequence));
        let staging = dir.join(format!(".{sequence:06}.json.tmp"));

        tokio::fs::write(&staging, &body)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to write checkpoint: {e}")))?;

        // hard_link refuses to replace an existing file, so a snapshot is never overwritten
        let linked = tokio::fs::hard_link(&staging, &target).await;
        let _ = tokio::fs::remove_file(&staging).await;
        linked.map_err(|e| {
            AppError::Persistence(format!(
                "Failed to commit checkpoint {}: {e}",
                target.display()
            ))
        })?;

        let id = checkpoint.id();
        tracing::debug!(checkpoint = %id, stage = %stage, "Checkpoint saved");
        Ok(id)
    }

    async fn load(&self, id: &CheckpointId) -> Result<Checkpoint> {
        let path = self.checkpoint_path(id)?;

        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::CheckpointNotFound(id.to_string()));
            }
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&body)
            .map_err(|e| AppError::CheckpointCorrupt(format!("{id}: {e}")))?;

        if checkpoint.id() != *id {
            return Err(AppError::CheckpointCorrupt(format!(
                "{id}: file holds checkpoint {}",
                checkpoint.id()
            )));
        }
        checkpoint.verify()?;
        Ok(checkpoint)
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointId>> {
        let dir = self.run_dir(run_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Persistence(format!("Failed to list {}: {e}", dir.display()))),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(sequence) = entry.file_name().to_str().and_then(parse_file_name) {
                ids.push(CheckpointId::new(run_id, sequence));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn runs(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_run_id(name).is_ok() {
                    runs.push(name.to_string());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::policy::AutonomyLevel;

    fn state(requirements: &str) -> WorkflowState {
        WorkflowState::new(requirements, Language::Python, "m", AutonomyLevel::Manual)
    }

    #[tokio::test]
    async fn test_saves_are_additive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::at(tmp.path());

        let first = store.save("run-a", Stage::Requirements, &state("one")).await.unwrap();
        let second = store.save("run-a", Stage::UserStories, &state("two")).await.unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(store.list("run-a").await.unwrap(), vec![first.clone(), second.clone()]);

        // The older snapshot is still intact
        let loaded = store.load(&first).await.unwrap();
        assert_eq!(loaded.state.requirements, "one");
        assert_eq!(loaded.stage, Stage::Requirements);

        let latest = store.latest("run-a").await.unwrap();
        assert_eq!(latest.id(), second);
        assert_eq!(latest.state.requirements, "two");
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::at(tmp.path());

        let err = store.load(&CheckpointId::new("ghost", 1)).await.unwrap_err();
        assert!(matches!(err, AppError::CheckpointNotFound(_)));

        let err = store.latest("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::CheckpointNotFound(_)));
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::at(tmp.path());
        let id = store.save("run-b", Stage::Requirements, &state("x")).await.unwrap();

        let path = tmp.path().join("run-b").join("000001.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = store.load(&id).await.unwrap_err();
        assert!(matches!(err, AppError::CheckpointCorrupt(_)));
    }

    #[tokio::test]
    async fn test_edited_state_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::at(tmp.path());
        let id = store.save("run-c", Stage::Requirements, &state("original")).await.unwrap();

        let path = tmp.path().join("run-c").join("000001.json");
        let edited = std::fs::read_to_string(&path).unwrap().replace("original", "edited");
        std::fs::write(&path, edited).unwrap();

        let err = store.load(&id).await.unwrap_err();
        assert!(matches!(err, AppError::CheckpointCorrupt(_)));
    }

    #[tokio::test]
    async fn test_rejects_path_like_run_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::at(tmp.path());

        assert!(store.save("../escape", Stage::Requirements, &state("x")).await.is_err());
        assert!(store.list("a/b").await.is_err());
    }

    #[tokio::test]
    async fn test_runs_lists_run_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::at(tmp.path().join("nested"));
        assert!(store.runs().await.unwrap().is_empty());

        store.save("run-2", Stage::Requirements, &state("x")).await.unwrap();
        store.save("run-1", Stage::Requirements, &state("y")).await.unwrap();
        assert_eq!(store.runs().await.unwrap(), vec!["run-1".to_string(), "run-2".to_string()]);
    }
}
