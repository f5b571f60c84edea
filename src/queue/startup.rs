use std::sync::Arc;

use crate::queue::run::{RunRecord, RunStatus};
use crate::queue::task::Task;
use crate::server::AppState;

/// Register every run found in the checkpoint store and resume the ones that
/// were mid-flight when the server stopped.
pub async fn scan_runs(state: &Arc<AppState>) {
    tracing::info!("Scanning checkpoint store for existing runs...");

    let store = state.controller.store();
    let run_ids = match store.runs().await {
        Ok(run_ids) => run_ids,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list runs on startup");
            return;
        }
    };

    tracing::info!(count = run_ids.len(), "Found runs");

    let mut resumed = 0usize;
    for run_id in run_ids {
        if state.run(&run_id).await.is_ok() {
            tracing::debug!(run_id = %run_id, "Skipping run already registered");
            continue;
        }

        let checkpoint = match store.latest(&run_id).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Skipping run with unreadable checkpoint");
                continue;
            }
        };

        let record = RunRecord::from_checkpoint(checkpoint);
        let status = record.status;
        tracing::info!(
            run_id = %run_id,
            stage = %record.stage,
            status = %status,
            "Registering run"
        );
        state.register(record).await;

        if status == RunStatus::Queued {
            state.enqueue(&run_id, Task::Resume { from: None }).await;
            resumed += 1;
        }
    }

    tracing::info!(resumed, "Startup scan complete");
}
