pub mod run;
pub mod startup;
pub mod task;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::store::CheckpointId;
use crate::workflow::{RunOutcome, Stage, WorkflowState};

use run::RunStatus;
use task::Task;

/// Per-run sequential queue.
///
/// Each run gets its own channel and processor, so commands for one run are
/// applied in order while different runs proceed concurrently.
#[derive(Default)]
pub struct RunQueue {
    senders: HashMap<String, mpsc::UnboundedSender<Task>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task for a run, creating its processor on first use.
    pub fn enqueue(&mut self, state: &Arc<AppState>, run_id: &str, task: Task) {
        tracing::info!(run_id, task = %task.description(run_id), "Enqueuing task");

        let task = match self.senders.get(run_id) {
            Some(sender) => match sender.send(task) {
                Ok(()) => return,
                // Processor gone, start a new one
                Err(mpsc::error::SendError(task)) => {
                    self.senders.remove(run_id);
                    task
                }
            },
            None => task,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(task).is_err() {
            tracing::error!(run_id, "Failed to enqueue task on a fresh channel");
            return;
        }
        self.senders.insert(run_id.to_string(), tx);
        tokio::spawn(process_run(Arc::clone(state), run_id.to_string(), rx));
    }

    /// Number of runs with a live processor.
    pub fn active_processors(&self) -> usize {
        self.senders.len()
    }

    fn release(&mut self, run_id: &str) {
        self.senders.remove(run_id);
    }
}

/// Take the next task, or retire the processor when the run has nothing queued.
///
/// Runs under the queue lock so a concurrent `enqueue` either lands before the
/// check or finds no sender and starts a fresh processor.
async fn next_task(
    state: &Arc<AppState>,
    run_id: &str,
    rx: &mut mpsc::UnboundedReceiver<Task>,
) -> Option<Task> {
    let mut queue = state.run_queue.lock().await;
    match rx.try_recv() {
        Ok(task) => Some(task),
        Err(_) => {
            queue.release(run_id);
            tracing::debug!(run_id, "Run queue drained, stopping processor");
            None
        }
    }
}

async fn process_run(state: Arc<AppState>, run_id: String, mut rx: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = next_task(&state, &run_id, &mut rx).await {
        let description = task.description(&run_id);
        tracing::info!(run_id = %run_id, task = %description, "Processing task");

        state
            .update_run(&run_id, |record| record.status = RunStatus::Running)
            .await;

        let result = execute(&state, &run_id, task).await;
        match &result {
            Ok((_, outcome)) => {
                tracing::info!(run_id = %run_id, task = %description, outcome = ?outcome, "Task completed");
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, task = %description, error = %e, "Task failed");
            }
        }
        record_result(&state, &run_id, result).await;
    }
}

async fn execute(
    state: &Arc<AppState>,
    run_id: &str,
    task: Task,
) -> Result<(WorkflowState, RunOutcome)> {
    let record = state.run(run_id).await?;
    let cancel = Arc::clone(&record.cancel);
    let is_cancelled = move || std::future::ready(cancel.load(Ordering::SeqCst));
    let controller = &state.controller;

    match task {
        Task::Start => controller.start(run_id, record.state, is_cancelled).await,
        Task::Review { decision } => {
            let step = controller
                .submit_decision(run_id, decision.stage, record.state, decision)
                .await?;
            controller
                .drive(run_id, step.stage, step.state, is_cancelled)
                .await
        }
        Task::Resume { from: Some(sequence) } => {
            controller
                .resume_from(&CheckpointId::new(run_id, sequence), is_cancelled)
                .await
        }
        Task::Resume { from: None } => controller.resume(run_id, is_cancelled).await,
    }
}

async fn record_result(
    state: &Arc<AppState>,
    run_id: &str,
    result: Result<(WorkflowState, RunOutcome)>,
) {
    match result {
        Ok((workflow, outcome)) => {
            state
                .update_run(run_id, move |record| {
                    let (status, stage, checkpoint) = match outcome {
                        RunOutcome::AwaitingReview { stage, checkpoint } => {
                            (RunStatus::AwaitingReview, stage, checkpoint)
                        }
                        RunOutcome::Completed { checkpoint } => {
                            (RunStatus::Completed, Stage::Deployment, checkpoint)
                        }
                    };
                    record.status = status;
                    record.stage = stage;
                    record.state = workflow;
                    record.error = None;
                    if checkpoint.is_some() {
                        record.last_checkpoint = checkpoint;
                    }
                })
                .await;
        }
        Err(e) => {
            // Progress made before the failure is in the store; pick it up
            let latest = state.controller.store().latest(run_id).await.ok();
            let status = match e {
                AppError::Cancelled { .. } => RunStatus::Cancelled,
                _ => RunStatus::Failed,
            };
            let message = e.to_string();
            state
                .update_run(run_id, move |record| {
                    if let Some(checkpoint) = latest {
                        record.last_checkpoint = Some(checkpoint.id());
                        record.stage = checkpoint.stage;
                        record.state = checkpoint.state;
                    }
                    record.status = status;
                    record.error = Some(message);
                })
                .await;
        }
    }
}
