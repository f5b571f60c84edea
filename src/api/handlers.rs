use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::api::types::{
    CreateRunRequest, CreateRunResponse, LanguageInfo, ResumeRequest, ReviewRequest, RunDetail,
};
use crate::error::{AppError, Result};
use crate::language::Language;
use crate::policy::AutonomyLevel;
use crate::queue::run::{RunRecord, RunStatus, RunSummary};
use crate::queue::task::Task;
use crate::server::AppState;
use crate::store::CheckpointId;
use crate::workflow::state::{DecidedBy, ReviewOutcome};
use crate::workflow::{ReviewDecision, ReviewStatus, Stage, WorkflowState};

pub async fn list_languages() -> Json<Vec<LanguageInfo>> {
    Json(
        Language::all()
            .iter()
            .map(|&language| LanguageInfo {
                id: language,
                profile: language.profile(),
            })
            .collect(),
    )
}

pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRunRequest>,
) -> Result<impl IntoResponse> {
    if request.requirements.trim().is_empty() {
        return Err(AppError::validation(
            Stage::Requirements,
            "requirements must not be empty",
        ));
    }

    let workflow = &state.config.workflow;
    let language = match request.language.as_deref() {
        Some(name) => name
            .parse::<Language>()
            .map_err(|e| AppError::validation(Stage::Requirements, e.to_string()))?,
        None => workflow.default_language,
    };
    let autonomy = match request.autonomy.as_deref() {
        Some(name) => name
            .parse::<AutonomyLevel>()
            .map_err(|e| AppError::validation(Stage::Requirements, e.to_string()))?,
        None => workflow.default_autonomy,
    };
    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.llm.model.clone());

    let run_id = uuid::Uuid::new_v4().to_string();
    let initial = WorkflowState::new(request.requirements, language, model, autonomy);

    tracing::info!(
        run_id = %run_id,
        language = %language,
        autonomy = %autonomy,
        "Run created"
    );

    state.register(RunRecord::new(run_id.clone(), initial)).await;
    state.enqueue(&run_id, Task::Start).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRunResponse {
            run_id,
            status: RunStatus::Queued,
        }),
    ))
}

pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunSummary>> {
    Json(state.list_runs().await.iter().map(RunRecord::summary).collect())
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunDetail>> {
    let record = state.run(&run_id).await?;
    Ok(Json(RunDetail::from(&record)))
}

pub async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<CheckpointId>>> {
    state.run(&run_id).await?;
    let ids = state.controller.store().list(&run_id).await?;
    Ok(Json(ids))
}

pub async fn review_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<impl IntoResponse> {
    let mut accepted: Option<Stage> = None;
    let mut rejected: Option<AppError> = None;

    // Checked and flipped under one lock so a second review cannot slip in
    let found = state
        .update_run(&run_id, |record| {
            let stage = record.stage;
            if record.status != RunStatus::AwaitingReview
                || record.state.status(stage) != ReviewStatus::Pending
            {
                rejected = Some(AppError::NotAwaitingReview { stage });
                return;
            }
            record.status = RunStatus::Queued;
            accepted = Some(stage);
        })
        .await;

    if !found {
        return Err(AppError::RunNotFound(run_id));
    }
    if let Some(err) = rejected {
        return Err(err);
    }
    let stage = accepted.ok_or_else(|| AppError::Internal("review not recorded".into()))?;

    let decision = match request.outcome {
        ReviewOutcome::Approved => ReviewDecision::approve(stage, DecidedBy::Human),
        ReviewOutcome::Denied => ReviewDecision::deny(
            stage,
            request.feedback.unwrap_or_default(),
            DecidedBy::Human,
        ),
    };

    state.enqueue(&run_id, Task::Review { decision }).await;

    let record = state.run(&run_id).await?;
    Ok((StatusCode::ACCEPTED, Json(record.summary())))
}

pub async fn resume_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    body: Option<Json<ResumeRequest>>,
) -> Result<impl IntoResponse> {
    let request = body.map(|Json(request)| request).unwrap_or_default();

    if let Some(sequence) = request.sequence {
        // Fail fast on a missing or corrupt checkpoint
        state
            .controller
            .store()
            .load(&CheckpointId::new(run_id.clone(), sequence))
            .await?;
    }

    let mut rejected: Option<AppError> = None;
    let found = state
        .update_run(&run_id, |record| {
            let latest_done = record.status == RunStatus::Completed && request.sequence.is_none();
            if record.status.is_active() || latest_done {
                rejected = Some(AppError::InvalidRunState {
                    run_id: record.run_id.clone(),
                    status: record.status.to_string(),
                });
                return;
            }
            record.cancel.store(false, Ordering::SeqCst);
            record.status = RunStatus::Queued;
            record.error = None;
        })
        .await;

    if !found {
        return Err(AppError::RunNotFound(run_id));
    }
    if let Some(err) = rejected {
        return Err(err);
    }

    state
        .enqueue(&run_id, Task::Resume { from: request.sequence })
        .await;

    let record = state.run(&run_id).await?;
    Ok((StatusCode::ACCEPTED, Json(record.summary())))
}

pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunSummary>> {
    let mut rejected: Option<AppError> = None;
    let found = state
        .update_run(&run_id, |record| match record.status {
            // The processor notices the flag before its next step
            RunStatus::Queued | RunStatus::Running => {
                record.cancel.store(true, Ordering::SeqCst);
            }
            RunStatus::AwaitingReview => {
                record.cancel.store(true, Ordering::SeqCst);
                record.status = RunStatus::Cancelled;
            }
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled => {
                rejected = Some(AppError::InvalidRunState {
                    run_id: record.run_id.clone(),
                    status: record.status.to_string(),
                });
            }
        })
        .await;

    if !found {
        return Err(AppError::RunNotFound(run_id));
    }
    if let Some(err) = rejected {
        return Err(err);
    }

    tracing::info!(run_id = %run_id, "Cancellation requested");
    let record = state.run(&run_id).await?;
    Ok(Json(record.summary()))
}
