use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::llm::{ClaudeClient, TextGenerator};
use crate::queue::run::RunRecord;
use crate::queue::task::Task;
use crate::queue::RunQueue;
use crate::store::{CheckpointStore, FileCheckpointStore};
use crate::workflow::WorkflowController;

pub struct AppState {
    pub config: AppConfig,
    pub controller: WorkflowController,
    pub runs: RwLock<HashMap<String, RunRecord>>,
    pub run_queue: Mutex<RunQueue>,
}

impl AppState {
    /// State backed by the Anthropic client and the file checkpoint store.
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = ClaudeClient::new(&config.llm)?;
        let store = FileCheckpointStore::new(&config.store);
        Ok(Self::with_parts(config, Arc::new(client), Arc::new(store)))
    }

    pub fn with_parts(
        config: AppConfig,
        client: Arc<dyn TextGenerator>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let controller = WorkflowController::from_config(&config, client, store);
        Self {
            config,
            controller,
            runs: RwLock::new(HashMap::new()),
            run_queue: Mutex::new(RunQueue::new()),
        }
    }

    pub async fn register(&self, record: RunRecord) {
        let mut runs = self.runs.write().await;
        runs.insert(record.run_id.clone(), record);
    }

    pub async fn run(&self, run_id: &str) -> Result<RunRecord> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| AppError::RunNotFound(run_id.to_string()))
    }

    pub async fn list_runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.run_id.cmp(&b.run_id)));
        runs
    }

    /// Apply `f` to a registered run. Returns false when the run is unknown.
    pub async fn update_run<F>(&self, run_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut RunRecord),
    {
        let mut runs = self.runs.write().await;
        match runs.get_mut(run_id) {
            Some(record) => {
                f(record);
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Runs with a task queued or executing.
    pub async fn in_flight_runs(&self) -> Vec<RunRecord> {
        self.runs
            .read()
            .await
            .values()
            .filter(|record| record.status.is_active())
            .cloned()
            .collect()
    }

    pub async fn enqueue(self: &Arc<Self>, run_id: &str, task: Task) {
        let mut queue = self.run_queue.lock().await;
        queue.enqueue(self, run_id, task);
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/languages", get(handlers::list_languages))
        .route("/runs", post(handlers::create_run).get(handlers::list_runs))
        .route("/runs/:run_id", get(handlers::get_run))
        .route("/runs/:run_id/checkpoints", get(handlers::list_checkpoints))
        .route("/runs/:run_id/review", post(handlers::review_run))
        .route("/runs/:run_id/resume", post(handlers::resume_run))
        .route("/runs/:run_id/cancel", post(handlers::cancel_run));

    let router = match cors_layer(&state.config.server.allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}

async fn health_check() -> &'static str {
    "ok"
}
