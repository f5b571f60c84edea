use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::server::AppState;

/// How long shutdown waits for running stages to notice cancellation.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Perform graceful shutdown: cancel in-flight runs and give them a moment to
/// stop. Their last checkpoint is untouched, so the next startup resumes them.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    let in_flight = state.in_flight_runs().await;

    if in_flight.is_empty() {
        tracing::info!("No in-flight runs to cancel");
        return;
    }

    tracing::info!(count = in_flight.len(), "Cancelling in-flight runs");

    for record in &in_flight {
        tracing::info!(run_id = %record.run_id, stage = %record.stage, "Cancelling run");
        record.cancel.store(true, Ordering::SeqCst);
    }

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !state.in_flight_runs().await.is_empty() {
            tokio::time::sleep(DRAIN_POLL).await;
        }
    })
    .await;

    if drained.is_err() {
        let remaining = state.in_flight_runs().await.len();
        tracing::warn!(remaining, "Runs still in flight at shutdown; they resume on next start");
    }

    tracing::info!("Graceful shutdown complete");
}
