use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sdlc_wizard::config::AppConfig;
use sdlc_wizard::error::AppError;
use sdlc_wizard::export::export_project;
use sdlc_wizard::language::Language;
use sdlc_wizard::llm::ClaudeClient;
use sdlc_wizard::policy::AutonomyLevel;
use sdlc_wizard::server::{create_router, AppState};
use sdlc_wizard::shutdown::{graceful_shutdown, wait_for_shutdown};
use sdlc_wizard::store::{CheckpointId, CheckpointStore, FileCheckpointStore};
use sdlc_wizard::workflow::state::DecidedBy;
use sdlc_wizard::workflow::{ReviewDecision, ReviewStatus, RunOutcome, Stage, WorkflowController, WorkflowState};

#[derive(Parser)]
#[command(name = "sdlc-wizard", about = "Drive an LLM through the SDLC with review gates")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Start a new run and drive it until it needs a review
    Run {
        /// Requirements text
        #[arg(short, long, conflicts_with = "requirements_file")]
        requirements: Option<String>,
        /// Read requirements from a file
        #[arg(long)]
        requirements_file: Option<String>,
        #[arg(short, long)]
        language: Option<Language>,
        #[arg(short, long)]
        autonomy: Option<AutonomyLevel>,
        #[arg(short, long)]
        model: Option<String>,
        /// Run id; generated when omitted
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Approve or deny the stage awaiting review, then continue
    Review {
        run_id: String,
        #[arg(long, conflicts_with = "deny")]
        approve: bool,
        #[arg(long)]
        deny: bool,
        /// Reason for a denial
        #[arg(short, long)]
        feedback: Option<String>,
    },
    /// Continue a run from its latest (or a given) checkpoint
    Resume {
        run_id: String,
        #[arg(long)]
        sequence: Option<u64>,
    },
    /// Show where a run stands
    Status { run_id: String },
    /// List a run's checkpoints
    History { run_id: String },
    /// Write a run's approved code, tests and deployment plan to a directory
    Export {
        run_id: String,
        /// Target directory; defaults to `generated_<run_id>`
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    if cli.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Run {
            requirements,
            requirements_file,
            language,
            autonomy,
            model,
            run_id,
        } => {
            let requirements = match (requirements, requirements_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => anyhow::bail!("pass --requirements or --requirements-file"),
            };
            let state = WorkflowState::new(
                requirements,
                language.unwrap_or(config.workflow.default_language),
                model.unwrap_or_else(|| config.llm.model.clone()),
                autonomy.unwrap_or(config.workflow.default_autonomy),
            );
            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            println!("Run {run_id}");

            let controller = local_controller(&config)?;
            let cancel = cancel_on_ctrl_c();
            let result = controller
                .start(&run_id, state, move || {
                    std::future::ready(cancel.load(Ordering::SeqCst))
                })
                .await?;
            report(&run_id, &result.0, &result.1);
            Ok(())
        }
        Command::Review {
            run_id,
            approve,
            deny,
            feedback,
        } => {
            if approve == deny {
                anyhow::bail!("pass exactly one of --approve or --deny");
            }
            let controller = local_controller(&config)?;
            let checkpoint = controller.store().latest(&run_id).await?;
            let stage = checkpoint.stage;
            let decision = if approve {
                ReviewDecision::approve(stage, DecidedBy::Human)
            } else {
                ReviewDecision::deny(stage, feedback.unwrap_or_default(), DecidedBy::Human)
            };

            let step = controller
                .submit_decision(&run_id, stage, checkpoint.state, decision)
                .await?;
            let cancel = cancel_on_ctrl_c();
            let (state, outcome) = controller
                .drive(&run_id, step.stage, step.state, move || {
                    std::future::ready(cancel.load(Ordering::SeqCst))
                })
                .await?;
            report(&run_id, &state, &outcome);
            Ok(())
        }
        Command::Resume { run_id, sequence } => {
            let controller = local_controller(&config)?;
            let cancel = cancel_on_ctrl_c();
            let is_cancelled = move || std::future::ready(cancel.load(Ordering::SeqCst));
            let (state, outcome) = match sequence {
                Some(sequence) => {
                    controller
                        .resume_from(&CheckpointId::new(run_id.clone(), sequence), is_cancelled)
                        .await?
                }
                None => controller.resume(&run_id, is_cancelled).await?,
            };
            report(&run_id, &state, &outcome);
            Ok(())
        }
        Command::Status { run_id } => {
            let store = FileCheckpointStore::new(&config.store);
            let checkpoint = store.latest(&run_id).await?;
            let state = &checkpoint.state;
            println!("Run {run_id} (checkpoint {})", checkpoint.sequence);
            println!("  language: {}", state.programming_language);
            println!("  autonomy: {}", state.autonomy_level);
            println!("  model:    {}", state.llm_model);
            println!("  stage:    {}", checkpoint.stage);
            for stage in Stage::all() {
                println!("  {:<16} {:?}", stage.as_str(), state.status(*stage));
            }
            if state.status(checkpoint.stage) == ReviewStatus::Pending {
                println!("\n{} awaiting review:\n", checkpoint.stage.title());
                println!("{}", state.artifact_text(checkpoint.stage));
            }
            Ok(())
        }
        Command::History { run_id } => {
            let store = FileCheckpointStore::new(&config.store);
            let ids = store.list(&run_id).await?;
            if ids.is_empty() {
                return Err(AppError::CheckpointNotFound(run_id).into());
            }
            for id in ids {
                match store.load(&id).await {
                    Ok(checkpoint) => println!(
                        "{:>4}  {}  {}",
                        checkpoint.sequence,
                        checkpoint.timestamp.to_rfc3339(),
                        checkpoint.stage
                    ),
                    Err(e) => println!("{:>4}  {e}", id.sequence),
                }
            }
            Ok(())
        }
        Command::Export { run_id, out } => {
            let store = FileCheckpointStore::new(&config.store);
            let checkpoint = store.latest(&run_id).await?;
            let dir = out.unwrap_or_else(|| PathBuf::from(format!("generated_{run_id}")));
            let written = export_project(&checkpoint.state, &dir).await?;
            println!("Exported {} file(s) to {}", written.len(), dir.display());
            for path in written {
                println!("  {}", path.display());
            }
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting SDLC Wizard server"
    );

    let state = Arc::new(AppState::new(config.clone())?);

    // Re-register stored runs and resume interrupted ones
    let scan_state = Arc::clone(&state);
    tokio::spawn(async move {
        sdlc_wizard::queue::startup::scan_runs(&scan_state).await;
    });

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(())
}

fn local_controller(config: &AppConfig) -> anyhow::Result<WorkflowController> {
    let client = ClaudeClient::new(&config.llm)?;
    let store = FileCheckpointStore::new(&config.store);
    Ok(WorkflowController::from_config(
        config,
        Arc::new(client),
        Arc::new(store),
    ))
}

/// Flag flipped by Ctrl+C; the run stops before its next step.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let signal_flag = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, cancelling after the current step");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });
    flag
}

fn report(run_id: &str, state: &WorkflowState, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::AwaitingReview { stage, .. } => {
            println!("\n{} awaiting review:\n", stage.title());
            println!("{}\n", state.artifact_text(*stage));
            if let Some(advice) = state.autonomous_decisions.last().filter(|d| d.stage == *stage) {
                println!(
                    "Quality policy: score {:.2} against threshold {:.2} ({:?})",
                    advice.score, advice.threshold, advice.verdict
                );
            }
            println!("Approve with: sdlc-wizard review {run_id} --approve");
            println!("Deny with:    sdlc-wizard review {run_id} --deny --feedback \"...\"");
        }
        RunOutcome::Completed { .. } => {
            println!("\nRun {run_id} completed.\n");
            println!("{}", state.artifact_text(Stage::Deployment));
        }
    }
}
