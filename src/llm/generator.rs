use std::sync::Arc;

use crate::config::RetryConfig;
use crate::error::{AppError, Result};
use crate::llm::parse::parse_artifact;
use crate::llm::prompt::build_prompt;
use crate::llm::TextGenerator;
use crate::workflow::stage::Stage;
use crate::workflow::state::{Artifact, WorkflowState};

/// Produces one artifact per call: builds the prompt, calls the service with
/// retries, and parses the reply.
pub struct StageGenerator {
    client: Arc<dyn TextGenerator>,
    retry: RetryConfig,
}

impl StageGenerator {
    pub fn new(client: Arc<dyn TextGenerator>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Retryable service errors are retried with exponential backoff up to
    /// `retry.max_attempts` calls in total. A fatal error, or running out of
    /// attempts, fails the stage. Unparseable output is not retried.
    pub async fn generate(&self, stage: Stage, state: &WorkflowState) -> Result<Artifact> {
        let prompt = build_prompt(stage, state)?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(stage = %stage, attempt, "Requesting generation");

            match self.client.complete(&state.llm_model, &prompt).await {
                Ok(text) => {
                    return parse_artifact(stage, &text, state.programming_language);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        stage = %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Generation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(stage = %stage, attempt, error = %e, "Generation failed");
                    return Err(AppError::StageFailed {
                        stage,
                        attempts: attempt,
                        cause: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::language::Language;
    use crate::llm::ScriptedGenerator;
    use crate::policy::AutonomyLevel;

    fn no_backoff(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    fn state() -> WorkflowState {
        WorkflowState::new("Build a CRUD API", Language::Python, "m", AutonomyLevel::Manual)
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let client = Arc::new(
            ScriptedGenerator::new()
                .fail(ServiceError::QuotaExceeded("429".into()))
                .fail(ServiceError::Timeout("slow".into())),
        );
        let generator = StageGenerator::new(client.clone(), no_backoff(3));

        let artifact = generator.generate(Stage::UserStories, &state()).await.unwrap();
        assert!(matches!(artifact, Artifact::UserStories(ref s) if s.len() == 3));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_fails_after_retry_limit() {
        let client = Arc::new(
            ScriptedGenerator::new()
                .fail(ServiceError::Transient("503".into()))
                .fail(ServiceError::Transient("503".into()))
                .fail(ServiceError::Transient("503".into())),
        );
        let generator = StageGenerator::new(client.clone(), no_backoff(3));

        let err = generator.generate(Stage::Code, &state()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::StageFailed { stage: Stage::Code, attempts: 3, .. }
        ));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let client = Arc::new(ScriptedGenerator::new().fail(ServiceError::Fatal("401".into())));
        let generator = StageGenerator::new(client.clone(), no_backoff(5));

        let err = generator.generate(Stage::Qa, &state()).await.unwrap_err();
        assert!(matches!(err, AppError::StageFailed { attempts: 1, .. }));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_validation_error() {
        let client = Arc::new(ScriptedGenerator::new().reply("Sorry, no."));
        let generator = StageGenerator::new(client.clone(), no_backoff(3));

        let err = generator.generate(Stage::UserStories, &state()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(client.calls(), 1);
    }
}
