use thiserror::Error;

use crate::workflow::stage::Stage;

/// Failures reported by the text-generation service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("generation request timed out: {0}")]
    Timeout(String),

    #[error("generation quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Authentication or request errors that retrying cannot fix.
    #[error("generation service rejected the request: {0}")]
    Fatal(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ServiceError::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Validation failed at {stage}: {message}")]
    Validation { stage: Stage, message: String },

    #[error("Stage {stage} failed after {attempts} attempt(s): {cause}")]
    StageFailed {
        stage: Stage,
        attempts: u32,
        cause: String,
    },

    #[error("Quality policy error at {stage}: {message}")]
    Policy { stage: Stage, message: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {run_id} is {status}")]
    InvalidRunState { run_id: String, status: String },

    #[error("Stage {stage} has no artifact awaiting review")]
    NotAwaitingReview { stage: Stage },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(stage: Stage, message: impl Into<String>) -> Self {
        AppError::Validation {
            stage,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_service_errors_are_final() {
        assert!(ServiceError::Timeout("30s".into()).is_retryable());
        assert!(ServiceError::QuotaExceeded("429".into()).is_retryable());
        assert!(ServiceError::MalformedResponse("no text".into()).is_retryable());
        assert!(ServiceError::Transient("503".into()).is_retryable());
        assert!(!ServiceError::Fatal("401".into()).is_retryable());
    }

    #[test]
    fn test_stage_failed_message_names_stage() {
        let err = AppError::StageFailed {
            stage: Stage::Code,
            attempts: 3,
            cause: "quota".into(),
        };
        assert_eq!(err.to_string(), "Stage code failed after 3 attempt(s): quota");
    }
}
