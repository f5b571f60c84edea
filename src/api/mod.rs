pub mod handlers;
pub mod types;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::AppError;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RunNotFound(_) | AppError::CheckpointNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotAwaitingReview { .. } | AppError::InvalidRunState { .. } => {
                StatusCode::CONFLICT
            }
            AppError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = types::ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Stage;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::RunNotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::NotAwaitingReview { stage: Stage::Code }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::validation(Stage::Requirements, "empty").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::CheckpointCorrupt("x#1".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
