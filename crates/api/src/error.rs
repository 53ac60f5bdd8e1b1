use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orchestrator_core::OrchestratorError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
                OrchestratorError::StageNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "STAGE_NOT_FOUND")
                }
                OrchestratorError::InvalidGraph(_) => (StatusCode::BAD_REQUEST, "INVALID_GRAPH"),
                OrchestratorError::JobFinalized { .. } => (StatusCode::CONFLICT, "JOB_FINALIZED"),
                OrchestratorError::InvalidOperation(_) => {
                    (StatusCode::CONFLICT, "INVALID_OPERATION")
                }
                OrchestratorError::ConcurrentModification { .. } => {
                    (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        // Infrastructure details stay in the log
        let message = if status.is_server_error() {
            error!("request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: impl Into<ApiError>) -> StatusCode {
        error.into().into_response().status()
    }

    #[test]
    fn test_orchestrator_errors_map_to_status_codes() {
        assert_eq!(
            status_of(OrchestratorError::job_not_found("job-1")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrchestratorError::invalid_graph("cycle")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(OrchestratorError::JobFinalized { id: "job-1".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrchestratorError::InvalidOperation("still running".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrchestratorError::MessageQueue("channel closed".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_api_error_variants() {
        assert_eq!(
            status_of(ApiError::BadRequest("bad kind".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::NotFound("metrics".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_passes_through_orchestrator_error() {
        let error = ApiError::from(OrchestratorError::job_not_found("job-9"));
        assert_eq!(error.to_string(), "job not found: job-9");
    }
}
