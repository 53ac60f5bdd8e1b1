use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, routes::AppState};

/// Prometheus text exposition of the process metrics
pub async fn export_metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let handle = state
        .metrics_handle
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("metrics are disabled".to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response())
}
