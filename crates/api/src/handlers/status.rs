use axum::extract::{Path, State};
use axum::response::IntoResponse;
use orchestrator_domain::ServiceKind;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// Stages currently out with workers of one service kind, as a worker would
/// receive them on reconnect
pub async fn in_flight_stages(
    State(state): State<AppState>,
    Path(service_kind): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let service_kind: ServiceKind = service_kind
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown service kind: {service_kind}")))?;

    let stages = state.status_service.in_flight_stages(service_kind).await?;
    Ok(success(stages))
}
