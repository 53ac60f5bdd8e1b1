use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator_dispatcher::{JobController, StatusQueryService};

use crate::handlers::{
    health::health_check,
    jobs::{archive_job, cancel_job, create_job, get_job, list_jobs},
    metrics::export_metrics,
    status::in_flight_stages,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    pub status_service: Arc<StatusQueryService>,
    /// Present when the Prometheus recorder is installed
    pub metrics_handle: Option<PrometheusHandle>,
}

pub fn create_routes(state: AppState, metrics_endpoint: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(metrics_endpoint, get(export_metrics))
        .route("/job", get(list_jobs).post(create_job))
        .route("/job/{job_id}", get(get_job))
        .route("/job/{job_id}/cancel", post(cancel_job))
        .route("/job/{job_id}/archive", post(archive_job))
        .route("/status/{service_kind}", get(in_flight_stages))
        .with_state(state)
}
