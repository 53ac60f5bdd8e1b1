//! HTTP surface of the orchestrator.
//!
//! Submits release jobs, answers status queries and exposes the
//! administrative cancel and archive operations:
//!
//! - `POST /job`, `GET /job`, `GET /job/{job_id}`
//! - `POST /job/{job_id}/cancel`, `POST /job/{job_id}/archive`
//! - `GET /status/{service_kind}`
//! - `GET /health` and the Prometheus metrics endpoint

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::Router;
use orchestrator_core::{ApiConfig, ObservabilityConfig};
use tower_http::timeout::TimeoutLayer;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// Build the router with logging, tracing, timeout and CORS layers applied
pub fn create_app(
    state: AppState,
    api_config: &ApiConfig,
    observability: &ObservabilityConfig,
) -> Router {
    let router = create_routes(state, &observability.metrics_endpoint)
        .layer(TimeoutLayer::new(Duration::from_secs(
            api_config.request_timeout_seconds,
        )))
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer());

    if api_config.cors_enabled {
        router.layer(cors_layer(&api_config.cors_origins))
    } else {
        router
    }
}
