//! Orchestration services: the job store and the loops that drive stages
//! through dispatch, execution, timeout and retry.

pub mod controller;
pub mod dependency_resolver;
pub mod job_store;
pub mod recovery_service;
pub mod retry_service;
pub mod scheduler;
pub mod state_listener;
pub mod status_service;
pub mod timeout_monitor;

pub use controller::{CreateJobRequest, JobController};
pub use job_store::{Cancellation, EventDisposition, ExpiryOutcome, JobOptions, JobStore};
pub use recovery_service::{RecoveryReport, RecoveryService};
pub use retry_service::{PublishRetry, RetryPolicy};
pub use scheduler::{DispatchReport, Dispatcher};
pub use state_listener::StateListener;
pub use status_service::{JobStatusView, JobSummary, StageStatusView, StatusQueryService};
pub use timeout_monitor::{MonitorReport, TimeoutMonitor, TimeoutMonitorConfig};
