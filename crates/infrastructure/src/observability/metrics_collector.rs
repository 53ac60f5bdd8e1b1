//! Metrics recorded by the orchestration loops.
//!
//! Handles are registered against whatever `metrics` recorder is installed.
//! Without one they are no-ops, which is what tests run with.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{debug, warn};

pub struct MetricsCollector {
    jobs_created_total: Counter,
    stages_dispatched_total: Counter,
    publish_failures_total: Counter,
    stage_timeouts_total: Counter,
    retries_scheduled_total: Counter,
    stage_failures_total: Counter,
    stale_events_total: Counter,
    dispatch_pass_duration: Histogram,
    active_jobs: Gauge,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_created_total: counter!("orchestrator_jobs_created_total"),
            stages_dispatched_total: counter!("orchestrator_stages_dispatched_total"),
            publish_failures_total: counter!("orchestrator_publish_failures_total"),
            stage_timeouts_total: counter!("orchestrator_stage_timeouts_total"),
            retries_scheduled_total: counter!("orchestrator_retries_scheduled_total"),
            stage_failures_total: counter!("orchestrator_stage_failures_total"),
            stale_events_total: counter!("orchestrator_stale_events_total"),
            dispatch_pass_duration: histogram!("orchestrator_dispatch_pass_duration_seconds"),
            active_jobs: gauge!("orchestrator_active_jobs"),
        }
    }

    pub fn record_job_created(&self, job_id: &str, stage_count: usize) {
        self.jobs_created_total.increment(1);
        debug!(job_id, stage_count, "job created");
    }

    pub fn record_stage_dispatched(&self, service_kind: &str) {
        self.stages_dispatched_total.increment(1);
        counter!("orchestrator_stages_dispatched_by_kind_total", "service_kind" => service_kind.to_string())
            .increment(1);
    }

    pub fn record_publish_failure(&self, queue: &str, attempt: u32) {
        self.publish_failures_total.increment(1);
        warn!(queue, attempt, "task publish failed");
    }

    pub fn record_stage_timeout(&self, service_kind: &str) {
        self.stage_timeouts_total.increment(1);
        counter!("orchestrator_stage_timeouts_by_kind_total", "service_kind" => service_kind.to_string())
            .increment(1);
    }

    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled_total.increment(1);
    }

    pub fn record_stage_failure(&self, count: usize) {
        self.stage_failures_total.increment(count as u64);
    }

    pub fn record_stale_event(&self) {
        self.stale_events_total.increment(1);
    }

    pub fn record_dispatch_pass(&self, duration_seconds: f64, active_jobs: usize) {
        self.dispatch_pass_duration.record(duration_seconds);
        self.active_jobs.set(active_jobs as f64);
    }
}
