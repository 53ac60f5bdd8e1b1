use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorResult, StageDeadlines};
use orchestrator_infrastructure::MetricsCollector;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::job_store::{ExpiryOutcome, JobStore};

#[derive(Debug, Clone)]
pub struct TimeoutMonitorConfig {
    pub scan_interval: Duration,
    pub deadlines: StageDeadlines,
}

impl Default for TimeoutMonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            deadlines: StageDeadlines::default(),
        }
    }
}

/// Counts from one monitor scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub timed_out: usize,
    pub retries_scheduled: usize,
    pub failed: usize,
    pub cascaded: usize,
    pub promoted: usize,
}

/// Watches in-flight stages for silence past their service kind's
/// deadline and releases retries whose backoff has elapsed.
pub struct TimeoutMonitor {
    job_store: Arc<JobStore>,
    config: TimeoutMonitorConfig,
    metrics: Arc<MetricsCollector>,
    running: Arc<RwLock<bool>>,
}

impl TimeoutMonitor {
    pub fn new(
        job_store: Arc<JobStore>,
        config: TimeoutMonitorConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_store,
            config,
            metrics,
            running: Arc::new(RwLock::new(false)),
        }
    }

    fn deadline_for(&self, service_kind: &str) -> chrono::Duration {
        let seconds = self.config.deadlines.for_kind(service_kind).unwrap_or_else(|| {
            warn!(service_kind, "no deadline configured, using the default");
            StageDeadlines::default().for_kind(service_kind).unwrap_or(3600)
        });
        chrono::Duration::seconds(seconds as i64)
    }

    pub async fn scan(&self) -> OrchestratorResult<MonitorReport> {
        self.scan_at(Utc::now()).await
    }

    /// One monitor pass evaluated at `now`
    pub async fn scan_at(&self, now: DateTime<Utc>) -> OrchestratorResult<MonitorReport> {
        let mut report = MonitorReport::default();

        for job in self.job_store.list_active_jobs().await? {
            let overdue: Vec<_> = job
                .stages
                .iter()
                .filter(|s| s.state.is_in_flight())
                .filter_map(|s| {
                    let deadline = self.deadline_for(s.service_kind.as_str());
                    (now - s.updated_at > deadline)
                        .then(|| (s.id.clone(), s.attempt, s.service_kind, deadline))
                })
                .collect();

            for (stage_id, attempt, service_kind, deadline) in overdue {
                let outcome = match self
                    .job_store
                    .expire_stage(&job.id, &stage_id, attempt, deadline, now)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(job_id = %job.id, %stage_id, "failed to expire stage: {}", e);
                        continue;
                    }
                };

                let Some(outcome) = outcome else {
                    debug!(job_id = %job.id, %stage_id, "stage moved on before expiry");
                    continue;
                };

                report.timed_out += 1;
                self.metrics.record_stage_timeout(service_kind.as_str());

                match outcome {
                    ExpiryOutcome::RetryScheduled { retry_at } => {
                        info!(
                            job_id = %job.id,
                            %stage_id,
                            attempt,
                            %retry_at,
                            "stage timed out, retry scheduled"
                        );
                        report.retries_scheduled += 1;
                        self.metrics.record_retry_scheduled();
                    }
                    ExpiryOutcome::Failed { cascaded } => {
                        warn!(
                            job_id = %job.id,
                            %stage_id,
                            attempt,
                            cascaded = cascaded.len(),
                            "stage timed out with no attempts left"
                        );
                        report.failed += 1;
                        report.cascaded += cascaded.len();
                        self.metrics.record_stage_failure(1 + cascaded.len());
                    }
                }
            }
        }

        report.promoted = self.job_store.promote_due_retries(now).await?;

        Ok(report)
    }

    pub async fn start(&self) -> OrchestratorResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("timeout monitor already running");
                return Ok(());
            }
            *running = true;
        }

        info!(
            interval_seconds = self.config.scan_interval.as_secs(),
            "starting timeout monitor"
        );
        self.monitor_loop().await;
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("timeout monitor stop requested");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn monitor_loop(&self) {
        loop {
            if !*self.running.read().await {
                info!("timeout monitor stopped");
                break;
            }

            match self.scan().await {
                Ok(report) if report != MonitorReport::default() => {
                    info!(?report, "timeout monitor scan finished");
                }
                Ok(_) => {}
                Err(e) => error!("timeout monitor scan failed: {}", e),
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }
}
