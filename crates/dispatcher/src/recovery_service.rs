use std::sync::Arc;
use std::time::Instant;

use orchestrator_core::OrchestratorResult;
use tracing::{error, info, warn};

use crate::job_store::JobStore;

/// Outcome of the startup recovery pass
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub jobs_scanned: usize,
    pub jobs_updated: usize,
    pub newly_eligible: usize,
    pub cascaded: usize,
    /// Stages still out with workers; the timeout monitor owns them now
    pub in_flight: usize,
    pub recovery_duration_ms: u64,
    pub errors: Vec<String>,
}

/// Reconciles persisted jobs when the orchestrator starts.
///
/// Nothing in memory survives a restart, so every active job is
/// re-resolved from its stored record before the loops begin.
pub struct RecoveryService {
    job_store: Arc<JobStore>,
}

impl RecoveryService {
    pub fn new(job_store: Arc<JobStore>) -> Self {
        Self { job_store }
    }

    pub async fn recover_system_state(&self) -> OrchestratorResult<RecoveryReport> {
        let start_time = Instant::now();
        info!("starting job recovery");

        let jobs = self.job_store.list_active_jobs().await?;
        let mut report = RecoveryReport {
            jobs_scanned: jobs.len(),
            ..RecoveryReport::default()
        };

        for job in jobs {
            match self.job_store.recover_job(&job.id).await {
                Ok(recovered) => {
                    report.in_flight += recovered.in_flight;
                    if recovered.changed {
                        report.jobs_updated += 1;
                        report.newly_eligible += recovered.newly_eligible.len();
                        report.cascaded += recovered.cascaded.len();
                        info!(
                            job_id = %job.id,
                            newly_eligible = ?recovered.newly_eligible,
                            cascaded = ?recovered.cascaded,
                            "reconciled job"
                        );
                    }
                }
                Err(e) => {
                    error!(job_id = %job.id, "failed to recover job: {}", e);
                    report.errors.push(format!("{}: {}", job.id, e));
                }
            }
        }

        report.recovery_duration_ms = start_time.elapsed().as_millis() as u64;

        if report.errors.is_empty() {
            info!(
                jobs = report.jobs_scanned,
                updated = report.jobs_updated,
                in_flight = report.in_flight,
                duration_ms = report.recovery_duration_ms,
                "job recovery finished"
            );
        } else {
            warn!(
                errors = report.errors.len(),
                "job recovery finished with errors"
            );
        }

        Ok(report)
    }
}
