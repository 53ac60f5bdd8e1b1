//! Authoritative job state.
//!
//! Every mutation runs under the job's async mutex, re-reads the job from
//! the repository, applies the change and writes it back with a version
//! check. The mutex serializes writers in this process; the version check
//! catches writers in other processes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    CancelNotice, EventEffect, ImageDescriptor, InFlightStage, Job, JobRepository, ServiceKind,
    StageEvent, StageId, StageSpec, StageState, REASON_CANCELLED, REASON_RETRY_LIMIT_AFTER_TIMEOUT,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dependency_resolver::{cascade_failure, recompute_eligibility, validate_graph};
use crate::retry_service::RetryPolicy;

/// How many times a mutation is re-applied after losing a version race
const MAX_CONFLICT_RETRIES: usize = 3;

/// Options accepted when creating a job
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub max_attempts: Option<u32>,
    pub capability_ref: Option<String>,
}

/// Result of offering a worker event to the store
#[derive(Debug, Clone, PartialEq)]
pub enum EventDisposition {
    Applied(EventEffect),
    /// Stale or duplicate event; the store was not touched
    Ignored(String),
}

/// What the monitor's expiry did to an overdue stage
#[derive(Debug, Clone, PartialEq)]
pub enum ExpiryOutcome {
    RetryScheduled { retry_at: DateTime<Utc> },
    Failed { cascaded: Vec<StageId> },
}

/// Result of a cancellation, with the notices owed to workers
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub job: Job,
    pub notices: Vec<(ServiceKind, CancelNotice)>,
}

/// Changes made while re-resolving a job after restart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveredJob {
    pub newly_eligible: Vec<StageId>,
    pub cascaded: Vec<StageId>,
    pub in_flight: usize,
    pub changed: bool,
}

pub struct JobStore {
    repository: Arc<dyn JobRepository>,
    retry_policy: RetryPolicy,
    default_max_attempts: u32,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobStore {
    pub fn new(
        repository: Arc<dyn JobRepository>,
        retry_policy: RetryPolicy,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            repository,
            retry_policy,
            default_max_attempts,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    async fn job_lock(&self, job_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load, change and persist one job.
    ///
    /// `change` returns `Ok(None)` when it decided nothing needs to change;
    /// the job is then not written. An error also leaves the stored job
    /// untouched. The job's lock entry is dropped afterwards unless another
    /// mutation is waiting on it, so unknown and finished jobs leave nothing
    /// behind.
    async fn mutate<T, F>(&self, job_id: &str, change: F) -> OrchestratorResult<Option<(T, Job)>>
    where
        F: FnMut(&mut Job, DateTime<Utc>) -> OrchestratorResult<Option<T>>,
    {
        let lock = self.job_lock(job_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.mutate_locked(job_id, change).await
        };
        drop(lock);
        self.forget_lock(job_id).await;
        result
    }

    async fn mutate_locked<T, F>(
        &self,
        job_id: &str,
        mut change: F,
    ) -> OrchestratorResult<Option<(T, Job)>>
    where
        F: FnMut(&mut Job, DateTime<Utc>) -> OrchestratorResult<Option<T>>,
    {
        let mut conflicts = 0;
        loop {
            let mut job = self
                .repository
                .get_by_id(job_id)
                .await?
                .ok_or_else(|| OrchestratorError::job_not_found(job_id))?;

            let now = Utc::now();
            let Some(value) = change(&mut job, now)? else {
                return Ok(None);
            };

            job.refresh_status();
            job.touch(now);

            match self.repository.update(&job).await {
                Ok(version) => {
                    job.version = version;
                    return Ok(Some((value, job)));
                }
                Err(OrchestratorError::ConcurrentModification { .. })
                    if conflicts < MAX_CONFLICT_RETRIES =>
                {
                    conflicts += 1;
                    debug!(job_id, conflicts, "job changed underneath us, re-applying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Number of per-job lock entries currently held
    pub async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Validate the stage graph and persist a new job. Nothing is stored
    /// when the graph is rejected.
    pub async fn create_job(
        &self,
        image: ImageDescriptor,
        stages: Vec<StageSpec>,
        options: JobOptions,
    ) -> OrchestratorResult<Job> {
        validate_graph(&stages)?;

        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(OrchestratorError::InvalidOperation(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let job = Job::new(image, stages, max_attempts, options.capability_ref);
        self.repository.create(&job).await?;

        info!(
            job_id = %job.id,
            image = %job.image.name,
            stages = job.stages.len(),
            "created job"
        );
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        self.repository
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::job_not_found(job_id))
    }

    pub async fn list_active_jobs(&self) -> OrchestratorResult<Vec<Job>> {
        self.repository.list_active().await
    }

    pub async fn list_jobs(&self, include_archived: bool) -> OrchestratorResult<Vec<Job>> {
        self.repository.list(include_archived).await
    }

    /// Apply a worker result event. Events for another attempt or for a
    /// stage that is not in flight are ignored without touching the store.
    pub async fn apply_stage_event(&self, event: &StageEvent) -> OrchestratorResult<EventDisposition> {
        let retry_policy = &self.retry_policy;

        let result = self
            .mutate(&event.job_id, |job, now| {
                let max_attempts = job.max_attempts;
                let stage = job
                    .stage_mut(&event.stage_id)
                    .ok_or_else(|| OrchestratorError::stage_not_found(&event.job_id, &event.stage_id))?;

                let retry_at = retry_policy.next_retry_time(stage.attempt, now);
                let effect = stage.apply_event(event, max_attempts, retry_at, now)?;

                match effect {
                    EventEffect::Completed => {
                        recompute_eligibility(job, now)?;
                    }
                    EventEffect::Failed => {
                        cascade_failure(job, &event.stage_id, now)?;
                    }
                    EventEffect::Progressed | EventEffect::RetryScheduled => {}
                }

                Ok(Some(effect))
            })
            .await;

        match result {
            Ok(Some((effect, job))) => {
                debug!(
                    job_id = %job.id,
                    stage_id = %event.stage_id,
                    attempt = event.attempt,
                    ?effect,
                    status = %job.status,
                    "applied stage event"
                );
                Ok(EventDisposition::Applied(effect))
            }
            Ok(None) => Ok(EventDisposition::Ignored("no change".to_string())),
            Err(OrchestratorError::StaleEvent { reason, .. }) => {
                Ok(EventDisposition::Ignored(reason))
            }
            Err(e) => Err(e),
        }
    }

    /// Claim an ELIGIBLE stage for `claimant`, starting its next attempt.
    /// Returns the job as persisted with the claim.
    pub async fn claim_stage(
        &self,
        job_id: &str,
        stage_id: &str,
        claimant: &str,
    ) -> OrchestratorResult<Job> {
        let (_, job) = self
            .mutate(job_id, |job, now| {
                let stage = job
                    .stage_mut(stage_id)
                    .ok_or_else(|| OrchestratorError::stage_not_found(job_id, stage_id))?;
                stage.claim(claimant, now)?;
                Ok(Some(()))
            })
            .await?
            .ok_or_else(|| OrchestratorError::internal("claim produced no change"))?;

        Ok(job)
    }

    /// Hand back a claim whose task message could not be published. Does
    /// nothing when the stage has moved on from that attempt.
    pub async fn revert_claim(
        &self,
        job_id: &str,
        stage_id: &str,
        attempt: u32,
    ) -> OrchestratorResult<bool> {
        let reverted = self
            .mutate(job_id, |job, now| {
                let stage = job
                    .stage_mut(stage_id)
                    .ok_or_else(|| OrchestratorError::stage_not_found(job_id, stage_id))?;
                if stage.state != StageState::Dispatched || stage.attempt != attempt {
                    return Ok(None);
                }
                stage.revert_claim(now)?;
                Ok(Some(()))
            })
            .await?;

        Ok(reverted.is_some())
    }

    /// Time out an in-flight stage that has been silent past `deadline`.
    ///
    /// Schedules a retry while attempts remain, otherwise fails the stage
    /// and cascades. Returns `None` when the stage moved on or heard from
    /// its worker since the monitor looked.
    pub async fn expire_stage(
        &self,
        job_id: &str,
        stage_id: &str,
        attempt: u32,
        deadline: chrono::Duration,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Option<ExpiryOutcome>> {
        let retry_policy = &self.retry_policy;

        let outcome = self
            .mutate(job_id, |job, _| {
                let max_attempts = job.max_attempts;
                let stage = job
                    .stage_mut(stage_id)
                    .ok_or_else(|| OrchestratorError::stage_not_found(job_id, stage_id))?;

                if !stage.state.is_in_flight()
                    || stage.attempt != attempt
                    || now - stage.updated_at <= deadline
                {
                    return Ok(None);
                }

                if stage.attempt < max_attempts {
                    let retry_at = retry_policy.next_retry_time(stage.attempt, now);
                    stage.schedule_retry(retry_at, now)?;
                    return Ok(Some(ExpiryOutcome::RetryScheduled { retry_at }));
                }

                stage.fail(REASON_RETRY_LIMIT_AFTER_TIMEOUT, now)?;
                let cascaded = cascade_failure(job, stage_id, now)?;
                Ok(Some(ExpiryOutcome::Failed { cascaded }))
            })
            .await?;

        Ok(outcome.map(|(outcome, _)| outcome))
    }

    /// Move RETRY_PENDING stages whose backoff has elapsed back to
    /// ELIGIBLE. Returns how many were released.
    pub async fn promote_due_retries(&self, now: DateTime<Utc>) -> OrchestratorResult<usize> {
        let mut promoted = 0;

        for job in self.list_active_jobs().await? {
            let due = job
                .stages_in(StageState::RetryPending)
                .any(|s| s.retry_at.is_some_and(|at| at <= now));
            if !due {
                continue;
            }

            let released = self
                .mutate(&job.id, |job, _| {
                    let mut released = 0;
                    for stage in job.stages.iter_mut() {
                        if stage.release_retry(now)? {
                            released += 1;
                        }
                    }
                    Ok((released > 0).then_some(released))
                })
                .await?;

            if let Some((count, job)) = released {
                debug!(job_id = %job.id, count, "released stages for retry");
                promoted += count;
            }
        }

        Ok(promoted)
    }

    /// Fail every non-terminal stage with reason "cancelled". Fails with
    /// `JobFinalized` once the job is already COMPLETED or FAILED.
    pub async fn cancel_job(&self, job_id: &str) -> OrchestratorResult<Cancellation> {
        let (notices, job) = self
            .mutate(job_id, |job, now| {
                if job.is_finished() {
                    return Err(OrchestratorError::JobFinalized { id: job.id.clone() });
                }

                let mut notices = Vec::new();
                for stage in job.stages.iter_mut().filter(|s| !s.state.is_terminal()) {
                    if stage.state.is_in_flight() {
                        notices.push((
                            stage.service_kind,
                            CancelNotice {
                                job_id: stage.job_id.clone(),
                                stage_id: stage.id.clone(),
                                attempt: stage.attempt,
                            },
                        ));
                    }
                    stage.fail(REASON_CANCELLED, now)?;
                }

                Ok(Some(notices))
            })
            .await?
            .ok_or_else(|| OrchestratorError::internal("cancel produced no change"))?;

        info!(job_id, in_flight = notices.len(), "cancelled job");
        Ok(Cancellation { job, notices })
    }

    /// Mark a finished job archived. The record is kept; archived jobs only
    /// drop out of scans and default listings.
    pub async fn archive_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        let archived = self
            .mutate(job_id, |job, now| {
                if !job.is_finished() {
                    return Err(OrchestratorError::InvalidOperation(format!(
                        "job {} is still {} and cannot be archived",
                        job.id, job.status
                    )));
                }
                if job.archived {
                    return Ok(None);
                }
                job.archived = true;
                job.archived_at = Some(now);
                Ok(Some(()))
            })
            .await?;

        match archived {
            Some((_, job)) => {
                info!(job_id, "archived job");
                Ok(job)
            }
            None => self.get_job(job_id).await,
        }
    }

    /// Re-resolve a job after restart: promote stages whose dependencies
    /// completed, re-apply cascades for failed stages and re-derive status.
    pub async fn recover_job(&self, job_id: &str) -> OrchestratorResult<RecoveredJob> {
        let mut in_flight = 0;

        let recovered = self
            .mutate(job_id, |job, now| {
                let before = job.clone();
                in_flight = job.stages.iter().filter(|s| s.state.is_in_flight()).count();

                let mut summary = RecoveredJob {
                    in_flight,
                    ..RecoveredJob::default()
                };

                let failed: Vec<StageId> = job
                    .stages_in(StageState::Failed)
                    .map(|s| s.id.clone())
                    .collect();
                for stage_id in failed {
                    summary.cascaded.extend(cascade_failure(job, &stage_id, now)?);
                }
                summary.newly_eligible = recompute_eligibility(job, now)?;

                let status_changed = job.derive_status() != before.status;
                if summary.cascaded.is_empty() && summary.newly_eligible.is_empty() && !status_changed {
                    return Ok(None);
                }

                summary.changed = true;
                Ok(Some(summary))
            })
            .await?;

        Ok(recovered.map(|(summary, _)| summary).unwrap_or(RecoveredJob {
            in_flight,
            ..RecoveredJob::default()
        }))
    }

    /// DISPATCHED and RUNNING stages of `service_kind` across active jobs
    pub async fn in_flight_stages(
        &self,
        service_kind: ServiceKind,
    ) -> OrchestratorResult<Vec<InFlightStage>> {
        let jobs = self.list_active_jobs().await?;

        Ok(jobs
            .iter()
            .flat_map(|job| {
                job.stages
                    .iter()
                    .filter(|s| s.service_kind == service_kind && s.state.is_in_flight())
                    .map(move |s| InFlightStage::from_stage(job, s))
            })
            .collect())
    }

    /// Drop the lock entry of a job no other mutation is holding or awaiting
    async fn forget_lock(&self, job_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks.get(job_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(job_id);
        }
    }
}
