use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use orchestrator_core::{MessageQueueConfig, OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Job, Message, MessageQueue, StageState, TaskRequest};
use orchestrator_infrastructure::MetricsCollector;
use tracing::{debug, error, info, warn, Instrument};

use crate::job_store::JobStore;
use crate::retry_service::PublishRetry;

/// Counts from one dispatch pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub jobs_scanned: usize,
    pub dispatched: usize,
    /// Claims handed back after every publish attempt failed
    pub reverted: usize,
    /// Stages another dispatcher claimed first
    pub skipped: usize,
}

/// Publishes task requests for ELIGIBLE stages.
///
/// A stage is claimed before its task is published, so two dispatchers can
/// never send the same attempt. A claim whose publish keeps failing is
/// reverted, so no stage stays DISPATCHED without a message out.
pub struct Dispatcher {
    job_store: Arc<JobStore>,
    message_queue: Arc<dyn MessageQueue>,
    queue_config: MessageQueueConfig,
    publish_retry: PublishRetry,
    instance_id: String,
    metrics: Arc<MetricsCollector>,
}

impl Dispatcher {
    pub fn new(
        job_store: Arc<JobStore>,
        message_queue: Arc<dyn MessageQueue>,
        queue_config: MessageQueueConfig,
        instance_id: String,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let publish_retry = PublishRetry::from_config(&queue_config);
        Self {
            job_store,
            message_queue,
            queue_config,
            publish_retry,
            instance_id,
            metrics,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Dispatch every ELIGIBLE stage of every active job, oldest job first
    pub async fn dispatch_eligible(&self) -> OrchestratorResult<DispatchReport> {
        let span = tracing::info_span!("dispatch_eligible", instance = %self.instance_id);
        async {
            let start_time = Instant::now();
            let jobs = self.job_store.list_active_jobs().await?;
            let mut report = DispatchReport {
                jobs_scanned: jobs.len(),
                ..DispatchReport::default()
            };

            for job in &jobs {
                if let Err(e) = self.dispatch_job(job, &mut report).await {
                    error!(job_id = %job.id, "dispatch failed: {}", e);
                }
            }

            self.metrics
                .record_dispatch_pass(start_time.elapsed().as_secs_f64(), jobs.len());

            if report.dispatched > 0 || report.reverted > 0 {
                info!(
                    dispatched = report.dispatched,
                    reverted = report.reverted,
                    skipped = report.skipped,
                    "dispatch pass finished"
                );
            }
            Ok::<_, OrchestratorError>(report)
        }
        .instrument(span)
        .await
    }

    async fn dispatch_job(&self, job: &Job, report: &mut DispatchReport) -> OrchestratorResult<()> {
        let eligible: Vec<String> = job
            .stages_in(StageState::Eligible)
            .map(|s| s.id.clone())
            .collect();

        let mut claimed = Vec::new();
        for stage_id in &eligible {
            match self
                .job_store
                .claim_stage(&job.id, stage_id, &self.instance_id)
                .await
            {
                Ok(claimed_job) => {
                    if let Some(stage) = claimed_job.stage(stage_id) {
                        claimed.push(TaskRequest::for_stage(&claimed_job, stage));
                    }
                }
                Err(OrchestratorError::InvalidTransition { .. })
                | Err(OrchestratorError::ConcurrentModification { .. }) => {
                    debug!(job_id = %job.id, %stage_id, "stage already claimed elsewhere");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        // Stages of one job are independent once eligible, publish them together
        let results = join_all(claimed.into_iter().map(|request| async move {
            let result = self.publish_task(&request).await;
            (request, result)
        }))
        .await;

        for (request, result) in results {
            match result {
                Ok(()) => {
                    self.metrics
                        .record_stage_dispatched(request.service_kind.as_str());
                    report.dispatched += 1;
                }
                Err(e) => {
                    warn!(
                        job_id = %request.job_id,
                        stage_id = %request.stage_id,
                        attempt = request.attempt,
                        "giving up on publish, reverting claim: {}",
                        e
                    );
                    // The monitor times out a claim we could not hand back
                    match self
                        .job_store
                        .revert_claim(&request.job_id, &request.stage_id, request.attempt)
                        .await
                    {
                        Ok(_) => report.reverted += 1,
                        Err(e) => error!(
                            job_id = %request.job_id,
                            stage_id = %request.stage_id,
                            "failed to revert claim: {}",
                            e
                        ),
                    }
                }
            }
        }

        Ok(())
    }

    /// Publish one task request with bounded exponential backoff
    async fn publish_task(&self, request: &TaskRequest) -> OrchestratorResult<()> {
        let queue = self.queue_config.task_queue(request.service_kind.as_str());
        let message = Message::task_request(request.clone());

        let mut attempt = 1;
        loop {
            match self.message_queue.publish_message(&queue, &message).await {
                Ok(()) => {
                    debug!(
                        job_id = %request.job_id,
                        stage_id = %request.stage_id,
                        attempt = request.attempt,
                        %queue,
                        "published task request"
                    );
                    return Ok(());
                }
                Err(e) => {
                    self.metrics.record_publish_failure(&queue, attempt);
                    if attempt >= self.publish_retry.max_attempts {
                        return Err(OrchestratorError::dispatch_failure(
                            &request.stage_id,
                            format!("{attempt} publish attempts to {queue} failed, last error: {e}"),
                        ));
                    }
                    tokio::time::sleep(self.publish_retry.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
