use std::sync::Arc;

use orchestrator_core::{MessageQueueConfig, OrchestratorResult};
use orchestrator_domain::{
    pipeline::standard_release_stages, ImageDescriptor, Job, Message, MessageQueue, ServiceKind,
    StageSpec, REASON_CANCELLED,
};
use orchestrator_infrastructure::MetricsCollector;
use serde::Deserialize;
use tracing::{info, warn};

use crate::job_store::{JobOptions, JobStore};

/// Release request as accepted by the control surface
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJobRequest {
    pub image: ImageDescriptor,
    /// Explicit stage graph; the standard pipeline is used when absent
    #[serde(default)]
    pub stages: Option<Vec<StageSpec>>,
    /// Stop the standard pipeline after this service kind
    #[serde(default)]
    pub last_service: Option<ServiceKind>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub capability_ref: Option<String>,
}

impl CreateJobRequest {
    pub fn new(image: ImageDescriptor) -> Self {
        Self {
            image,
            stages: None,
            last_service: None,
            max_attempts: None,
            capability_ref: None,
        }
    }

    pub fn with_stages(mut self, stages: Vec<StageSpec>) -> Self {
        self.stages = Some(stages);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Administrative operations on jobs: create, cancel, archive
pub struct JobController {
    job_store: Arc<JobStore>,
    message_queue: Arc<dyn MessageQueue>,
    queue_config: MessageQueueConfig,
    metrics: Arc<MetricsCollector>,
}

impl JobController {
    pub fn new(
        job_store: Arc<JobStore>,
        message_queue: Arc<dyn MessageQueue>,
        queue_config: MessageQueueConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            job_store,
            message_queue,
            queue_config,
            metrics,
        }
    }

    pub async fn create_job(&self, request: CreateJobRequest) -> OrchestratorResult<Job> {
        let stages = request
            .stages
            .unwrap_or_else(|| standard_release_stages(request.last_service));

        let job = self
            .job_store
            .create_job(
                request.image,
                stages,
                JobOptions {
                    max_attempts: request.max_attempts,
                    capability_ref: request.capability_ref,
                },
            )
            .await?;

        self.metrics.record_job_created(&job.id, job.stages.len());
        Ok(job)
    }

    /// Cancel a job and tell the workers holding its stages. Notices are
    /// best effort: a failed publish is logged and the cancel still stands.
    pub async fn cancel_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        let cancellation = self.job_store.cancel_job(job_id).await?;

        for (service_kind, notice) in &cancellation.notices {
            let queue = self.queue_config.cancel_queue(service_kind.as_str());
            let message = Message::cancel_notice(notice.clone());
            if let Err(e) = self.message_queue.publish_message(&queue, &message).await {
                warn!(
                    job_id,
                    stage_id = %notice.stage_id,
                    %queue,
                    "failed to send cancel notice: {}",
                    e
                );
            }
        }

        let cancelled = cancellation
            .job
            .stages
            .iter()
            .filter(|s| s.failure_reason.as_deref() == Some(REASON_CANCELLED))
            .count();
        self.metrics.record_stage_failure(cancelled);
        info!(job_id, notices = cancellation.notices.len(), "job cancelled");
        Ok(cancellation.job)
    }

    pub async fn archive_job(&self, job_id: &str) -> OrchestratorResult<Job> {
        self.job_store.archive_job(job_id).await
    }
}
