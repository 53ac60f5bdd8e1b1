use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::{MessageQueueConfig, OrchestratorResult};
use orchestrator_domain::{
    ImageDescriptor, InFlightStage, Job, JobId, JobStatus, Message, MessageQueue, ServiceKind,
    Stage, StageId, StageState, StatusReply, StatusRequest,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::job_store::JobStore;

/// Per-stage view returned by status queries
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageStatusView {
    pub id: StageId,
    pub service_kind: ServiceKind,
    pub state: StageState,
    pub attempt: u32,
    pub dependencies: Vec<StageId>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub retry_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl From<&Stage> for StageStatusView {
    fn from(stage: &Stage) -> Self {
        Self {
            id: stage.id.clone(),
            service_kind: stage.service_kind,
            state: stage.state,
            attempt: stage.attempt,
            dependencies: stage.dependencies.clone(),
            dispatched_at: stage.dispatched_at,
            updated_at: stage.updated_at,
            retry_at: stage.retry_at,
            failure_reason: stage.failure_reason.clone(),
            result: stage.result.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub image: ImageDescriptor,
    pub status: JobStatus,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: Vec<StageStatusView>,
    pub failure_reasons: BTreeMap<StageId, String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            image: job.image.clone(),
            status: job.status,
            archived: job.archived,
            archived_at: job.archived_at,
            max_attempts: job.max_attempts,
            created_at: job.created_at,
            updated_at: job.updated_at,
            stages: job.stages.iter().map(StageStatusView::from).collect(),
            failure_reasons: job.failure_reasons().into_iter().collect(),
        }
    }
}

/// One line of a job listing
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub image_name: String,
    pub status: JobStatus,
    pub archived: bool,
    pub stage_count: usize,
    pub completed_stages: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            image_name: job.image.name.clone(),
            status: job.status,
            archived: job.archived,
            stage_count: job.stages.len(),
            completed_stages: job.stages_in(StageState::Completed).count(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Read-only answers about job progress. Always reads the store, never a
/// cache.
pub struct StatusQueryService {
    job_store: Arc<JobStore>,
    message_queue: Arc<dyn MessageQueue>,
    queue_config: MessageQueueConfig,
}

impl StatusQueryService {
    pub fn new(
        job_store: Arc<JobStore>,
        message_queue: Arc<dyn MessageQueue>,
        queue_config: MessageQueueConfig,
    ) -> Self {
        Self {
            job_store,
            message_queue,
            queue_config,
        }
    }

    pub async fn query_status(&self, job_id: &str) -> OrchestratorResult<JobStatusView> {
        let job = self.job_store.get_job(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn list_jobs(&self, include_archived: bool) -> OrchestratorResult<Vec<JobSummary>> {
        let jobs = self.job_store.list_jobs(include_archived).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    pub async fn in_flight_stages(
        &self,
        service_kind: ServiceKind,
    ) -> OrchestratorResult<Vec<InFlightStage>> {
        self.job_store.in_flight_stages(service_kind).await
    }

    /// Answer a (re)connecting worker with every stage currently out with
    /// its service kind. Returns how many stages were reported.
    pub async fn respond_to_status_request(
        &self,
        request: &StatusRequest,
    ) -> OrchestratorResult<usize> {
        let stages = self.in_flight_stages(request.service_kind).await?;
        let count = stages.len();
        let queue = self
            .queue_config
            .status_reply_queue(request.service_kind.as_str());

        let reply = Message::status_reply(StatusReply {
            service_kind: request.service_kind,
            stages,
        });
        self.message_queue.publish_message(&queue, &reply).await?;

        if count > 0 {
            info!(service_kind = %request.service_kind, count, "reported in-flight stages");
        } else {
            debug!(service_kind = %request.service_kind, "no in-flight stages to report");
        }
        Ok(count)
    }
}
