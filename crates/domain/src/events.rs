//! Typed message contract between the orchestrator and worker services.
//!
//! Every message travels inside a [`Message`] envelope whose body is tagged
//! by `type`, so a worker can route on a single field without knowing the
//! orchestrator's internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Job, ServiceKind, Stage, StageState};
use crate::value_objects::{ImageDescriptor, JobId, StageId};

/// Result outcome reported by a worker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Failure,
    /// Worker acknowledged the task or reports it is still executing
    Progress,
}

/// Result event published by a worker service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageEvent {
    pub job_id: JobId,
    pub stage_id: StageId,
    pub attempt: u32,
    pub outcome: StageOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Failure is transient and the stage may be retried
    #[serde(default)]
    pub retryable: bool,
}

impl StageEvent {
    pub fn progress(job_id: &str, stage_id: &str, attempt: u32) -> Self {
        Self::new(job_id, stage_id, attempt, StageOutcome::Progress)
    }

    pub fn success(job_id: &str, stage_id: &str, attempt: u32) -> Self {
        Self::new(job_id, stage_id, attempt, StageOutcome::Success)
    }

    pub fn failure(job_id: &str, stage_id: &str, attempt: u32, reason: impl Into<String>) -> Self {
        let mut event = Self::new(job_id, stage_id, attempt, StageOutcome::Failure);
        event.failure_reason = Some(reason.into());
        event
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    fn new(job_id: &str, stage_id: &str, attempt: u32, outcome: StageOutcome) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage_id: stage_id.to_string(),
            attempt,
            outcome,
            payload: None,
            failure_reason: None,
            retryable: false,
        }
    }
}

/// Task request published to a service kind's task queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    pub job_id: JobId,
    pub stage_id: StageId,
    pub attempt: u32,
    pub service_kind: ServiceKind,
    pub image: ImageDescriptor,
    pub params: serde_json::Value,
    /// Reference the worker resolves with the credential service
    pub capability_ref: String,
}

impl TaskRequest {
    pub fn for_stage(job: &Job, stage: &Stage) -> Self {
        Self {
            job_id: job.id.clone(),
            stage_id: stage.id.clone(),
            attempt: stage.attempt,
            service_kind: stage.service_kind,
            image: job.image.clone(),
            params: stage.params.clone(),
            capability_ref: job.capability_ref.clone(),
        }
    }
}

/// Sent by a worker service on (re)connect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusRequest {
    pub service_kind: ServiceKind,
}

/// An in-flight stage as reported back to its worker service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InFlightStage {
    pub job_id: JobId,
    pub stage_id: StageId,
    pub attempt: u32,
    pub state: StageState,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub image: ImageDescriptor,
    pub params: serde_json::Value,
}

impl InFlightStage {
    pub fn from_stage(job: &Job, stage: &Stage) -> Self {
        Self {
            job_id: job.id.clone(),
            stage_id: stage.id.clone(),
            attempt: stage.attempt,
            state: stage.state,
            dispatched_at: stage.dispatched_at,
            image: job.image.clone(),
            params: stage.params.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReply {
    pub service_kind: ServiceKind,
    pub stages: Vec<InFlightStage>,
}

/// Best-effort notice that a dispatched stage was cancelled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelNotice {
    pub job_id: JobId,
    pub stage_id: StageId,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    TaskRequest(TaskRequest),
    StageResult(StageEvent),
    StatusRequest(StatusRequest),
    StatusReply(StatusReply),
    CancelNotice(CancelNotice),
}

/// Envelope for everything that crosses the message channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn task_request(request: TaskRequest) -> Self {
        let correlation_id = format!("{}:{}:{}", request.job_id, request.stage_id, request.attempt);
        Self::new(MessageType::TaskRequest(request)).with_correlation_id(correlation_id)
    }

    pub fn stage_result(event: StageEvent) -> Self {
        Self::new(MessageType::StageResult(event))
    }

    pub fn status_request(service_kind: ServiceKind) -> Self {
        Self::new(MessageType::StatusRequest(StatusRequest { service_kind }))
    }

    pub fn status_reply(reply: StatusReply) -> Self {
        Self::new(MessageType::StatusReply(reply))
    }

    pub fn cancel_notice(notice: CancelNotice) -> Self {
        Self::new(MessageType::CancelNotice(notice))
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn message_type_str(&self) -> &'static str {
        match &self.message_type {
            MessageType::TaskRequest(_) => "task_request",
            MessageType::StageResult(_) => "stage_result",
            MessageType::StatusRequest(_) => "status_request",
            MessageType::StatusReply(_) => "status_reply",
            MessageType::CancelNotice(_) => "cancel_notice",
        }
    }
}
