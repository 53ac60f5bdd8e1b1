use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use orchestrator_core::OrchestratorError;

use crate::value_objects::{ImageDescriptor, JobId, StageId};

/// Reason recorded on stages failed by a cascade from a failed dependency
pub const REASON_UPSTREAM_FAILED: &str = "upstream dependency failed";
/// Reason recorded when the monitor gives up on a stage
pub const REASON_RETRY_LIMIT_AFTER_TIMEOUT: &str = "exceeded retry limit after timeout";
/// Reason recorded on stages failed by administrative cancellation
pub const REASON_CANCELLED: &str = "cancelled";
/// Fallback for worker failure events that carry no reason
pub const REASON_WORKER_FAILURE: &str = "worker reported failure";

/// Worker service kinds a stage can be addressed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Image build watcher
    Obs,
    Upload,
    Test,
    Replicate,
    Publish,
    Deprecate,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::Obs,
        ServiceKind::Upload,
        ServiceKind::Test,
        ServiceKind::Replicate,
        ServiceKind::Publish,
        ServiceKind::Deprecate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Obs => "obs",
            ServiceKind::Upload => "upload",
            ServiceKind::Test => "test",
            ServiceKind::Replicate => "replicate",
            ServiceKind::Publish => "publish",
            ServiceKind::Deprecate => "deprecate",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| OrchestratorError::InvalidOperation(format!("unknown service kind: {s}")))
    }
}

/// Stage lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Blocked,
    Eligible,
    Dispatched,
    Running,
    Completed,
    Failed,
    RetryPending,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Blocked => "BLOCKED",
            StageState::Eligible => "ELIGIBLE",
            StageState::Dispatched => "DISPATCHED",
            StageState::Running => "RUNNING",
            StageState::Completed => "COMPLETED",
            StageState::Failed => "FAILED",
            StageState::RetryPending => "RETRY_PENDING",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Completed | StageState::Failed)
    }

    /// A task message for the current attempt is out with a worker
    pub fn is_in_flight(&self) -> bool {
        matches!(self, StageState::Dispatched | StageState::Running)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall job status, always derived from stage states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(OrchestratorError::Serialization(format!(
                "invalid job status: {s}"
            ))),
        }
    }
}

/// Requested stage as submitted with a release request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSpec {
    pub id: StageId,
    pub service_kind: ServiceKind,
    #[serde(default)]
    pub dependencies: Vec<StageId>,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StageSpec {
    pub fn new(id: impl Into<StageId>, service_kind: ServiceKind) -> Self {
        Self {
            id: id.into(),
            service_kind,
            dependencies: Vec::new(),
            params: serde_json::Value::Null,
        }
    }

    pub fn depends_on(mut self, stage_id: impl Into<StageId>) -> Self {
        self.dependencies.push(stage_id.into());
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// One unit of work within a job, owned by one service kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: StageId,
    pub job_id: JobId,
    pub service_kind: ServiceKind,
    pub dependencies: Vec<StageId>,
    pub state: StageState,
    /// Number of dispatches so far; the in-flight attempt when dispatched
    pub attempt: u32,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub retry_at: Option<DateTime<Utc>>,
    /// Dispatcher instance that claimed the current attempt
    pub claimed_by: Option<String>,
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
}

impl Stage {
    /// Build a stage in its initial state
    pub fn from_spec(job_id: &JobId, spec: StageSpec, now: DateTime<Utc>) -> Self {
        let state = if spec.dependencies.is_empty() {
            StageState::Eligible
        } else {
            StageState::Blocked
        };

        Self {
            id: spec.id,
            job_id: job_id.clone(),
            service_kind: spec.service_kind,
            dependencies: spec.dependencies,
            state,
            attempt: 0,
            dispatched_at: None,
            updated_at: now,
            retry_at: None,
            claimed_by: None,
            params: spec.params,
            result: None,
            failure_reason: None,
        }
    }
}

/// One release instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub image: ImageDescriptor,
    pub stages: Vec<Stage>,
    pub status: JobStatus,
    pub max_attempts: u32,
    pub capability_ref: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped on every persisted mutation
    pub version: i64,
}

impl Job {
    /// Create a job with every stage in its initial state. The stage graph
    /// must already have been validated.
    pub fn new(
        image: ImageDescriptor,
        stages: Vec<StageSpec>,
        max_attempts: u32,
        capability_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let capability_ref = capability_ref.unwrap_or_else(|| format!("job:{id}"));
        let stages = stages
            .into_iter()
            .map(|spec| Stage::from_spec(&id, spec, now))
            .collect();

        let mut job = Self {
            id,
            image,
            stages,
            status: JobStatus::InProgress,
            max_attempts,
            capability_ref,
            created_at: now,
            updated_at: now,
            archived: false,
            archived_at: None,
            version: 0,
        };
        job.refresh_status();
        job
    }

    pub fn stage(&self, stage_id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    pub fn stage_mut(&mut self, stage_id: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.id == stage_id)
    }

    /// Derive the overall status from stage states.
    ///
    /// COMPLETED when every stage completed, FAILED once a stage failed and
    /// nothing is left running, IN_PROGRESS otherwise.
    pub fn derive_status(&self) -> JobStatus {
        if self.stages.iter().all(|s| s.state == StageState::Completed) {
            return JobStatus::Completed;
        }

        let any_failed = self.stages.iter().any(|s| s.state == StageState::Failed);
        let any_pending = self.stages.iter().any(|s| !s.state.is_terminal());

        if any_failed && !any_pending {
            JobStatus::Failed
        } else {
            JobStatus::InProgress
        }
    }

    pub fn refresh_status(&mut self) -> JobStatus {
        self.status = self.derive_status();
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn stages_in(&self, state: StageState) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(move |s| s.state == state)
    }

    pub fn failure_reasons(&self) -> Vec<(StageId, String)> {
        self.stages
            .iter()
            .filter_map(|s| {
                s.failure_reason
                    .as_ref()
                    .map(|reason| (s.id.clone(), reason.clone()))
            })
            .collect()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
