use thiserror::Error;

/// Orchestrator error type
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database operation failed: {0}")]
    DatabaseOperation(String),

    /// Cyclic or malformed dependency set, rejected at creation
    #[error("invalid stage graph: {0}")]
    InvalidGraph(String),

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("stage {stage_id} not found in job {job_id}")]
    StageNotFound { job_id: String, stage_id: String },

    /// Event for a superseded attempt or a stage that no longer accepts events
    #[error("stale event for stage {stage_id}: {reason}")]
    StaleEvent { stage_id: String, reason: String },

    #[error("invalid transition for stage {stage_id}: {from} -> {to}")]
    InvalidTransition {
        stage_id: String,
        from: String,
        to: String,
    },

    #[error("failed to dispatch stage {stage_id}: {message}")]
    DispatchFailure { stage_id: String, message: String },

    #[error("stage {stage_id} timed out on attempt {attempt}")]
    StageTimeout { stage_id: String, attempt: u32 },

    #[error("stage {stage_id} exceeded retry limit after {attempts} attempts")]
    RetryLimitExceeded { stage_id: String, attempts: u32 },

    #[error("stage {stage_id} failed because upstream stage {upstream} failed")]
    UpstreamDependencyFailed { stage_id: String, upstream: String },

    /// Another writer persisted the job first
    #[error("job {job_id} was modified concurrently")]
    ConcurrentModification { job_id: String },

    #[error("job {id} is finished and can no longer be modified")]
    JobFinalized { id: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("message queue error: {0}")]
    MessageQueue(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound { id: id.into() }
    }

    pub fn stage_not_found(job_id: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self::StageNotFound {
            job_id: job_id.into(),
            stage_id: stage_id.into(),
        }
    }

    pub fn invalid_graph(msg: impl Into<String>) -> Self {
        Self::InvalidGraph(msg.into())
    }

    pub fn stale_event(stage_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StaleEvent {
            stage_id: stage_id.into(),
            reason: reason.into(),
        }
    }

    pub fn dispatch_failure(stage_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DispatchFailure {
            stage_id: stage_id.into(),
            message: message.into(),
        }
    }

    pub fn concurrent_modification(job_id: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            job_id: job_id.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Transient infrastructure errors that a local retry may clear
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            Self::MessageQueue(_) | Self::DispatchFailure { .. } => true,
            Self::ConcurrentModification { .. } => true,
            _ => false,
        }
    }

    /// Errors that indicate the process cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Internal(_))
    }

    /// Caller errors that never change on retry
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidGraph(_)
                | Self::JobNotFound { .. }
                | Self::StageNotFound { .. }
                | Self::JobFinalized { .. }
                | Self::InvalidOperation(_)
        )
    }

    /// Errors that redelivering the same input cannot clear
    pub fn is_permanent(&self) -> bool {
        self.is_client_error()
            || matches!(
                self,
                Self::Serialization(_) | Self::InvalidTransition { .. } | Self::StaleEvent { .. }
            )
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Unified result type
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
