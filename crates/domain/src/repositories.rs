//! Persistence port for jobs.
//!
//! A job and all of its stages are stored as one record, so every write of a
//! job is atomic with respect to its stages.

use async_trait::async_trait;
use orchestrator_core::OrchestratorResult;

use crate::entities::Job;

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> OrchestratorResult<()>;
    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<Job>>;
    /// Persist `job` if the stored version still equals `job.version`.
    /// Returns the new version, or `ConcurrentModification` when another
    /// writer got there first.
    async fn update(&self, job: &Job) -> OrchestratorResult<i64>;
    /// Non-archived jobs still in progress, oldest first
    async fn list_active(&self) -> OrchestratorResult<Vec<Job>>;
    async fn list(&self, include_archived: bool) -> OrchestratorResult<Vec<Job>>;
}
