use std::collections::HashMap;

use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Job, JobRepository, JobStatus};
use tokio::sync::RwLock;

/// Process-local job repository for embedded runs and tests.
/// Applies the same version check as the SQLite implementation.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut jobs: Vec<Job>) -> Vec<Job> {
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> OrchestratorResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(OrchestratorError::DatabaseOperation(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, job: &Job) -> OrchestratorResult<i64> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| OrchestratorError::job_not_found(&job.id))?;

        if stored.version != job.version {
            return Err(OrchestratorError::concurrent_modification(&job.id));
        }

        let next_version = job.version + 1;
        *stored = job.clone();
        stored.version = next_version;
        Ok(next_version)
    }

    async fn list_active(&self) -> OrchestratorResult<Vec<Job>> {
        let jobs = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| !job.archived && job.status == JobStatus::InProgress)
            .cloned()
            .collect();
        Ok(Self::sorted(jobs))
    }

    async fn list(&self, include_archived: bool) -> OrchestratorResult<Vec<Job>> {
        let jobs = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| include_archived || !job.archived)
            .cloned()
            .collect();
        Ok(Self::sorted(jobs))
    }
}
