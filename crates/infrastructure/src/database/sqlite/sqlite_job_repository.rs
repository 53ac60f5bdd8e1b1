use async_trait::async_trait;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Job, JobRepository, JobStatus};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &SqliteRow) -> OrchestratorResult<Job> {
        let document: String = row.try_get("document")?;
        let version: i64 = row.try_get("version")?;

        let mut job: Job = serde_json::from_str(&document)?;
        job.version = version;
        Ok(job)
    }

    fn encode(job: &Job, version: i64) -> OrchestratorResult<String> {
        let mut stored = job.clone();
        stored.version = version;
        Ok(serde_json::to_string(&stored)?)
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create(&self, job: &Job) -> OrchestratorResult<()> {
        let document = Self::encode(job, job.version)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, archived, version, created_at_micros, updated_at_micros, document)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.archived)
        .bind(job.version)
        .bind(job.created_at.timestamp_micros())
        .bind(job.updated_at.timestamp_micros())
        .bind(document)
        .execute(&self.pool)
        .await?;

        debug!("created job {} with {} stages", job.id, job.stages.len());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<Job>> {
        let row = sqlx::query("SELECT version, document FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, version = job.version))]
    async fn update(&self, job: &Job) -> OrchestratorResult<i64> {
        let next_version = job.version + 1;
        let document = Self::encode(job, next_version)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, archived = ?, version = ?, updated_at_micros = ?, document = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.archived)
        .bind(next_version)
        .bind(job.updated_at.timestamp_micros())
        .bind(document)
        .bind(&job.id)
        .bind(job.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = ?")
                .bind(&job.id)
                .fetch_optional(&self.pool)
                .await?;

            return Err(match exists {
                Some(_) => OrchestratorError::concurrent_modification(&job.id),
                None => OrchestratorError::job_not_found(&job.id),
            });
        }

        Ok(next_version)
    }

    #[instrument(skip(self))]
    async fn list_active(&self) -> OrchestratorResult<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM jobs
            WHERE archived = 0 AND status = ?
            ORDER BY created_at_micros ASC, id ASC
            "#,
        )
        .bind(JobStatus::InProgress.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn list(&self, include_archived: bool) -> OrchestratorResult<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT version, document FROM jobs
            WHERE archived = 0 OR ?
            ORDER BY created_at_micros ASC, id ASC
            "#,
        )
        .bind(include_archived)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }
}
