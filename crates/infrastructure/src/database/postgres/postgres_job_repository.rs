use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, instrument};
use trainq_core::models::{Job, JobStatus, JsonMap, WorkerStatus};
use trainq_core::traits::JobRepository;
use trainq_errors::{QueueError, QueueResult};

const JOB_COLUMNS: &str = "id, job_type, priority, status, parameters, results, worker_id, \
                           created_at, updated_at, error, task_id";

pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> QueueResult<Job> {
        let parameters: Json<JsonMap> = row.try_get("parameters")?;
        let results: Json<JsonMap> = row.try_get("results")?;

        Ok(Job {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            parameters: parameters.0,
            results: results.0,
            worker_id: row.try_get("worker_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            error: row.try_get("error")?,
            task_id: row.try_get("task_id")?,
        })
    }

    async fn insert_with<'e, E>(executor: E, job: &Job) -> QueueResult<()>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, priority, status, parameters, results, worker_id,
                              created_at, updated_at, error, task_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&job.id)
        .bind(&job.job_type)
        .bind(job.priority)
        .bind(job.status)
        .bind(Json(&job.parameters))
        .bind(Json(&job.results))
        .bind(&job.worker_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.error)
        .bind(&job.task_id)
        .execute(executor)
        .await
        .map_err(QueueError::Database)?;
        Ok(())
    }
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        Self::insert_with(&self.pool, job).await?;
        debug!("插入Job: {}", job.id);
        Ok(())
    }

    async fn insert_batch(&self, jobs: &[Job]) -> QueueResult<()> {
        let mut tx = self.pool.begin().await.map_err(QueueError::Database)?;
        for job in jobs {
            Self::insert_with(&mut *tx, job).await?;
        }
        tx.commit().await.map_err(QueueError::Database)?;
        debug!("批量插入 {} 个Job", jobs.len());
        Ok(())
    }

    async fn find_by_id(&self, job_id: &str) -> QueueResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueueError::Database)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn find_next_pending(&self) -> QueueResult<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 \
             ORDER BY priority DESC, created_at ASC, seq ASC LIMIT 1"
        ))
        .bind(JobStatus::Pending)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, now))]
    async fn try_claim(
        &self,
        job_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, worker_id = $2, updated_at = GREATEST(updated_at, $3)
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(JobStatus::Assigned)
        .bind(worker_id)
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Pending)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        job_id: &str,
        worker_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        results: Option<&JsonMap>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let release = if to.is_terminal() { "worker_id = NULL," } else { "" };
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = $1, {release}
                results = COALESCE($2, results),
                error = COALESCE($3, error),
                updated_at = GREATEST(updated_at, $4)
            WHERE id = $5 AND worker_id = $6 AND status = ANY($7)
            "#
        );
        let from: Vec<&str> = from.iter().map(|status| status.as_str()).collect();

        let query = sqlx::query(&sql)
            .bind(to)
            .bind(results.map(Json))
            .bind(error)
            .bind(now)
            .bind(job_id)
            .bind(worker_id)
            .bind(from);

        let result = query
            .execute(&self.pool)
            .await
            .map_err(QueueError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, job_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, worker_id = NULL, updated_at = GREATEST(updated_at, $2)
            WHERE id = $3 AND status IN ($4, $5)
            "#,
        )
        .bind(JobStatus::Cancelled)
        .bind(now)
        .bind(job_id)
        .bind(JobStatus::Pending)
        .bind(JobStatus::Assigned)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1, worker_id = NULL, updated_at = GREATEST(updated_at, $2)
            WHERE id = $3 AND worker_id = $4 AND status IN ($5, $6)
            "#,
        )
        .bind(JobStatus::Pending)
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .bind(JobStatus::Assigned)
        .bind(JobStatus::InProgress)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_task(&self, task_id: &str) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE task_id = $1 ORDER BY seq ASC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn count_by_status(&self, task_id: &str) -> QueueResult<BTreeMap<JobStatus, i64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM jobs WHERE task_id = $1 GROUP BY status",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        let mut counts = BTreeMap::new();
        for row in &rows {
            let status: JobStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    async fn find_stranded(&self, stale_before: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT j.id AS id, j.job_type AS job_type, j.priority AS priority,
                   j.status AS status, j.parameters AS parameters, j.results AS results,
                   j.worker_id AS worker_id, j.created_at AS created_at,
                   j.updated_at AS updated_at, j.error AS error, j.task_id AS task_id
            FROM jobs j
            LEFT JOIN workers w ON w.id = j.worker_id
            WHERE j.status IN ($1, $2)
              AND (w.id IS NULL OR w.status = $3 OR w.last_heartbeat <= $4)
            ORDER BY j.seq ASC
            "#,
        )
        .bind(JobStatus::Assigned)
        .bind(JobStatus::InProgress)
        .bind(WorkerStatus::Offline)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }
}
