use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use trainq_core::models::{JsonMap, Worker, WorkerStatus};
use trainq_core::traits::WorkerRepository;
use trainq_errors::{QueueError, QueueResult};

const WORKER_COLUMNS: &str =
    "id, hostname, address, status, capabilities, current_job_id, last_heartbeat, registered_at";

pub struct SqliteWorkerRepository {
    pool: SqlitePool,
}

impl SqliteWorkerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &sqlx::sqlite::SqliteRow) -> QueueResult<Worker> {
        let capabilities: Json<JsonMap> = row.try_get("capabilities")?;

        Ok(Worker {
            id: row.try_get("id")?,
            hostname: row.try_get("hostname")?,
            address: row.try_get("address")?,
            status: row.try_get("status")?,
            capabilities: capabilities.0,
            current_job_id: row.try_get("current_job_id")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerRepository {
    async fn insert(&self, worker: &Worker) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, hostname, address, status, capabilities, current_job_id,
                                 last_heartbeat, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&worker.id)
        .bind(&worker.hostname)
        .bind(&worker.address)
        .bind(worker.status)
        .bind(Json(&worker.capabilities))
        .bind(&worker.current_job_id)
        .bind(worker.last_heartbeat)
        .bind(worker.registered_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        debug!("注册Worker成功: {}", worker.id);
        Ok(())
    }

    async fn find_by_id(&self, worker_id: &str) -> QueueResult<Option<Worker>> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1"))
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueueError::Database)?;

        row.as_ref().map(Self::row_to_worker).transpose()
    }

    async fn touch_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE workers SET last_heartbeat = MAX(last_heartbeat, $1) WHERE id = $2",
        )
        .bind(now)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_busy(&self, worker_id: &str, job_id: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            "UPDATE workers SET status = $1, current_job_id = $2 WHERE id = $3 AND status != $4",
        )
        .bind(WorkerStatus::Busy)
        .bind(job_id)
        .bind(worker_id)
        .bind(WorkerStatus::Offline)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_idle(&self, worker_id: &str, job_id: &str) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workers SET status = $1, current_job_id = NULL
            WHERE id = $2 AND current_job_id = $3 AND status != $4
            "#,
        )
        .bind(WorkerStatus::Idle)
        .bind(worker_id)
        .bind(job_id)
        .bind(WorkerStatus::Offline)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_offline(&self, worker_id: &str) -> QueueResult<bool> {
        let result =
            sqlx::query("UPDATE workers SET status = $1, current_job_id = NULL WHERE id = $2")
                .bind(WorkerStatus::Offline)
                .bind(worker_id)
                .execute(&self.pool)
                .await
                .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_active_since(&self, since: DateTime<Utc>) -> QueueResult<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers \
             WHERE status != $1 AND last_heartbeat > $2 ORDER BY registered_at ASC"
        ))
        .bind(WorkerStatus::Offline)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter().map(Self::row_to_worker).collect()
    }
}
