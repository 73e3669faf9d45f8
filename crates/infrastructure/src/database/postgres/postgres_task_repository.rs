use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use trainq_core::models::{JsonMap, Task, TaskStatus};
use trainq_core::traits::TaskRepository;
use trainq_errors::{QueueError, QueueResult};

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow, jobs: Vec<String>) -> QueueResult<Task> {
        let hyperparameters: Json<JsonMap> = row.try_get("hyperparameters")?;
        let results: Json<JsonMap> = row.try_get("results")?;

        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            dataset_id: row.try_get("dataset_id")?,
            model_type: row.try_get("model_type")?,
            hyperparameters: hyperparameters.0,
            status: row.try_get("status")?,
            jobs,
            progress: row.try_get("progress")?,
            results: results.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn insert(&self, task: &Task) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_type, dataset_id, model_type, hyperparameters, status,
                               progress, results, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&task.id)
        .bind(&task.task_type)
        .bind(&task.dataset_id)
        .bind(&task.model_type)
        .bind(Json(&task.hyperparameters))
        .bind(task.status)
        .bind(task.progress)
        .bind(Json(&task.results))
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        debug!("创建训练任务记录: {}", task.id);
        Ok(())
    }

    async fn find_by_id(&self, task_id: &str) -> QueueResult<Option<Task>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, task_type, dataset_id, model_type, hyperparameters, status, progress,
                   results, created_at, updated_at
            FROM tasks WHERE id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::Database)?
        else {
            return Ok(None);
        };

        let jobs: Vec<String> =
            sqlx::query_scalar("SELECT id FROM jobs WHERE task_id = $1 ORDER BY seq ASC")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await
                .map_err(QueueError::Database)?;

        Self::row_to_task(&row, jobs).map(Some)
    }

    async fn update_progress(
        &self,
        current: &Task,
        progress: f64,
        status: TaskStatus,
        results: Option<&JsonMap>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET progress = $1, status = $2, results = COALESCE($3, results),
                updated_at = GREATEST(updated_at, $4)
            WHERE id = $5 AND status = $6 AND progress = $7
            "#,
        )
        .bind(progress)
        .bind(status)
        .bind(results.map(Json))
        .bind(now)
        .bind(&current.id)
        .bind(current.status)
        .bind(current.progress)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, task_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET status = $1, updated_at = GREATEST(updated_at, $2)
            WHERE id = $3 AND status IN ('pending', 'running')
            "#,
        )
        .bind(TaskStatus::Cancelled)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        Ok(result.rows_affected() == 1)
    }
}
