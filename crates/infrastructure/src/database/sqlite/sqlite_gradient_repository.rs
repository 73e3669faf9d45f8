use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use trainq_core::models::{EncodedTensor, GradientContribution};
use trainq_core::traits::GradientRepository;
use trainq_errors::{QueueError, QueueResult};

pub struct SqliteGradientRepository {
    pool: SqlitePool,
}

impl SqliteGradientRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_contribution(row: &sqlx::sqlite::SqliteRow) -> QueueResult<GradientContribution> {
        let shape: String = row.try_get("shape")?;

        Ok(GradientContribution {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            worker_id: row.try_get("worker_id")?,
            layer_name: row.try_get("layer_name")?,
            iteration: row.try_get("iteration")?,
            batch_size: row.try_get("batch_size")?,
            payload: EncodedTensor {
                shape: EncodedTensor::parse_shape(&shape)?,
                dtype: row.try_get("dtype")?,
                bytes: row.try_get("data")?,
            },
            source_job_id: row.try_get("source_job_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl GradientRepository for SqliteGradientRepository {
    async fn insert(&self, contribution: &GradientContribution) -> QueueResult<()> {
        sqlx::query(
            r#"
            INSERT INTO gradients (id, job_id, worker_id, layer_name, iteration, batch_size,
                                   shape, dtype, data, source_job_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (job_id, iteration, layer_name, source_job_id) DO UPDATE
            SET id = excluded.id, worker_id = excluded.worker_id,
                batch_size = excluded.batch_size, shape = excluded.shape,
                dtype = excluded.dtype, data = excluded.data, created_at = excluded.created_at
            "#,
        )
        .bind(&contribution.id)
        .bind(&contribution.job_id)
        .bind(&contribution.worker_id)
        .bind(&contribution.layer_name)
        .bind(contribution.iteration)
        .bind(contribution.batch_size)
        .bind(contribution.payload.shape_json())
        .bind(contribution.payload.dtype)
        .bind(&contribution.payload.bytes)
        .bind(&contribution.source_job_id)
        .bind(contribution.created_at)
        .execute(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        debug!(
            "写入梯度: job={} layer={} iteration={}",
            contribution.job_id, contribution.layer_name, contribution.iteration
        );
        Ok(())
    }

    async fn find_by_job_iteration(
        &self,
        job_id: &str,
        iteration: i64,
    ) -> QueueResult<Vec<GradientContribution>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, worker_id, layer_name, iteration, batch_size, shape, dtype, data,
                   source_job_id, created_at
            FROM gradients
            WHERE job_id = $1 AND iteration = $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(job_id)
        .bind(iteration)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::Database)?;

        rows.iter().map(Self::row_to_contribution).collect()
    }
}
