use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;
use trainq_config::DatabaseConfig;
use trainq_core::traits::{GradientRepository, JobRepository, TaskRepository, WorkerRepository};
use trainq_core::QueueContext;
use trainq_errors::{QueueError, QueueResult};

use super::postgres::{
    PostgresGradientRepository, PostgresJobRepository, PostgresTaskRepository,
    PostgresWorkerRepository,
};
use super::schema::{POSTGRES_SCHEMA, SQLITE_SCHEMA};
use super::sqlite::{
    SqliteGradientRepository, SqliteJobRepository, SqliteTaskRepository, SqliteWorkerRepository,
};

/// 按URL协议识别的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> QueueResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DatabaseType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseType::SQLite)
        } else {
            Err(QueueError::config_error(format!(
                "不支持的存储URL: {url}（仅支持 sqlite: 与 postgres://）"
            )))
        }
    }
}

pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    pub async fn connect(config: &DatabaseConfig) -> QueueResult<Self> {
        let acquire_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let idle_timeout = Duration::from_secs(config.idle_timeout_seconds);

        match DatabaseType::from_url(&config.url)? {
            DatabaseType::PostgreSQL => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(QueueError::Database)?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&config.url)
                    .map_err(QueueError::Database)?
                    .create_if_missing(true)
                    .busy_timeout(acquire_timeout);

                // 内存库只存在于单个连接内，连接不能被回收
                let pool_options = if config.is_in_memory() {
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    SqlitePoolOptions::new()
                        .max_connections(config.max_connections)
                        .min_connections(config.min_connections)
                        .idle_timeout(idle_timeout)
                };

                let pool = pool_options
                    .acquire_timeout(acquire_timeout)
                    .connect_with(options)
                    .await
                    .map_err(QueueError::Database)?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// 存储连接与仓储工厂
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    /// 连接存储并建表
    pub async fn connect(config: &DatabaseConfig) -> QueueResult<Self> {
        let pool = DatabasePool::connect(config).await?;
        let manager = Self { pool };
        manager.migrate().await?;
        info!("已连接 {:?} 存储", manager.database_type());
        Ok(manager)
    }

    /// 单连接的内存SQLite，用于测试与单进程运行
    pub async fn in_memory() -> QueueResult<Self> {
        Self::connect(&DatabaseConfig::in_memory()).await
    }

    pub fn from_pool(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    /// 幂等建表
    pub async fn migrate(&self) -> QueueResult<()> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                for statement in POSTGRES_SCHEMA {
                    sqlx::query(statement)
                        .execute(pool)
                        .await
                        .map_err(QueueError::Database)?;
                }
            }
            DatabasePool::SQLite(pool) => {
                for statement in SQLITE_SCHEMA {
                    sqlx::query(statement)
                        .execute(pool)
                        .await
                        .map_err(QueueError::Database)?;
                }
            }
        }
        Ok(())
    }

    pub async fn health_check(&self) -> QueueResult<()> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(QueueError::Database)?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(QueueError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn job_repository(&self) -> Arc<dyn JobRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresJobRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteJobRepository::new(pool.clone())),
        }
    }

    pub fn worker_repository(&self) -> Arc<dyn WorkerRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresWorkerRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteWorkerRepository::new(pool.clone())),
        }
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => Arc::new(PostgresTaskRepository::new(pool.clone())),
            DatabasePool::SQLite(pool) => Arc::new(SqliteTaskRepository::new(pool.clone())),
        }
    }

    pub fn gradient_repository(&self) -> Arc<dyn GradientRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresGradientRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteGradientRepository::new(pool.clone())),
        }
    }

    /// 用本存储的全部仓储构建队列上下文
    pub fn queue_context(&self, heartbeat_interval: Duration) -> QueueResult<QueueContext> {
        QueueContext::builder()
            .job_repository(self.job_repository())
            .worker_repository(self.worker_repository())
            .task_repository(self.task_repository())
            .gradient_repository(self.gradient_repository())
            .heartbeat_interval(heartbeat_interval)
            .build()
    }
}
