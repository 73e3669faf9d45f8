//! 建表语句，启动时幂等执行
//!
//! `jobs.seq` 是自增序号，用于同优先级、同创建时间下的稳定排序，
//! 也决定 `Task.jobs` 的顺序。

pub const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        job_type TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        parameters TEXT NOT NULL DEFAULT '{}',
        results TEXT NOT NULL DEFAULT '{}',
        worker_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        error TEXT,
        task_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs (status, priority DESC, created_at, seq)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_task ON jobs (task_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_worker ON jobs (worker_id)",
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id TEXT PRIMARY KEY,
        hostname TEXT NOT NULL,
        address TEXT NOT NULL,
        status TEXT NOT NULL,
        capabilities TEXT NOT NULL DEFAULT '{}',
        current_job_id TEXT,
        last_heartbeat TEXT NOT NULL,
        registered_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workers_heartbeat ON workers (last_heartbeat)",
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        task_type TEXT NOT NULL,
        dataset_id TEXT NOT NULL,
        model_type TEXT NOT NULL,
        hyperparameters TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        progress REAL NOT NULL DEFAULT 0,
        results TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gradients (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        worker_id TEXT NOT NULL,
        layer_name TEXT NOT NULL,
        iteration INTEGER NOT NULL,
        batch_size INTEGER NOT NULL,
        shape TEXT NOT NULL,
        dtype TEXT NOT NULL,
        data BLOB NOT NULL,
        source_job_id TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_gradients_job_iteration ON gradients (job_id, iteration)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_gradients_source ON gradients (job_id, iteration, layer_name, source_job_id)",
];

pub const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        seq BIGSERIAL PRIMARY KEY,
        id TEXT NOT NULL UNIQUE,
        job_type TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        parameters JSONB NOT NULL DEFAULT '{}'::jsonb,
        results JSONB NOT NULL DEFAULT '{}'::jsonb,
        worker_id TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        error TEXT,
        task_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs (status, priority DESC, created_at, seq)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_task ON jobs (task_id, seq)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_worker ON jobs (worker_id)",
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id TEXT PRIMARY KEY,
        hostname TEXT NOT NULL,
        address TEXT NOT NULL,
        status TEXT NOT NULL,
        capabilities JSONB NOT NULL DEFAULT '{}'::jsonb,
        current_job_id TEXT,
        last_heartbeat TIMESTAMPTZ NOT NULL,
        registered_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_workers_heartbeat ON workers (last_heartbeat)",
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        task_type TEXT NOT NULL,
        dataset_id TEXT NOT NULL,
        model_type TEXT NOT NULL,
        hyperparameters JSONB NOT NULL DEFAULT '{}'::jsonb,
        status TEXT NOT NULL,
        progress DOUBLE PRECISION NOT NULL DEFAULT 0,
        results JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gradients (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL,
        worker_id TEXT NOT NULL,
        layer_name TEXT NOT NULL,
        iteration BIGINT NOT NULL,
        batch_size BIGINT NOT NULL,
        shape TEXT NOT NULL,
        dtype TEXT NOT NULL,
        data BYTEA NOT NULL,
        source_job_id TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_gradients_job_iteration ON gradients (job_id, iteration)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_gradients_source ON gradients (job_id, iteration, layer_name, source_job_id)",
];

/// 生成 `$start, $start+1, ...` 形式的占位符列表
pub fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ")
}
