//! 存储层接口定义
//!
//! 队列的全部共享状态都经由这里的四个仓储接口读写：
//! - `JobRepository` - Job的提交、领取与状态转换
//! - `WorkerRepository` - Worker注册、心跳与忙闲状态
//! - `TaskRepository` - 训练任务及其进度
//! - `GradientRepository` - 梯度贡献
//!
//! ## 并发约定
//!
//! 所有条件更新（领取、状态转换、取消）都必须是单条带守卫的语句，
//! 通过受影响行数判断是否成功。返回 `false` 表示守卫未命中，而不是错误。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trainq_errors::QueueResult;

use crate::models::{GradientContribution, Job, JobStatus, JsonMap, Task, TaskStatus, Worker};

/// Job仓储接口
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    /// 在同一事务中插入全部Job，任一失败则全部回滚
    async fn insert_batch(&self, jobs: &[Job]) -> QueueResult<()>;

    async fn find_by_id(&self, job_id: &str) -> QueueResult<Option<Job>>;

    /// 优先级最高、创建最早的待领取Job
    async fn find_next_pending(&self) -> QueueResult<Option<Job>>;

    /// `PENDING -> ASSIGNED` 条件更新，另一方抢先时返回 `false`
    async fn try_claim(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>)
        -> QueueResult<bool>;

    /// 仅当Job当前属于 `worker_id` 且状态在 `from` 之中时转换为 `to`。
    /// 转换为终态时 `worker_id` 被清空；`results` 为 `None` 时保留原值。
    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        job_id: &str,
        worker_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        results: Option<&JsonMap>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// `PENDING | ASSIGNED -> CANCELLED`，不论归属
    async fn cancel(&self, job_id: &str, now: DateTime<Utc>) -> QueueResult<bool>;

    /// 把仍归属 `worker_id` 的 `ASSIGNED | IN_PROGRESS` Job放回 `PENDING`
    async fn requeue(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>)
        -> QueueResult<bool>;

    async fn find_by_task(&self, task_id: &str) -> QueueResult<Vec<Job>>;

    async fn count_by_status(&self, task_id: &str) -> QueueResult<BTreeMap<JobStatus, i64>>;

    /// 归属Worker已失联（心跳早于 `stale_before` 或已下线）的进行中Job
    async fn find_stranded(&self, stale_before: DateTime<Utc>) -> QueueResult<Vec<Job>>;
}

/// Worker仓储接口
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn insert(&self, worker: &Worker) -> QueueResult<()>;

    async fn find_by_id(&self, worker_id: &str) -> QueueResult<Option<Worker>>;

    /// 刷新心跳时间，Worker不存在时返回 `false`
    async fn touch_heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<bool>;

    async fn mark_busy(&self, worker_id: &str, job_id: &str) -> QueueResult<bool>;

    /// 仅当Worker当前任务仍为 `job_id` 时置为空闲
    async fn mark_idle(&self, worker_id: &str, job_id: &str) -> QueueResult<bool>;

    async fn mark_offline(&self, worker_id: &str) -> QueueResult<bool>;

    /// 未下线且心跳晚于 `since` 的Worker
    async fn find_active_since(&self, since: DateTime<Utc>) -> QueueResult<Vec<Worker>>;
}

/// 训练任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &Task) -> QueueResult<()>;

    /// `jobs` 字段由关联的Job推导
    async fn find_by_id(&self, task_id: &str) -> QueueResult<Option<Task>>;

    /// 以读到的 `current` 为守卫写入进度：状态或进度已被他人改动时返回 `false`
    async fn update_progress(
        &self,
        current: &Task,
        progress: f64,
        status: TaskStatus,
        results: Option<&JsonMap>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool>;

    /// `pending | running -> cancelled`，任务已结束时返回 `false`
    async fn cancel(&self, task_id: &str, now: DateTime<Utc>) -> QueueResult<bool>;
}

/// 梯度仓储接口
#[async_trait]
pub trait GradientRepository: Send + Sync {
    async fn insert(&self, contribution: &GradientContribution) -> QueueResult<()>;

    async fn find_by_job_iteration(
        &self,
        job_id: &str,
        iteration: i64,
    ) -> QueueResult<Vec<GradientContribution>>;
}
