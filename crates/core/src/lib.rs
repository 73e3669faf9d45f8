//! # trainq-core
//!
//! 分布式训练任务队列的核心：数据模型、存储接口以及构建在其上的服务。
//!
//! - [`services::JobQueue`] - Job提交与乐观并发领取
//! - [`services::WorkerRegistry`] - Worker注册、心跳与活跃判定
//! - [`services::TaskTracker`] - 训练任务进度
//! - [`services::GradientAggregator`] - 梯度按批大小加权聚合
//!
//! 存储实现位于 `trainq-infrastructure`，通过 [`QueueContext`] 注入。

pub mod container;
pub mod metrics;
pub mod models;
pub mod services;
pub mod traits;

pub use container::*;
pub use models::{
    DType, EncodedTensor, GradientContribution, Job, JobStatus, JsonMap, Task, TaskStatus, Tensor,
    Worker, WorkerRegistration, WorkerStatus,
};
pub use services::{
    GradientAggregator, HeartbeatManager, JobQueue, RegisteredWorker, TaskTracker,
    TrainingProgress, WorkerRegistry,
};
pub use trainq_errors::{QueueError, QueueResult};
