//! # trainq-worker
//!
//! Worker角色：注册并保持心跳，轮询队列领取Job，按类型分发给处理器并回报结果。

pub mod handler;
pub mod handlers;
pub mod lifecycle;
pub mod registry;

pub use handler::{JobContext, JobHandler, JobResults};
pub use handlers::{
    builtin_registry, AggregateGradientsHandler, PrepareDataHandler, TrainBatchHandler,
};
pub use lifecycle::{WorkerLifecycle, WorkerRunSummary, WorkerSettings};
pub use registry::HandlerRegistry;
