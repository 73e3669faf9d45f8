//! 队列服务层
//!
//! 每个服务只持有所需仓储的 `Arc<dyn ...>` 句柄，可自由克隆并在任务间共享。

pub mod gradient_aggregator;
pub mod heartbeat;
pub mod job_queue;
pub mod task_tracker;
pub mod worker_registry;

pub use gradient_aggregator::*;
pub use heartbeat::*;
pub use job_queue::*;
pub use task_tracker::*;
pub use worker_registry::*;

use trainq_errors::{QueueError, QueueResult};

pub(crate) fn to_chrono(duration: std::time::Duration) -> QueueResult<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| QueueError::validation(format!("时间间隔超出范围: {e}")))
}
