use std::sync::Arc;
use std::time::Duration;

use trainq_errors::{QueueError, QueueResult};

use crate::services::{
    GradientAggregator, JobQueue, TaskTracker, WorkerRegistry, DEFAULT_HEARTBEAT_INTERVAL,
};
use crate::traits::{GradientRepository, JobRepository, TaskRepository, WorkerRepository};

/// 队列上下文
///
/// 持有存储句柄与心跳配置，由进程入口构造一次后向下传递；
/// 各服务均从这里派生，彼此共享同一组仓储。
#[derive(Clone)]
pub struct QueueContext {
    jobs: Arc<dyn JobRepository>,
    workers: Arc<dyn WorkerRepository>,
    tasks: Arc<dyn TaskRepository>,
    gradients: Arc<dyn GradientRepository>,
    heartbeat_interval: Duration,
}

impl QueueContext {
    pub fn builder() -> QueueContextBuilder {
        QueueContextBuilder::default()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn job_queue(&self) -> JobQueue {
        JobQueue::new(self.jobs.clone(), self.workers.clone())
    }

    pub fn worker_registry(&self) -> WorkerRegistry {
        WorkerRegistry::new(self.workers.clone(), self.heartbeat_interval)
    }

    pub fn task_tracker(&self) -> TaskTracker {
        TaskTracker::new(self.tasks.clone(), self.job_queue(), self.worker_registry())
    }

    pub fn gradient_aggregator(&self) -> GradientAggregator {
        GradientAggregator::new(self.gradients.clone())
    }
}

/// 逐个注册仓储后构建 [`QueueContext`]
#[derive(Default)]
pub struct QueueContextBuilder {
    jobs: Option<Arc<dyn JobRepository>>,
    workers: Option<Arc<dyn WorkerRepository>>,
    tasks: Option<Arc<dyn TaskRepository>>,
    gradients: Option<Arc<dyn GradientRepository>>,
    heartbeat_interval: Option<Duration>,
}

impl QueueContextBuilder {
    pub fn job_repository(mut self, repository: Arc<dyn JobRepository>) -> Self {
        self.jobs = Some(repository);
        self
    }

    pub fn worker_repository(mut self, repository: Arc<dyn WorkerRepository>) -> Self {
        self.workers = Some(repository);
        self
    }

    pub fn task_repository(mut self, repository: Arc<dyn TaskRepository>) -> Self {
        self.tasks = Some(repository);
        self
    }

    pub fn gradient_repository(mut self, repository: Arc<dyn GradientRepository>) -> Self {
        self.gradients = Some(repository);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn build(self) -> QueueResult<QueueContext> {
        let heartbeat_interval = self.heartbeat_interval.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        if heartbeat_interval.is_zero() {
            return Err(QueueError::config_error("心跳间隔必须大于0"));
        }
        Ok(QueueContext {
            jobs: self
                .jobs
                .ok_or_else(|| QueueError::Internal("Job仓储未注册".to_string()))?,
            workers: self
                .workers
                .ok_or_else(|| QueueError::Internal("Worker仓储未注册".to_string()))?,
            tasks: self
                .tasks
                .ok_or_else(|| QueueError::Internal("任务仓储未注册".to_string()))?,
            gradients: self
                .gradients
                .ok_or_else(|| QueueError::Internal("梯度仓储未注册".to_string()))?,
            heartbeat_interval,
        })
    }
}
