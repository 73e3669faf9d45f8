use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use trainq_errors::{QueueError, QueueResult};

use super::{to_chrono, HeartbeatManager};
use crate::metrics;
use crate::models::{Worker, WorkerRegistration};
use crate::traits::WorkerRepository;

/// 默认心跳间隔
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// 心跳超过 `间隔 × 该倍数` 未更新即视为失联
pub const STALENESS_MULTIPLIER: u32 = 3;

/// Worker注册表
#[derive(Clone)]
pub struct WorkerRegistry {
    workers: Arc<dyn WorkerRepository>,
    heartbeat_interval: Duration,
}

impl WorkerRegistry {
    pub fn new(workers: Arc<dyn WorkerRepository>, heartbeat_interval: Duration) -> Self {
        Self {
            workers,
            heartbeat_interval,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn staleness_window(&self) -> Duration {
        self.heartbeat_interval * STALENESS_MULTIPLIER
    }

    /// 注册Worker并启动后台心跳
    ///
    /// 每次注册都会分配新的标识；返回的句柄负责停止心跳并将Worker标记为下线。
    #[instrument(skip(self, registration), fields(hostname = %registration.hostname))]
    pub async fn register_worker(
        &self,
        registration: WorkerRegistration,
    ) -> QueueResult<RegisteredWorker> {
        let worker = Worker::new(registration);
        self.workers.insert(&worker).await?;
        info!("Worker {} 已注册 ({})", worker.id, worker.hostname);

        let heartbeat = HeartbeatManager::start(self.clone(), worker.id.clone());
        Ok(RegisteredWorker {
            worker,
            heartbeat,
            registry: self.clone(),
        })
    }

    /// 刷新一次心跳
    pub async fn heartbeat(&self, worker_id: &str) -> QueueResult<()> {
        if self.workers.touch_heartbeat(worker_id, Utc::now()).await? {
            Ok(())
        } else {
            Err(QueueError::worker_not_found(worker_id))
        }
    }

    /// 未下线且心跳在失联窗口内的Worker
    pub async fn get_active_workers(&self) -> QueueResult<Vec<Worker>> {
        let since = Utc::now() - to_chrono(self.staleness_window())?;
        let workers = self.workers.find_active_since(since).await?;
        metrics::set_active_workers(workers.len());
        Ok(workers)
    }

    pub async fn get_worker(&self, worker_id: &str) -> QueueResult<Option<Worker>> {
        self.workers.find_by_id(worker_id).await
    }

    pub async fn mark_offline(&self, worker_id: &str) -> QueueResult<bool> {
        self.workers.mark_offline(worker_id).await
    }

    /// 最近一次心跳早于 `now - 3H` 即视为失联
    pub fn is_stale(&self, last_heartbeat: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match to_chrono(self.staleness_window()) {
            Ok(window) => last_heartbeat <= now - window,
            Err(_) => false,
        }
    }
}

/// 已注册的Worker及其心跳任务
pub struct RegisteredWorker {
    worker: Worker,
    heartbeat: HeartbeatManager,
    registry: WorkerRegistry,
}

impl RegisteredWorker {
    pub fn worker_id(&self) -> &str {
        &self.worker.id
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn is_heartbeating(&self) -> bool {
        self.heartbeat.is_running()
    }

    /// 停止心跳、等待心跳任务退出并标记下线
    pub async fn shutdown(mut self) -> QueueResult<()> {
        self.heartbeat.stop().await;
        if !self.registry.mark_offline(&self.worker.id).await? {
            warn!("下线时未找到Worker {}", self.worker.id);
        }
        info!("Worker {} 已下线", self.worker.id);
        Ok(())
    }
}
