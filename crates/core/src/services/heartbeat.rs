use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::WorkerRegistry;
use crate::metrics;

/// 心跳失败后的重试间隔：`max(1s, interval / 6)`，且不超过心跳间隔本身
pub fn heartbeat_retry_delay(interval: Duration) -> Duration {
    (interval / 6).max(Duration::from_secs(1)).min(interval)
}

/// 后台心跳任务
///
/// 每个心跳间隔刷新一次Worker的 `last_heartbeat`。单次失败只记录日志，
/// 之后按较短间隔重试，心跳循环本身不会因存储错误退出。
pub struct HeartbeatManager {
    worker_id: String,
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatManager {
    /// 启动心跳任务
    pub fn start(registry: WorkerRegistry, worker_id: String) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let interval = registry.heartbeat_interval();
        let retry_delay = heartbeat_retry_delay(interval);
        let task_worker_id = worker_id.clone();

        let handle = tokio::spawn(async move {
            let mut delay = interval;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        match registry.heartbeat(&task_worker_id).await {
                            Ok(()) => {
                                debug!("Worker {} 心跳已发送", task_worker_id);
                                delay = interval;
                            }
                            Err(e) => {
                                metrics::record_heartbeat_failure();
                                warn!("Worker {} 心跳失败，{:?} 后重试: {}", task_worker_id, retry_delay, e);
                                delay = retry_delay;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker {} 心跳任务退出", task_worker_id);
                        break;
                    }
                }
            }
        });

        Self {
            worker_id,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// 通知心跳任务退出并等待其结束
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Worker {} 心跳任务异常结束: {}", self.worker_id, e);
            }
        }
    }
}

impl Drop for HeartbeatManager {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
