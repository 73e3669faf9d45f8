use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use trainq_config::WorkerConfig;
use trainq_core::metrics;
use trainq_core::{
    Job, JobQueue, JobStatus, QueueContext, QueueError, QueueResult, RegisteredWorker,
    TaskTracker, WorkerRegistration,
};

use crate::handler::{JobContext, JobResults};
use crate::registry::HandlerRegistry;

/// 轮询间隔的抖动比例
const POLL_JITTER: f64 = 0.2;

/// 终态回报的最大尝试次数
const REPORT_ATTEMPTS: u32 = 5;
const MIN_REPORT_BACKOFF: Duration = Duration::from_millis(50);
const MAX_REPORT_BACKOFF: Duration = Duration::from_secs(5);

/// Worker运行参数
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub registration: WorkerRegistration,
    pub poll_interval: Duration,
    pub output_dir: PathBuf,
}

impl WorkerSettings {
    /// 由配置生成，补充本机主机名、CPU数量与加速器能力
    pub fn from_config(config: &WorkerConfig, output_dir: impl Into<PathBuf>) -> Self {
        let hostname = config.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string())
        });

        let mut capabilities = config.capabilities.clone();
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        capabilities.insert("cpu_count".to_string(), json!(cpu_count));
        capabilities.insert("accelerator".to_string(), json!(config.accelerator));

        Self {
            registration: WorkerRegistration {
                hostname,
                address: config.address.clone(),
                capabilities,
            },
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            output_dir: output_dir.into(),
        }
    }
}

/// 一次运行的处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerRunSummary {
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Failed,
    Skipped,
}

/// 在基础间隔上叠加 ±20% 的随机抖动，避免多个Worker同时轮询
pub fn poll_delay(base: Duration) -> Duration {
    let factor = rand::rng().random_range(-POLL_JITTER..=POLL_JITTER);
    base.mul_f64(1.0 + factor)
}

/// 终态回报重试的起始间隔：轮询间隔，限制在 [50ms, 5s]
pub fn report_retry_delay(poll_interval: Duration) -> Duration {
    poll_interval.clamp(MIN_REPORT_BACKOFF, MAX_REPORT_BACKOFF)
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Worker生命周期：注册、轮询领取、分发执行、回报结果、下线
pub struct WorkerLifecycle {
    queue: JobQueue,
    tracker: TaskTracker,
    context: QueueContext,
    handlers: Arc<HandlerRegistry>,
    settings: WorkerSettings,
    registered: Option<RegisteredWorker>,
}

impl WorkerLifecycle {
    pub fn new(context: QueueContext, handlers: HandlerRegistry, settings: WorkerSettings) -> Self {
        Self {
            queue: context.job_queue(),
            tracker: context.task_tracker(),
            context,
            handlers: Arc::new(handlers),
            settings,
            registered: None,
        }
    }

    pub fn worker_id(&self) -> Option<&str> {
        self.registered.as_ref().map(|r| r.worker_id())
    }

    /// 注册Worker并开始心跳，重复调用返回已有标识
    pub async fn start(&mut self) -> QueueResult<String> {
        if let Some(registered) = &self.registered {
            return Ok(registered.worker_id().to_string());
        }

        let registered = self
            .context
            .worker_registry()
            .register_worker(self.settings.registration.clone())
            .await?;
        let worker_id = registered.worker_id().to_string();
        info!(
            "Worker {} 已启动，支持的Job类型: {:?}",
            worker_id,
            self.handlers.job_types()
        );
        self.registered = Some(registered);
        Ok(worker_id)
    }

    /// 轮询执行直到处理满 `max_jobs` 个Job或收到关闭信号，随后下线
    ///
    /// 关闭信号只在两个Job之间检查，正在执行的Job会先完成。
    pub async fn run(
        &mut self,
        max_jobs: Option<u64>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> QueueResult<WorkerRunSummary> {
        let worker_id = self.start().await?;
        let mut summary = WorkerRunSummary::default();
        let mut fatal = None;

        loop {
            if max_jobs.is_some_and(|max| summary.processed >= max) {
                info!("Worker {} 已处理 {} 个Job，达到上限", worker_id, summary.processed);
                break;
            }
            if shutdown_requested(&mut shutdown) {
                info!("Worker {} 收到关闭信号", worker_id);
                break;
            }

            match self.queue.get_next_job(&worker_id).await {
                Ok(Some(job)) => match self.process(&worker_id, job).await {
                    Ok(outcome) => {
                        summary.processed += 1;
                        match outcome {
                            JobOutcome::Completed => summary.completed += 1,
                            JobOutcome::Failed => summary.failed += 1,
                            JobOutcome::Skipped => summary.skipped += 1,
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!("Worker {} 遇到不可恢复的错误: {}", worker_id, e);
                        fatal = Some(e);
                        break;
                    }
                    Err(e) => {
                        error!("Worker {} 处理Job失败: {}", worker_id, e);
                        if self.idle(&mut shutdown).await {
                            break;
                        }
                    }
                },
                Ok(None) => {
                    if self.idle(&mut shutdown).await {
                        info!("Worker {} 收到关闭信号", worker_id);
                        break;
                    }
                }
                Err(e) => {
                    error!("Worker {} 轮询队列失败: {}", worker_id, e);
                    if self.idle(&mut shutdown).await {
                        break;
                    }
                }
            }
        }

        if let Some(registered) = self.registered.take() {
            registered.shutdown().await?;
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        info!("Worker {} 退出: {:?}", worker_id, summary);
        Ok(summary)
    }

    /// 等待一个轮询周期，期间收到关闭信号返回 `true`
    async fn idle(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = sleep(poll_delay(self.settings.poll_interval)) => false,
            _ = shutdown.recv() => true,
        }
    }

    async fn process(&self, worker_id: &str, job: Job) -> QueueResult<JobOutcome> {
        let started = self
            .queue
            .update_job_status(&job.id, worker_id, JobStatus::InProgress, None, None)
            .await?;
        if !started {
            warn!("Job {} 已被取消，跳过", job.id);
            self.queue.release_worker(worker_id, &job.id).await?;
            return Ok(JobOutcome::Skipped);
        }

        let job_id = job.id.clone();
        let task_id = job.task_id.clone();
        let job_type = job.job_type.clone();

        let timer = Instant::now();
        let result = self.dispatch(worker_id, job).await;
        metrics::record_handler_duration(&job_type, timer.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(results) => {
                self.report(worker_id, &job_id, JobStatus::Completed, Some(results), None)
                    .await?;
                debug!("Job {} 完成", job_id);
                JobOutcome::Completed
            }
            Err(e) => {
                warn!("Job {} ({}) 执行失败: {}", job_id, job_type, e);
                self.report(worker_id, &job_id, JobStatus::Failed, None, Some(e.to_string()))
                    .await?;
                JobOutcome::Failed
            }
        };

        if let Some(task_id) = task_id {
            if let Err(e) = self.tracker.recompute_progress(&task_id).await {
                warn!("重新计算训练任务 {} 进度失败: {}", task_id, e);
            }
        }
        Ok(outcome)
    }

    /// 回报终态，存储暂时不可用时按退避间隔重试
    ///
    /// 终态写入失败的Job仍归属心跳正常的Worker，失联回收不会释放它。
    async fn report(
        &self,
        worker_id: &str,
        job_id: &str,
        status: JobStatus,
        results: Option<JobResults>,
        error: Option<String>,
    ) -> QueueResult<bool> {
        let mut delay = report_retry_delay(self.settings.poll_interval);
        let mut attempt = 1;
        loop {
            match self
                .queue
                .update_job_status(job_id, worker_id, status, results.clone(), error.clone())
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_retryable() && attempt < REPORT_ATTEMPTS => {
                    warn!(
                        "回报Job {} 状态 {} 失败 (第 {} 次)，{:?} 后重试: {}",
                        job_id, status, attempt, delay, e
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_REPORT_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    error!("放弃回报Job {} 状态 {}: {}", job_id, status, e);
                    return Err(e);
                }
            }
        }
    }

    /// 在独立任务中执行处理器，处理器panic转为失败结果
    async fn dispatch(&self, worker_id: &str, job: Job) -> QueueResult<JobResults> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            return Err(QueueError::handler_failed(format!(
                "不支持的Job类型: {}",
                job.job_type
            )));
        };

        let ctx = JobContext {
            worker_id: worker_id.to_string(),
            output_dir: self.settings.output_dir.clone(),
            gradients: self.context.gradient_aggregator().for_source_job(&job.id),
        };

        match tokio::spawn(async move { handler.handle(&ctx, &job).await }).await {
            Ok(result) => result,
            Err(e) => Err(QueueError::handler_failed(format!("处理器异常退出: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_delay_within_jitter() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let delay = poll_delay(base);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
        assert_eq!(poll_delay(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_settings_from_config() {
        let config = WorkerConfig {
            hostname: Some("gpu-01".to_string()),
            accelerator: true,
            poll_interval_ms: 250,
            ..WorkerConfig::default()
        };
        let settings = WorkerSettings::from_config(&config, "/tmp/out");

        assert_eq!(settings.registration.hostname, "gpu-01");
        assert_eq!(settings.registration.capabilities["accelerator"], json!(true));
        assert!(settings.registration.capabilities["cpu_count"].as_u64().unwrap() >= 1);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_report_retry_delay_bounds() {
        assert_eq!(report_retry_delay(Duration::from_millis(10)), Duration::from_millis(50));
        assert_eq!(report_retry_delay(Duration::from_millis(500)), Duration::from_millis(500));
        assert_eq!(report_retry_delay(Duration::from_secs(60)), Duration::from_secs(5));
    }

    #[test]
    fn test_shutdown_detection() {
        let (tx, mut rx) = broadcast::channel(1);
        assert!(!shutdown_requested(&mut rx));
        tx.send(()).unwrap();
        assert!(shutdown_requested(&mut rx));
    }
}
