use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use trainq_config::{ConfigValidator, CoordinatorConfig, TrainingPlan};
use trainq_core::{
    GradientAggregator, JobQueue, JobStatus, JsonMap, QueueContext, QueueError, QueueResult,
    TaskTracker, Tensor, TrainingProgress, WorkerRegistry,
};

use crate::report::TrainingReport;

pub const PREPARE_DATA: &str = "prepare_data";
pub const TRAIN_BATCH: &str = "train_batch";

/// Coordinator运行参数
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub poll_interval: Duration,
    pub job_recovery_enabled: bool,
    pub output_dir: PathBuf,
}

impl CoordinatorSettings {
    pub fn from_config(config: &CoordinatorConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            job_recovery_enabled: config.job_recovery_enabled,
            output_dir: output_dir.into(),
        }
    }
}

/// 训练任务的发起与跟踪
pub struct Coordinator {
    queue: JobQueue,
    tracker: TaskTracker,
    registry: WorkerRegistry,
    gradients: GradientAggregator,
    settings: CoordinatorSettings,
}

impl Coordinator {
    pub fn new(context: QueueContext, settings: CoordinatorSettings) -> Self {
        Self {
            queue: context.job_queue(),
            tracker: context.task_tracker(),
            registry: context.worker_registry(),
            gradients: context.gradient_aggregator(),
            settings,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub async fn create_task(
        &self,
        task_type: &str,
        dataset_id: &str,
        model_type: &str,
        hyperparameters: JsonMap,
    ) -> QueueResult<String> {
        self.tracker
            .create_task(task_type, dataset_id, model_type, hyperparameters)
            .await
    }

    pub async fn submit_job(
        &self,
        job_type: &str,
        parameters: JsonMap,
        priority: i32,
        task_id: Option<&str>,
    ) -> QueueResult<String> {
        self.queue
            .submit_job(job_type, parameters, priority, task_id)
            .await
    }

    pub async fn submit_batch_jobs(
        &self,
        job_type: &str,
        common: &JsonMap,
        batch: Vec<JsonMap>,
        priority: i32,
        task_id: Option<&str>,
    ) -> QueueResult<Vec<String>> {
        self.queue
            .submit_batch_jobs(job_type, common, batch, priority, task_id)
            .await
    }

    /// 创建任务并按计划提交全部Job，返回任务标识
    ///
    /// 数据准备优先级最高，之后的epoch依次降低，保证领取顺序与训练顺序一致。
    #[instrument(skip(self, plan), fields(model = %plan.model_type, epochs = plan.epochs))]
    pub async fn launch_training(&self, plan: &TrainingPlan) -> QueueResult<String> {
        plan.validate()
            .map_err(|e| QueueError::validation(format!("训练计划无效: {e}")))?;
        let epochs = i32::try_from(plan.epochs)
            .map_err(|_| QueueError::validation(format!("epochs 过大: {}", plan.epochs)))?;

        let task_id = self
            .create_task(
                &plan.task_type,
                &plan.dataset_id,
                &plan.model_type,
                plan.hyperparameters.clone(),
            )
            .await?;

        let samples_per_shard =
            (plan.batch_size as u64 * plan.batches_per_epoch as u64).div_ceil(plan.data_shards as u64);
        let mut prepare_common = JsonMap::new();
        prepare_common.insert("dataset_id".to_string(), json!(plan.dataset_id));
        prepare_common.insert("data_shards".to_string(), json!(plan.data_shards));
        prepare_common.insert("samples".to_string(), json!(samples_per_shard));
        let shards = (0..plan.data_shards)
            .map(|shard| JsonMap::from([("shard".to_string(), json!(shard))]))
            .collect();
        self.submit_batch_jobs(PREPARE_DATA, &prepare_common, shards, epochs + 1, Some(&task_id))
            .await?;

        for epoch in 0..epochs {
            let mut common = JsonMap::new();
            common.insert("hyperparameters".to_string(), json!(plan.hyperparameters));
            common.insert("layers".to_string(), json!(plan.layers));
            common.insert("gradient_job_id".to_string(), json!(task_id));
            common.insert("batch_size".to_string(), json!(plan.batch_size));
            common.insert("gradient_size".to_string(), json!(plan.gradient_size));
            common.insert("iteration".to_string(), json!(epoch));
            common.insert("epoch".to_string(), json!(epoch));

            let batches = (0..plan.batches_per_epoch)
                .map(|batch| {
                    JsonMap::from([
                        ("batch".to_string(), json!(batch)),
                        ("shard".to_string(), json!(batch % plan.data_shards)),
                    ])
                })
                .collect();
            self.submit_batch_jobs(TRAIN_BATCH, &common, batches, epochs - epoch, Some(&task_id))
                .await?;
        }

        info!(
            "训练任务 {} 已提交 {} 个Job ({} 个epoch)",
            task_id,
            plan.total_jobs(),
            plan.epochs
        );
        Ok(task_id)
    }

    pub async fn monitor(&self, task_id: &str) -> QueueResult<TrainingProgress> {
        self.tracker.monitor_training_progress(task_id).await
    }

    /// 一轮跟踪：可选回收失联Worker的Job，再重新计算进度
    pub async fn refresh(&self, task_id: &str) -> QueueResult<TrainingProgress> {
        if self.settings.job_recovery_enabled {
            let recovered = self
                .queue
                .recover_stranded_jobs(self.registry.staleness_window())
                .await?;
            if !recovered.is_empty() {
                warn!("回收了 {} 个失联Worker的Job", recovered.len());
            }
        }
        self.tracker.recompute_progress(task_id).await?;
        self.monitor(task_id).await
    }

    /// 周期性跟踪直到任务完成、被取消或收到关闭信号
    pub async fn wait_for_task(
        &self,
        task_id: &str,
        mut shutdown: broadcast::Receiver<()>,
    ) -> QueueResult<TrainingProgress> {
        loop {
            let view = match self.refresh(task_id).await {
                Ok(view) => view,
                Err(e) if e.is_retryable() => {
                    warn!("跟踪训练任务 {} 失败，稍后重试: {}", task_id, e);
                    if Self::pause(self.settings.poll_interval, &mut shutdown).await {
                        return self.monitor(task_id).await;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            info!(
                "训练任务 {}: 进度 {:.1}% ({}/{} 个Job结束，{} 个活跃Worker)",
                task_id,
                view.progress * 100.0,
                view.terminal_jobs(),
                view.total_jobs(),
                view.active_worker_count
            );

            if view.task.status.is_finished() {
                return Ok(view);
            }
            if Self::pause(self.settings.poll_interval, &mut shutdown).await {
                info!("停止跟踪训练任务 {}", task_id);
                return Ok(view);
            }
        }
    }

    async fn pause(interval: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = sleep(interval) => false,
            _ = shutdown.recv() => true,
        }
    }

    pub async fn aggregate_iteration(
        &self,
        gradient_job_id: &str,
        iteration: i64,
    ) -> QueueResult<BTreeMap<String, Tensor>> {
        self.gradients
            .get_aggregated_gradients(gradient_job_id, iteration)
            .await
    }

    /// 取消任务以及其下尚未开始的Job，返回被取消的Job数
    pub async fn cancel_task(&self, task_id: &str) -> QueueResult<usize> {
        self.tracker.mark_cancelled(task_id).await?;

        let mut cancelled = 0;
        for job in self.queue.get_task_jobs(task_id).await? {
            if matches!(job.status, JobStatus::Pending | JobStatus::Assigned)
                && self.queue.cancel_job(&job.id).await?
            {
                cancelled += 1;
            }
        }
        info!("训练任务 {} 已取消 {} 个Job", task_id, cancelled);
        Ok(cancelled)
    }

    /// 汇总进度视图与 `iterations` 轮的聚合梯度
    pub async fn build_report(&self, task_id: &str, iterations: i64) -> QueueResult<TrainingReport> {
        let progress = self.monitor(task_id).await?;
        let mut gradients = BTreeMap::new();
        for iteration in 0..iterations {
            let layers = self.aggregate_iteration(task_id, iteration).await?;
            if !layers.is_empty() {
                gradients.insert(iteration, layers);
            }
        }
        debug!("训练任务 {} 报告包含 {} 轮梯度", task_id, gradients.len());

        Ok(TrainingReport {
            task_id: task_id.to_string(),
            progress,
            gradients,
            generated_at: Utc::now(),
        })
    }
}
