use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use trainq_errors::{QueueError, QueueResult};

use super::{JobQueue, WorkerRegistry};
use crate::models::{clamp_progress, JobStatus, JsonMap, Task, TaskStatus, Worker};
use crate::traits::TaskRepository;

/// 进度写入因并发修改失败后的最大尝试次数
const PROGRESS_WRITE_ATTEMPTS: usize = 8;

/// 训练任务的组合视图：任务本身、按状态统计的Job以及当前活跃Worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingProgress {
    pub task: Task,
    pub progress: f64,
    pub job_counts: BTreeMap<JobStatus, i64>,
    pub active_worker_count: usize,
    pub workers: Vec<Worker>,
}

impl TrainingProgress {
    pub fn total_jobs(&self) -> i64 {
        self.job_counts.values().sum()
    }

    pub fn count(&self, status: JobStatus) -> i64 {
        self.job_counts.get(&status).copied().unwrap_or(0)
    }

    pub fn terminal_jobs(&self) -> i64 {
        terminal_count(&self.job_counts)
    }

    /// 所有Job都已进入终态
    pub fn is_settled(&self) -> bool {
        self.terminal_jobs() == self.total_jobs()
    }
}

/// 训练任务进度跟踪
#[derive(Clone)]
pub struct TaskTracker {
    tasks: Arc<dyn TaskRepository>,
    queue: JobQueue,
    registry: WorkerRegistry,
}

impl TaskTracker {
    pub fn new(tasks: Arc<dyn TaskRepository>, queue: JobQueue, registry: WorkerRegistry) -> Self {
        Self {
            tasks,
            queue,
            registry,
        }
    }

    /// 创建训练任务，初始为 `pending`、进度0
    #[instrument(skip(self, hyperparameters))]
    pub async fn create_task(
        &self,
        task_type: &str,
        dataset_id: &str,
        model_type: &str,
        hyperparameters: JsonMap,
    ) -> QueueResult<String> {
        if task_type.trim().is_empty() {
            return Err(QueueError::validation("任务类型不能为空"));
        }
        let task = Task::new(task_type, dataset_id, model_type, hyperparameters);
        self.tasks.insert(&task).await?;
        info!("创建训练任务 {} ({} / {})", task.id, model_type, dataset_id);
        Ok(task.id)
    }

    pub async fn get_task(&self, task_id: &str) -> QueueResult<Option<Task>> {
        self.tasks.find_by_id(task_id).await
    }

    async fn require_task(&self, task_id: &str) -> QueueResult<Task> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| QueueError::task_not_found(task_id))
    }

    /// 设置任务进度，返回实际写入的值
    ///
    /// 进度被限制在 [0, 1]，到达1.0时状态变为 `completed`。
    /// 给定的 `results` 整体替换原有结果。
    pub async fn update_task_progress(
        &self,
        task_id: &str,
        progress: f64,
        results: Option<JsonMap>,
    ) -> QueueResult<f64> {
        let progress = clamp_progress(progress);

        for _ in 0..PROGRESS_WRITE_ATTEMPTS {
            let task = self.require_task(task_id).await?;
            let status = task.status.after_progress(progress);
            if self
                .tasks
                .update_progress(&task, progress, status, results.as_ref(), Utc::now())
                .await?
            {
                debug!("任务 {} 进度 {:.3} ({})", task_id, progress, status);
                return Ok(progress);
            }
        }
        Err(write_conflict(task_id))
    }

    /// 按已结束Job占比重新计算进度并写入统计结果
    ///
    /// 进度只增不减；没有Job或任务已取消时保持原值不写入。
    /// 写入以读到的任务快照为守卫，期间被并发修改则重新读取计算。
    pub async fn recompute_progress(&self, task_id: &str) -> QueueResult<f64> {
        for _ in 0..PROGRESS_WRITE_ATTEMPTS {
            let task = self.require_task(task_id).await?;
            if task.status == TaskStatus::Cancelled {
                return Ok(task.progress);
            }

            let counts = self.queue.count_jobs_by_status(task_id).await?;
            let total: i64 = counts.values().sum();
            if total == 0 {
                return Ok(task.progress);
            }
            let terminal = terminal_count(&counts);

            let progress = clamp_progress(terminal as f64 / total as f64).max(task.progress);
            let status = task.status.after_progress(progress);

            let mut results = task.results.clone();
            let count_of = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);
            results.insert("total_jobs".to_string(), total.into());
            results.insert("completed_jobs".to_string(), count_of(JobStatus::Completed).into());
            results.insert("failed_jobs".to_string(), count_of(JobStatus::Failed).into());
            results.insert("cancelled_jobs".to_string(), count_of(JobStatus::Cancelled).into());

            if self
                .tasks
                .update_progress(&task, progress, status, Some(&results), Utc::now())
                .await?
            {
                debug!("任务 {} 重新计算进度: {}/{}", task_id, terminal, total);
                return Ok(progress);
            }
            debug!("任务 {} 进度已被并发更新，重新计算", task_id);
        }
        Err(write_conflict(task_id))
    }

    /// 标记任务已取消；已完成或已取消的任务不受影响并返回 `false`
    pub async fn mark_cancelled(&self, task_id: &str) -> QueueResult<bool> {
        if self.tasks.cancel(task_id, Utc::now()).await? {
            info!("训练任务 {} 已取消", task_id);
            return Ok(true);
        }
        self.require_task(task_id).await?;
        Ok(false)
    }

    /// 只读的组合视图
    pub async fn monitor_training_progress(&self, task_id: &str) -> QueueResult<TrainingProgress> {
        let task = self.require_task(task_id).await?;
        let job_counts = self.queue.count_jobs_by_status(task_id).await?;
        let workers = self.registry.get_active_workers().await?;

        Ok(TrainingProgress {
            progress: task.progress,
            task,
            job_counts,
            active_worker_count: workers.len(),
            workers,
        })
    }
}

fn write_conflict(task_id: &str) -> QueueError {
    QueueError::store_unavailable(format!("训练任务 {task_id} 进度写入冲突过多"))
}

fn terminal_count(counts: &BTreeMap<JobStatus, i64>) -> i64 {
    counts
        .iter()
        .filter(|(status, _)| status.is_terminal())
        .map(|(_, count)| *count)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress_with(counts: &[(JobStatus, i64)]) -> TrainingProgress {
        TrainingProgress {
            task: Task::new("training", "mnist", "mlp", JsonMap::new()),
            progress: 0.0,
            job_counts: counts.iter().copied().collect(),
            active_worker_count: 0,
            workers: Vec::new(),
        }
    }

    #[test]
    fn test_settled_when_all_terminal() {
        let p = progress_with(&[
            (JobStatus::Completed, 3),
            (JobStatus::Failed, 1),
            (JobStatus::Cancelled, 2),
            (JobStatus::Pending, 0),
        ]);
        assert_eq!(p.total_jobs(), 6);
        assert_eq!(p.terminal_jobs(), 6);
        assert!(p.is_settled());
    }

    #[test]
    fn test_not_settled_with_running_jobs() {
        let p = progress_with(&[(JobStatus::Completed, 3), (JobStatus::InProgress, 1)]);
        assert!(!p.is_settled());
        assert_eq!(p.count(JobStatus::Assigned), 0);
    }

    #[test]
    fn test_progress_view_serializes() {
        let p = progress_with(&[(JobStatus::InProgress, 2)]);
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["job_counts"]["IN_PROGRESS"], 2);
        assert_eq!(json["task"]["status"], "pending");
    }
}
