use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use trainq_errors::{QueueError, QueueResult};

use super::to_chrono;
use crate::metrics;
use crate::models::{Job, JobStatus, JsonMap};
use crate::traits::{JobRepository, WorkerRepository};

/// 批量提交时写入每个Job参数中的序号键
pub const BATCH_INDEX_KEY: &str = "batch_index";

/// Job队列
///
/// 领取采用乐观并发：先查询候选，再以 `status = PENDING` 为守卫做条件更新。
/// 同一Job被多个Worker并发领取时，恰好一个成功，其余得到 `None`。
#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<dyn JobRepository>,
    workers: Arc<dyn WorkerRepository>,
}

impl JobQueue {
    pub fn new(jobs: Arc<dyn JobRepository>, workers: Arc<dyn WorkerRepository>) -> Self {
        Self { jobs, workers }
    }

    /// 提交单个Job，返回其标识
    #[instrument(skip(self, parameters))]
    pub async fn submit_job(
        &self,
        job_type: &str,
        parameters: JsonMap,
        priority: i32,
        task_id: Option<&str>,
    ) -> QueueResult<String> {
        validate_job_type(job_type)?;

        let job = Job::new(job_type, priority, parameters, task_id.map(str::to_string));
        self.jobs.insert(&job).await?;

        metrics::record_jobs_submitted(job_type, 1);
        debug!("提交Job: {} (优先级 {})", job.id, priority);
        Ok(job.id)
    }

    /// 批量提交同类型Job
    ///
    /// 每个Job的参数为 `common` 与对应条目的合并（条目覆盖公共参数），
    /// 并附加从0开始的 `batch_index`。返回的标识与输入顺序一致。
    #[instrument(skip(self, common, batch), fields(size = batch.len()))]
    pub async fn submit_batch_jobs(
        &self,
        job_type: &str,
        common: &JsonMap,
        batch: Vec<JsonMap>,
        priority: i32,
        task_id: Option<&str>,
    ) -> QueueResult<Vec<String>> {
        validate_job_type(job_type)?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let jobs: Vec<Job> = batch
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                Job::new(
                    job_type,
                    priority,
                    merge_parameters(common, item, index),
                    task_id.map(str::to_string),
                )
            })
            .collect();

        self.jobs.insert_batch(&jobs).await?;

        metrics::record_jobs_submitted(job_type, jobs.len() as u64);
        info!("批量提交 {} 个 {} Job", jobs.len(), job_type);
        Ok(jobs.into_iter().map(|job| job.id).collect())
    }

    /// 为Worker领取下一个Job，无可领取或竞争失败时返回 `None`
    #[instrument(skip(self))]
    pub async fn get_next_job(&self, worker_id: &str) -> QueueResult<Option<Job>> {
        let Some(candidate) = self.jobs.find_next_pending().await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if !self.jobs.try_claim(&candidate.id, worker_id, now).await? {
            metrics::record_claim_race_lost();
            debug!("Job {} 已被其他Worker领取", candidate.id);
            return Ok(None);
        }

        // 领取已生效，Worker状态写入失败不影响结果
        match self.workers.mark_busy(worker_id, &candidate.id).await {
            Ok(true) => {}
            Ok(false) => warn!("领取Job {} 的Worker {} 未注册", candidate.id, worker_id),
            Err(e) => warn!("更新Worker {} 为忙碌失败: {}", worker_id, e),
        }

        metrics::record_job_claimed(&candidate.job_type);
        info!("Worker {} 领取Job {}", worker_id, candidate.id);

        Ok(Some(Job {
            status: JobStatus::Assigned,
            worker_id: Some(worker_id.to_string()),
            updated_at: now,
            ..candidate
        }))
    }

    /// 由归属Worker更新Job状态
    ///
    /// Job不属于该Worker时返回 `Ok(false)`，存储不变；归属者请求非法转换
    /// （包括目标为 `PENDING`）时返回 `InvalidTransition`。
    #[instrument(skip(self, results, error))]
    pub async fn update_job_status(
        &self,
        job_id: &str,
        worker_id: &str,
        status: JobStatus,
        results: Option<JsonMap>,
        error: Option<String>,
    ) -> QueueResult<bool> {
        let from = status.predecessors();
        if from.is_empty() {
            return Err(QueueError::invalid_transition("*", status));
        }

        let updated = self
            .jobs
            .transition(
                job_id,
                worker_id,
                from,
                status,
                results.as_ref(),
                error.as_deref(),
                Utc::now(),
            )
            .await?;

        if !updated {
            // 归属者请求了状态机之外的转换时报错，其余情况视为未授权
            if let Some(current) = self.jobs.find_by_id(job_id).await? {
                if current.worker_id.as_deref() == Some(worker_id)
                    && !current.status.can_transition_to(status)
                {
                    return Err(QueueError::invalid_transition(current.status, status));
                }
            }
            warn!(
                "Worker {} 无法把Job {} 更新为 {}: 不是归属者或Job已被取消",
                worker_id, job_id, status
            );
            return Ok(false);
        }

        if status.is_terminal() {
            metrics::record_job_finished(status.as_str());
            if let Err(e) = self.workers.mark_idle(worker_id, job_id).await {
                warn!("更新Worker {} 为空闲失败: {}", worker_id, e);
            }
        }

        debug!("Job {} -> {}", job_id, status);
        Ok(true)
    }

    /// Worker放弃一个已被取消的Job后恢复空闲
    pub async fn release_worker(&self, worker_id: &str, job_id: &str) -> QueueResult<bool> {
        self.workers.mark_idle(worker_id, job_id).await
    }

    pub async fn get_task_jobs(&self, task_id: &str) -> QueueResult<Vec<Job>> {
        self.jobs.find_by_task(task_id).await
    }

    pub async fn get_job(&self, job_id: &str) -> QueueResult<Option<Job>> {
        self.jobs.find_by_id(job_id).await
    }

    /// 取消尚未开始执行的Job，已开始或已结束的返回 `false`
    pub async fn cancel_job(&self, job_id: &str) -> QueueResult<bool> {
        let previous = self.jobs.find_by_id(job_id).await?;
        let cancelled = self.jobs.cancel(job_id, Utc::now()).await?;
        if cancelled {
            metrics::record_job_finished(JobStatus::Cancelled.as_str());
            if let Some(owner) = previous.and_then(|job| job.worker_id) {
                if let Err(e) = self.workers.mark_idle(&owner, job_id).await {
                    warn!("更新Worker {} 为空闲失败: {}", owner, e);
                }
            }
            info!("已取消Job {}", job_id);
        }
        Ok(cancelled)
    }

    /// 按状态统计任务下的Job，所有状态都会出现在结果中
    pub async fn count_jobs_by_status(
        &self,
        task_id: &str,
    ) -> QueueResult<BTreeMap<JobStatus, i64>> {
        let mut counts: BTreeMap<JobStatus, i64> =
            JobStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for (status, count) in self.jobs.count_by_status(task_id).await? {
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// 把归属于失联Worker的Job放回队列
    ///
    /// 重新入队以原归属Worker为守卫，Worker恢复后抢先完成的Job不会被回滚。
    pub async fn recover_stranded_jobs(&self, staleness: Duration) -> QueueResult<Vec<String>> {
        let now = Utc::now();
        let stale_before = now - to_chrono(staleness)?;
        let stranded = self.jobs.find_stranded(stale_before).await?;

        let mut recovered = Vec::new();
        for job in stranded {
            let Some(owner) = job.worker_id.as_deref() else {
                continue;
            };
            if self.jobs.requeue(&job.id, owner, now).await? {
                if let Err(e) = self.workers.mark_idle(owner, &job.id).await {
                    warn!("更新Worker {} 为空闲失败: {}", owner, e);
                }
                warn!("Worker {} 已失联，Job {} 重新入队", owner, job.id);
                recovered.push(job.id);
            }
        }

        if !recovered.is_empty() {
            metrics::record_jobs_recovered(recovered.len() as u64);
        }
        Ok(recovered)
    }
}

fn validate_job_type(job_type: &str) -> QueueResult<()> {
    if job_type.trim().is_empty() {
        return Err(QueueError::validation("Job类型不能为空"));
    }
    Ok(())
}

/// 公共参数与单项参数合并，单项优先，并写入批次序号
pub fn merge_parameters(common: &JsonMap, item: JsonMap, index: usize) -> JsonMap {
    let mut merged = common.clone();
    merged.extend(item);
    merged.insert(BATCH_INDEX_KEY.to_string(), serde_json::Value::from(index as u64));
    merged
}
