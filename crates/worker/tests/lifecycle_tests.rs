use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use trainq_core::traits::JobRepository;
use trainq_core::{
    Job, JobStatus, JsonMap, QueueContext, QueueError, QueueResult, TaskStatus,
    WorkerRegistration, WorkerStatus,
};
use trainq_infrastructure::DatabaseManager;
use trainq_worker::{
    builtin_registry, HandlerRegistry, JobContext, JobHandler, JobResults, WorkerLifecycle,
    WorkerSettings,
};

async fn context() -> (DatabaseManager, QueueContext) {
    let manager = DatabaseManager::in_memory().await.unwrap();
    let ctx = manager.queue_context(Duration::from_secs(30)).unwrap();
    (manager, ctx)
}

fn settings(output_dir: &std::path::Path) -> WorkerSettings {
    WorkerSettings {
        registration: WorkerRegistration {
            hostname: "test-node".to_string(),
            address: "127.0.0.1".to_string(),
            capabilities: JsonMap::new(),
        },
        poll_interval: Duration::from_millis(10),
        output_dir: output_dir.to_path_buf(),
    }
}

fn params(value: serde_json::Value) -> JsonMap {
    serde_json::from_value(value).unwrap()
}

struct PanickingHandler;

#[async_trait]
impl JobHandler for PanickingHandler {
    fn job_type(&self) -> &str {
        "explode"
    }

    async fn handle(&self, _ctx: &JobContext, _job: &Job) -> QueueResult<JobResults> {
        panic!("handler panicked");
    }
}

#[tokio::test]
async fn test_worker_trains_batches_and_completes_task() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let tracker = ctx.task_tracker();
    let queue = ctx.job_queue();

    let task_id = tracker
        .create_task("training", "mnist", "mlp", JsonMap::new())
        .await
        .unwrap();
    let common = params(json!({
        "iteration": 0,
        "layers": ["dense_1", "dense_2"],
        "gradient_job_id": task_id,
        "gradient_size": 4,
        "batch_size": 16,
    }));
    let ids = queue
        .submit_batch_jobs("train_batch", &common, vec![JsonMap::new(); 3], 1, Some(&task_id))
        .await
        .unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let mut worker = WorkerLifecycle::new(ctx.clone(), builtin_registry().unwrap(), settings(output.path()));
    let summary = worker.run(Some(3), rx).await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 0);

    for id in &ids {
        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.results.contains_key("loss"));
    }

    let task = tracker.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.progress, 1.0);
    assert_eq!(task.status, TaskStatus::Completed);

    let gradients = ctx
        .gradient_aggregator()
        .get_aggregated_gradients(&task_id, 0)
        .await
        .unwrap();
    assert_eq!(gradients.len(), 2);
    assert_eq!(gradients["dense_1"].shape, vec![4]);

    // 退出后Worker为下线状态
    assert!(ctx.worker_registry().get_active_workers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_type_fails_job() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let queue = ctx.job_queue();
    let job_id = queue.submit_job("evaluate", JsonMap::new(), 1, None).await.unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let mut worker = WorkerLifecycle::new(ctx.clone(), builtin_registry().unwrap(), settings(output.path()));
    let summary = worker.run(Some(1), rx).await.unwrap();
    assert_eq!(summary.failed, 1);

    let job = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("evaluate"));
}

#[tokio::test]
async fn test_handler_panic_is_reported_as_failure() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let queue = ctx.job_queue();
    let failing = queue.submit_job("explode", JsonMap::new(), 2, None).await.unwrap();
    let healthy = queue
        .submit_job("prepare_data", params(json!({"shard": 1, "dataset_id": "mnist"})), 1, None)
        .await
        .unwrap();

    let registry = HandlerRegistry::new()
        .with(Arc::new(PanickingHandler))
        .unwrap()
        .with(Arc::new(trainq_worker::PrepareDataHandler))
        .unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let mut worker = WorkerLifecycle::new(ctx.clone(), registry, settings(output.path()));
    let summary = worker.run(Some(2), rx).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 1);

    assert_eq!(queue.get_job(&failing).await.unwrap().unwrap().status, JobStatus::Failed);
    let prepared = queue.get_job(&healthy).await.unwrap().unwrap();
    assert_eq!(prepared.status, JobStatus::Completed);
    assert_eq!(prepared.results["shard"], json!(1));
}

#[tokio::test]
async fn test_shutdown_signal_stops_idle_worker() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let (tx, rx) = broadcast::channel(1);

    let mut worker = WorkerLifecycle::new(ctx.clone(), builtin_registry().unwrap(), settings(output.path()));
    let worker_id = worker.start().await.unwrap();

    let runner = tokio::spawn(async move { worker.run(None, rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(()).unwrap();

    let summary = runner.await.unwrap().unwrap();
    assert_eq!(summary.processed, 0);

    let worker = ctx.worker_registry().get_worker(&worker_id).await.unwrap().unwrap();
    assert_eq!(worker.status, WorkerStatus::Offline);
}

#[tokio::test]
async fn test_aggregate_job_writes_output_file() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let queue = ctx.job_queue();

    let gradient = trainq_core::Tensor::from_f32(vec![2], &[1.0, 3.0]).unwrap();
    ctx.gradient_aggregator()
        .submit_gradient("run-1", "worker-x", "dense_1", 2, 8, &gradient)
        .await
        .unwrap();
    let job_id = queue
        .submit_job(
            "aggregate_gradients",
            params(json!({"gradient_job_id": "run-1", "iteration": 2})),
            1,
            None,
        )
        .await
        .unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let mut worker = WorkerLifecycle::new(ctx.clone(), builtin_registry().unwrap(), settings(output.path()));
    worker.run(Some(1), rx).await.unwrap();

    let job = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let path = output.path().join("gradients_run-1_2.json");
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["dense_1"]["values"], json!([1.0, 3.0]));
}

/// 终态写入在前 `failures` 次返回存储不可用的Job仓储
struct FlakyTerminalWrites {
    inner: Arc<dyn JobRepository>,
    failures: AtomicUsize,
}

#[async_trait]
impl JobRepository for FlakyTerminalWrites {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        self.inner.insert(job).await
    }

    async fn insert_batch(&self, jobs: &[Job]) -> QueueResult<()> {
        self.inner.insert_batch(jobs).await
    }

    async fn find_by_id(&self, job_id: &str) -> QueueResult<Option<Job>> {
        self.inner.find_by_id(job_id).await
    }

    async fn find_next_pending(&self) -> QueueResult<Option<Job>> {
        self.inner.find_next_pending().await
    }

    async fn try_claim(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        self.inner.try_claim(job_id, worker_id, now).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        job_id: &str,
        worker_id: &str,
        from: &[JobStatus],
        to: JobStatus,
        results: Option<&JsonMap>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        if to.is_terminal()
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(QueueError::store_unavailable("connection reset"));
        }
        self.inner
            .transition(job_id, worker_id, from, to, results, error, now)
            .await
    }

    async fn cancel(&self, job_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        self.inner.cancel(job_id, now).await
    }

    async fn requeue(&self, job_id: &str, worker_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        self.inner.requeue(job_id, worker_id, now).await
    }

    async fn find_by_task(&self, task_id: &str) -> QueueResult<Vec<Job>> {
        self.inner.find_by_task(task_id).await
    }

    async fn count_by_status(&self, task_id: &str) -> QueueResult<BTreeMap<JobStatus, i64>> {
        self.inner.count_by_status(task_id).await
    }

    async fn find_stranded(&self, stale_before: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        self.inner.find_stranded(stale_before).await
    }
}

#[tokio::test]
async fn test_terminal_status_is_retried_after_store_errors() {
    let manager = DatabaseManager::in_memory().await.unwrap();
    let ctx = QueueContext::builder()
        .job_repository(Arc::new(FlakyTerminalWrites {
            inner: manager.job_repository(),
            failures: AtomicUsize::new(2),
        }))
        .worker_repository(manager.worker_repository())
        .task_repository(manager.task_repository())
        .gradient_repository(manager.gradient_repository())
        .build()
        .unwrap();
    let output = tempfile::tempdir().unwrap();
    let queue = ctx.job_queue();
    let job_id = queue
        .submit_job("prepare_data", params(json!({"shard": 0, "dataset_id": "mnist"})), 1, None)
        .await
        .unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let mut worker = WorkerLifecycle::new(ctx.clone(), builtin_registry().unwrap(), settings(output.path()));
    let worker_id = worker.start().await.unwrap();
    let summary = worker.run(Some(1), rx).await.unwrap();
    assert_eq!(summary.completed, 1);

    let job = queue.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.worker_id.is_none());
    assert_eq!(job.results["shard"], json!(0));

    let worker = ctx.worker_registry().get_worker(&worker_id).await.unwrap().unwrap();
    assert!(worker.current_job_id.is_none());
}
