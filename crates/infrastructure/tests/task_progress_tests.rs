use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trainq_core::traits::TaskRepository;
use trainq_core::{JobStatus, JsonMap, QueueContext, QueueResult, Task, TaskStatus, TaskTracker};
use trainq_infrastructure::DatabaseManager;

/// 在跟踪器读到任务之后、写入之前插入的另一方写操作
#[derive(Debug, Clone, Copy)]
enum ConcurrentWrite {
    Cancel,
    Progress(f64),
}

/// 在第一次进度写入前执行一次并发写操作的任务仓储
struct InterleavedTasks {
    inner: Arc<dyn TaskRepository>,
    pending: Mutex<Option<ConcurrentWrite>>,
    writes: AtomicUsize,
}

impl InterleavedTasks {
    fn new(inner: Arc<dyn TaskRepository>, write: ConcurrentWrite) -> Self {
        Self {
            inner,
            pending: Mutex::new(Some(write)),
            writes: AtomicUsize::new(0),
        }
    }

    async fn interfere(&self, task_id: &str) -> QueueResult<()> {
        let write = self.pending.lock().unwrap().take();
        match write {
            Some(ConcurrentWrite::Cancel) => {
                assert!(self.inner.cancel(task_id, Utc::now()).await?);
            }
            Some(ConcurrentWrite::Progress(progress)) => {
                let current = self.inner.find_by_id(task_id).await?.unwrap();
                let status = current.status.after_progress(progress);
                assert!(
                    self.inner
                        .update_progress(&current, progress, status, None, Utc::now())
                        .await?
                );
            }
            None => {}
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InterleavedTasks {
    async fn insert(&self, task: &Task) -> QueueResult<()> {
        self.inner.insert(task).await
    }

    async fn find_by_id(&self, task_id: &str) -> QueueResult<Option<Task>> {
        self.inner.find_by_id(task_id).await
    }

    async fn update_progress(
        &self,
        current: &Task,
        progress: f64,
        status: TaskStatus,
        results: Option<&JsonMap>,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        self.interfere(&current.id).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .update_progress(current, progress, status, results, now)
            .await
    }

    async fn cancel(&self, task_id: &str, now: DateTime<Utc>) -> QueueResult<bool> {
        self.inner.cancel(task_id, now).await
    }
}

struct Fixture {
    _manager: DatabaseManager,
    ctx: QueueContext,
    tasks: Arc<InterleavedTasks>,
}

impl Fixture {
    async fn new(write: ConcurrentWrite) -> Self {
        let manager = DatabaseManager::in_memory().await.unwrap();
        let tasks = Arc::new(InterleavedTasks::new(manager.task_repository(), write));
        let ctx = QueueContext::builder()
            .job_repository(manager.job_repository())
            .worker_repository(manager.worker_repository())
            .task_repository(tasks.clone())
            .gradient_repository(manager.gradient_repository())
            .heartbeat_interval(Duration::from_secs(30))
            .build()
            .unwrap();
        Self {
            _manager: manager,
            ctx,
            tasks,
        }
    }

    fn tracker(&self) -> TaskTracker {
        self.ctx.task_tracker()
    }

    /// 创建含 `total` 个Job的任务，并完成其中 `completed` 个
    async fn task_with_jobs(&self, total: usize, completed: usize) -> String {
        let queue = self.ctx.job_queue();
        let task_id = self
            .tracker()
            .create_task("training", "mnist", "mlp", JsonMap::new())
            .await
            .unwrap();
        queue
            .submit_batch_jobs("train_batch", &JsonMap::new(), vec![JsonMap::new(); total], 1, Some(&task_id))
            .await
            .unwrap();

        for _ in 0..completed {
            let job = queue.get_next_job("worker-1").await.unwrap().unwrap();
            for status in [JobStatus::InProgress, JobStatus::Completed] {
                assert!(queue
                    .update_job_status(&job.id, "worker-1", status, None, None)
                    .await
                    .unwrap());
            }
        }
        task_id
    }
}

#[tokio::test]
async fn test_cancel_between_read_and_recompute_write_is_kept() {
    let fixture = Fixture::new(ConcurrentWrite::Cancel).await;
    let task_id = fixture.task_with_jobs(2, 1).await;

    let progress = fixture.tracker().recompute_progress(&task_id).await.unwrap();

    assert_eq!(progress, 0.0);
    let task = fixture.tracker().get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.progress, 0.0);
    assert_eq!(fixture.tasks.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recompute_with_stale_counts_never_lowers_progress() {
    let fixture = Fixture::new(ConcurrentWrite::Progress(1.0)).await;
    let task_id = fixture.task_with_jobs(4, 1).await;

    let progress = fixture.tracker().recompute_progress(&task_id).await.unwrap();

    assert_eq!(progress, 1.0);
    let task = fixture.tracker().get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 1.0);
    assert_eq!(task.results["total_jobs"], 4);
    assert_eq!(fixture.tasks.writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_concurrent_progress_is_reread_before_write() {
    let fixture = Fixture::new(ConcurrentWrite::Progress(0.5)).await;
    let task_id = fixture.task_with_jobs(4, 1).await;

    let progress = fixture.tracker().recompute_progress(&task_id).await.unwrap();

    assert_eq!(progress, 0.5);
    let task = fixture.tracker().get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.results["completed_jobs"], 1);
}

#[tokio::test]
async fn test_cancel_during_progress_update_stays_cancelled() {
    let fixture = Fixture::new(ConcurrentWrite::Cancel).await;
    let task_id = fixture.task_with_jobs(2, 0).await;

    let progress = fixture
        .tracker()
        .update_task_progress(&task_id, 0.5, None)
        .await
        .unwrap();

    assert_eq!(progress, 0.5);
    let task = fixture.tracker().get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.progress, 0.5);
    assert_eq!(fixture.tasks.writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_does_not_reopen_completed_task() {
    let fixture = Fixture::new(ConcurrentWrite::Progress(1.0)).await;
    let task_id = fixture.task_with_jobs(1, 1).await;

    fixture.tracker().recompute_progress(&task_id).await.unwrap();
    assert!(!fixture.tracker().mark_cancelled(&task_id).await.unwrap());

    let task = fixture.tracker().get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}
