use std::time::Duration;

use tokio::sync::broadcast;
use trainq_config::TrainingPlan;
use trainq_coordinator::{write_report, Coordinator, CoordinatorSettings};
use trainq_core::{JobStatus, JsonMap, QueueContext, QueueError, TaskStatus, WorkerRegistration};
use trainq_infrastructure::DatabaseManager;
use trainq_worker::{builtin_registry, WorkerLifecycle, WorkerSettings};

async fn context() -> (DatabaseManager, QueueContext) {
    let manager = DatabaseManager::in_memory().await.unwrap();
    let ctx = manager.queue_context(Duration::from_secs(30)).unwrap();
    (manager, ctx)
}

fn small_plan() -> TrainingPlan {
    TrainingPlan {
        epochs: 2,
        batches_per_epoch: 2,
        data_shards: 1,
        gradient_size: 4,
        layers: vec!["dense_1".to_string()],
        ..TrainingPlan::default()
    }
}

fn coordinator(ctx: &QueueContext, output_dir: &std::path::Path) -> Coordinator {
    Coordinator::new(
        ctx.clone(),
        CoordinatorSettings {
            poll_interval: Duration::from_millis(20),
            job_recovery_enabled: true,
            output_dir: output_dir.to_path_buf(),
        },
    )
}

#[tokio::test]
async fn test_launch_training_submits_plan_in_priority_order() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&ctx, output.path());
    let plan = small_plan();

    let task_id = coordinator.launch_training(&plan).await.unwrap();
    let jobs = ctx.job_queue().get_task_jobs(&task_id).await.unwrap();
    assert_eq!(jobs.len() as u64, plan.total_jobs());

    let queue = ctx.job_queue();
    let first = queue.get_next_job("worker-1").await.unwrap().unwrap();
    assert_eq!(first.job_type, "prepare_data");
    assert_eq!(first.priority, 3);

    let second = queue.get_next_job("worker-1").await.unwrap().unwrap();
    assert_eq!(second.job_type, "train_batch");
    assert_eq!(second.param_i64("iteration"), Some(0));
    assert_eq!(second.param_str("gradient_job_id"), Some(task_id.as_str()));
    assert_eq!(second.param_i64("batch_index"), Some(0));

    let task = ctx.task_tracker().get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.jobs.len(), jobs.len());
}

#[tokio::test]
async fn test_training_run_end_to_end() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&ctx, output.path());
    let plan = small_plan();
    let task_id = coordinator.launch_training(&plan).await.unwrap();

    let (shutdown_tx, _) = broadcast::channel(4);
    let worker_ctx = ctx.clone();
    let worker_output = output.path().to_path_buf();
    let worker_shutdown = shutdown_tx.subscribe();
    let worker = tokio::spawn(async move {
        let settings = WorkerSettings {
            registration: WorkerRegistration {
                hostname: "node-1".to_string(),
                ..Default::default()
            },
            poll_interval: Duration::from_millis(10),
            output_dir: worker_output,
        };
        let mut lifecycle = WorkerLifecycle::new(worker_ctx, builtin_registry().unwrap(), settings);
        lifecycle.run(None, worker_shutdown).await
    });

    let view = tokio::time::timeout(
        Duration::from_secs(10),
        coordinator.wait_for_task(&task_id, shutdown_tx.subscribe()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(view.task.status, TaskStatus::Completed);
    assert_eq!(view.count(JobStatus::Completed) as u64, plan.total_jobs());

    shutdown_tx.send(()).unwrap();
    let summary = worker.await.unwrap().unwrap();
    assert_eq!(summary.completed, plan.total_jobs());

    let report = coordinator
        .build_report(&task_id, plan.epochs as i64)
        .await
        .unwrap();
    assert_eq!(report.gradients.len(), 2);
    assert_eq!(report.gradients[&0]["dense_1"].shape, vec![4]);

    let path = write_report(output.path(), &report).await.unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["task_id"], serde_json::json!(task_id));
    assert_eq!(written["progress"]["progress"], serde_json::json!(1.0));
}

#[tokio::test]
async fn test_cancel_task_cancels_unstarted_jobs() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&ctx, output.path());
    let task_id = coordinator.launch_training(&small_plan()).await.unwrap();

    let queue = ctx.job_queue();
    let running = queue.get_next_job("worker-1").await.unwrap().unwrap();
    queue
        .update_job_status(&running.id, "worker-1", JobStatus::InProgress, None, None)
        .await
        .unwrap();

    let cancelled = coordinator.cancel_task(&task_id).await.unwrap();
    assert_eq!(cancelled, 4);

    let view = coordinator.monitor(&task_id).await.unwrap();
    assert_eq!(view.task.status, TaskStatus::Cancelled);
    assert_eq!(view.count(JobStatus::InProgress), 1);
    assert_eq!(view.count(JobStatus::Cancelled), 4);

    // 已取消的任务立即结束跟踪
    let (_tx, rx) = broadcast::channel(1);
    let view = coordinator.wait_for_task(&task_id, rx).await.unwrap();
    assert_eq!(view.task.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_delegated_submission() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&ctx, output.path());

    let task_id = coordinator
        .create_task("training", "mnist", "mlp", JsonMap::new())
        .await
        .unwrap();
    let single = coordinator
        .submit_job("prepare_data", JsonMap::new(), 1, Some(&task_id))
        .await
        .unwrap();
    let batch = coordinator
        .submit_batch_jobs("train_batch", &JsonMap::new(), vec![JsonMap::new(); 2], 1, Some(&task_id))
        .await
        .unwrap();

    let ids: Vec<String> = ctx
        .job_queue()
        .get_task_jobs(&task_id)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(ids, [vec![single], batch].concat());
}

#[tokio::test]
async fn test_launch_rejects_invalid_plan_before_submitting() {
    let (_manager, ctx) = context().await;
    let output = tempfile::tempdir().unwrap();
    let coordinator = coordinator(&ctx, output.path());

    for plan in [
        TrainingPlan { data_shards: 0, ..small_plan() },
        TrainingPlan { epochs: 0, ..small_plan() },
        TrainingPlan { layers: Vec::new(), ..small_plan() },
    ] {
        let result = coordinator.launch_training(&plan).await;
        assert!(matches!(result, Err(QueueError::Validation(_))), "{plan:?}");
    }

    assert!(ctx.job_queue().get_next_job("worker-1").await.unwrap().is_none());
}
