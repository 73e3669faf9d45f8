use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;
use trainq_config::AppConfig;
use trainq_coordinator::{write_report, Coordinator, CoordinatorSettings};
use trainq_core::{QueueContext, QueueError};
use trainq_infrastructure::{install_metrics_exporter, DatabaseManager};
use trainq_worker::{builtin_registry, WorkerLifecycle, WorkerSettings};

/// 把队列错误转为带有面向用户说明的进程级错误
fn queue_failure(stage: &'static str) -> impl FnOnce(QueueError) -> anyhow::Error {
    move |e| {
        let hint = e.user_message().to_string();
        anyhow::Error::new(e).context(format!("{stage}: {hint}"))
    }
}

/// 进程运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 轮询队列并执行Job
    Worker,
    /// 发起训练任务并跟踪到结束
    Coordinator,
}

impl AppMode {
    pub const NAMES: [&'static str; 2] = ["worker", "coordinator"];
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "worker" => Ok(AppMode::Worker),
            "coordinator" => Ok(AppMode::Coordinator),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMode::Worker => write!(f, "worker"),
            AppMode::Coordinator => write!(f, "coordinator"),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: DatabaseManager,
    context: QueueContext,
}

impl Application {
    /// 连接共享存储并构建队列上下文
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {}", mode);

        if config.observability.metrics_enabled {
            let addr: SocketAddr = config
                .observability
                .metrics_bind_address
                .parse()
                .context("解析指标监听地址失败")?;
            install_metrics_exporter(addr).context("启动指标导出失败")?;
        }

        let database = DatabaseManager::connect(&config.database)
            .await
            .map_err(queue_failure("连接队列存储失败"))?;
        let context = database
            .queue_context(Duration::from_secs(config.worker.heartbeat_interval_seconds))
            .map_err(queue_failure("构建队列上下文失败"))?;

        Ok(Self {
            config,
            mode,
            database,
            context,
        })
    }

    /// 运行到自然结束或收到关闭信号
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let result = match self.mode {
            AppMode::Worker => self.run_worker(shutdown).await,
            AppMode::Coordinator => self.run_coordinator(shutdown).await,
        };
        self.database.close().await;
        result
    }

    async fn run_worker(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let settings = WorkerSettings::from_config(&self.config.worker, &self.config.output_dir);
        let handlers = builtin_registry().map_err(queue_failure("注册Job处理器失败"))?;
        let mut lifecycle = WorkerLifecycle::new(self.context.clone(), handlers, settings);

        let summary = lifecycle
            .run(self.config.worker.max_jobs, shutdown)
            .await
            .map_err(queue_failure("Worker运行失败"))?;
        info!(
            "Worker共处理 {} 个Job: 完成 {}，失败 {}，跳过 {}",
            summary.processed, summary.completed, summary.failed, summary.skipped
        );
        Ok(())
    }

    async fn run_coordinator(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let output_dir = PathBuf::from(&self.config.output_dir);
        let settings = CoordinatorSettings::from_config(&self.config.coordinator, &output_dir);
        let coordinator = Coordinator::new(self.context.clone(), settings);
        let plan = &self.config.coordinator.task;

        let task_id = coordinator
            .launch_training(plan)
            .await
            .map_err(queue_failure("提交训练任务失败"))?;
        let view = coordinator
            .wait_for_task(&task_id, shutdown)
            .await
            .map_err(queue_failure("跟踪训练任务失败"))?;
        info!(
            "训练任务 {} 结束跟踪: 状态 {}，进度 {:.1}%",
            task_id,
            view.task.status,
            view.progress * 100.0
        );

        let report = coordinator
            .build_report(&task_id, plan.epochs as i64)
            .await
            .map_err(queue_failure("生成训练报告失败"))?;
        let path = write_report(&output_dir, &report)
            .await
            .map_err(queue_failure("写入训练报告失败"))?;
        info!("训练报告: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_failure_carries_user_message() {
        let err = queue_failure("连接队列存储失败")(QueueError::store_unavailable("refused"));
        assert_eq!(err.to_string(), "连接队列存储失败: 队列暂时不可用，请稍后重试");
        assert!(err.root_cause().to_string().contains("refused"));
    }

    #[test]
    fn test_parse_app_mode() {
        assert_eq!("worker".parse::<AppMode>().unwrap(), AppMode::Worker);
        assert_eq!("coordinator".parse::<AppMode>().unwrap(), AppMode::Coordinator);
        assert!("dispatcher".parse::<AppMode>().is_err());
        assert_eq!(AppMode::Coordinator.to_string(), "coordinator");
    }
}
