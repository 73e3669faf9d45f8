use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trainq_config::{AppConfig, ConfigOverrides};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

/// 关闭信号发出后等待应用退出的时长
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 命令行解析得到的启动参数
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub mode: AppMode,
    pub config_path: Option<String>,
    pub overrides: ConfigOverrides,
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载应用配置
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    AppConfig::load(startup_config.config_path.as_deref(), &startup_config.overrides)
        .context("加载配置失败")
}

/// 加载配置、初始化日志并运行应用，直到应用结束或收到关闭信号
pub async fn start_application(startup_config: StartupConfig) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging(&config.observability.log_level, &config.observability.log_format)?;

    info!("启动 trainq {}", startup_config.mode);
    if let Some(path) = &startup_config.config_path {
        info!("配置文件: {}", path);
    }

    let app = Application::new(config, startup_config.mode).await?;
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let mut app_handle = tokio::spawn(app.run(shutdown_rx));

    tokio::select! {
        result = &mut app_handle => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("应用任务异常退出: {e}")),
            };
        }
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(result)) => {
            result?;
            info!("trainq {} 已优雅关闭", startup_config.mode);
        }
        Ok(Err(e)) => {
            error!("应用关闭时发生错误: {e}");
        }
        Err(_) => {
            warn!("应用关闭超时，强制退出");
        }
    }
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
