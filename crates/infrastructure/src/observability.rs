use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use trainq_errors::{QueueError, QueueResult};

/// 安装全局Prometheus导出器并在 `addr` 上提供 `/metrics`
///
/// 必须在tokio运行时内调用；同一进程只能安装一次。
pub fn install_metrics_exporter(addr: SocketAddr) -> QueueResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| QueueError::config_error(format!("Prometheus导出器安装失败: {e}")))?;

    trainq_core::metrics::describe_metrics();
    info!("Prometheus指标已在 {} 上导出", addr);
    Ok(())
}
