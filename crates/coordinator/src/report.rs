use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use trainq_core::{QueueError, QueueResult, Tensor, TrainingProgress};

/// 训练结束时输出的报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub task_id: String,
    pub progress: TrainingProgress,
    /// 迭代序号 -> 层名 -> 聚合后的梯度
    pub gradients: BTreeMap<i64, BTreeMap<String, Tensor>>,
    pub generated_at: DateTime<Utc>,
}

impl TrainingReport {
    pub fn file_name(&self) -> String {
        format!("training_report_{}.json", self.task_id)
    }
}

/// 以格式化JSON写入 `output_dir`，返回文件路径
pub async fn write_report(output_dir: &Path, report: &TrainingReport) -> QueueResult<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| QueueError::Internal(format!("创建输出目录 {} 失败: {e}", output_dir.display())))?;

    let path = output_dir.join(report.file_name());
    let body = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| QueueError::Internal(format!("写入报告 {} 失败: {e}", path.display())))?;

    info!("训练报告已写入 {}", path.display());
    Ok(path)
}
