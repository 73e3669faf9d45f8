use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trainq_errors::QueueError;
use uuid::Uuid;

use super::JsonMap;

/// 训练任务，由多个Job组成
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub dataset_id: String,
    pub model_type: String,
    pub hyperparameters: JsonMap,
    pub status: TaskStatus,
    /// 通过 `task_id` 关联到该任务的Job标识，读取时由存储层填充
    pub jobs: Vec<String>,
    pub progress: f64,
    pub results: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        task_type: impl Into<String>,
        dataset_id: impl Into<String>,
        model_type: impl Into<String>,
        hyperparameters: JsonMap,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            dataset_id: dataset_id.into(),
            model_type: model_type.into(),
            hyperparameters,
            status: TaskStatus::Pending,
            jobs: Vec::new(),
            progress: 0.0,
            results: JsonMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 训练任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// 写入新进度后的状态
    ///
    /// 进度到达1.0即完成；已取消的任务在完成前保持取消；
    /// 其余情况下有进度即运行中，零进度保持原状态。
    pub fn after_progress(self, progress: f64) -> Self {
        if progress >= 1.0 {
            TaskStatus::Completed
        } else if self == TaskStatus::Cancelled {
            TaskStatus::Cancelled
        } else if progress > 0.0 {
            TaskStatus::Running
        } else {
            self
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(QueueError::serialization(format!("未知的任务状态: {s}"))),
        }
    }
}

impl_sqlx_text_enum!(TaskStatus);

/// 把进度限制在 [0, 1]，NaN 视为 0
pub fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}
