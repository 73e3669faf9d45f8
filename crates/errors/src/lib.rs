use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("队列存储不可用: {0}")]
    Database(#[from] sqlx::Error),
    #[error("队列存储不可用: {0}")]
    StoreUnavailable(String),
    #[error("任务未找到: {id}")]
    JobNotFound { id: String },
    #[error("训练任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("任务处理失败: {0}")]
    HandlerFailed(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    pub fn store_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::StoreUnavailable(msg.into())
    }
    pub fn job_not_found<S: Into<String>>(id: S) -> Self {
        Self::JobNotFound { id: id.into() }
    }
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn invalid_transition<F: ToString, T: ToString>(from: F, to: T) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn handler_failed<S: Into<String>>(msg: S) -> Self {
        Self::HandlerFailed(msg.into())
    }
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::Configuration(_) | QueueError::Internal(_))
    }
    /// 存储层的瞬时故障可以在下一轮轮询时重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::Database(_) | QueueError::StoreUnavailable(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            QueueError::Database(_) | QueueError::StoreUnavailable(_) => "队列暂时不可用，请稍后重试",
            QueueError::JobNotFound { .. } => "请求的任务不存在",
            QueueError::TaskNotFound { .. } => "请求的训练任务不存在",
            QueueError::WorkerNotFound { .. } => "请求的Worker节点不存在",
            QueueError::InvalidTransition { .. } => "任务状态不允许该操作",
            QueueError::Validation(_) => "输入数据验证失败",
            QueueError::Serialization(_) => "梯度数据格式不受支持",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
