use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;
use trainq_core::{QueueError, QueueResult};

use crate::handler::JobHandler;

/// Job类型到处理器的映射，注册完成后只读
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器；类型为空、带首尾空白或重复时报配置错误
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> QueueResult<()> {
        let job_type = handler.job_type().to_string();
        if job_type.trim().is_empty() {
            return Err(QueueError::config_error("处理器的Job类型不能为空"));
        }
        if job_type.trim() != job_type {
            return Err(QueueError::config_error(format!(
                "Job类型 {job_type:?} 不能带首尾空白"
            )));
        }
        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::config_error(format!(
                "Job类型 {job_type} 已注册处理器"
            )));
        }
        info!("注册Job处理器: {}", job_type);
        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// 链式注册
    pub fn with(mut self, handler: Arc<dyn JobHandler>) -> QueueResult<Self> {
        self.register(handler)?;
        Ok(self)
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
