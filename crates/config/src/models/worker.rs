use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// Worker角色配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// 未配置时取本机主机名
    pub hostname: Option<String>,
    pub address: String,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_ms: u64,
    /// 处理指定数量的Job后退出，未设置时持续运行
    pub max_jobs: Option<u64>,
    pub accelerator: bool,
    /// 额外的能力描述，原样写入Worker记录
    pub capabilities: HashMap<String, serde_json::Value>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            address: "127.0.0.1".to_string(),
            heartbeat_interval_seconds: 30,
            poll_interval_ms: 1000,
            max_jobs: None,
            accelerator: false,
            capabilities: HashMap::new(),
        }
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(hostname) = &self.hostname {
            ValidationUtils::validate_not_empty(hostname, "worker.hostname")?;
        }
        ValidationUtils::validate_not_empty(&self.address, "worker.address")?;
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_range(self.poll_interval_ms, 10, 600_000, "worker.poll_interval_ms")?;
        if self.max_jobs == Some(0) {
            return Err(crate::ConfigError::Validation(
                "worker.max_jobs 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}
