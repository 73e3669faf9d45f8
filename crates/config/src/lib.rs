//! # trainq-config
//!
//! 应用配置：TOML文件、`TRAINQ_` 前缀的环境变量与命令行覆盖依次叠加，
//! 加载后统一校验。

pub mod models;
pub mod validation;

pub use models::{
    AppConfig, ConfigOverrides, CoordinatorConfig, DatabaseConfig, ObservabilityConfig,
    TrainingPlan, WorkerConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

/// 配置结果类型
pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {0}")]
    FileNotFound(String),

    #[error("配置加载失败: {0}")]
    Load(#[from] config::ConfigError),

    #[error("配置解析失败: {0}")]
    Parse(String),

    #[error("配置验证失败: {0}")]
    Validation(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
