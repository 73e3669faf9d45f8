use std::net::SocketAddr;

use crate::{ConfigError, ConfigResult};

/// 配置段校验
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// 支持的存储URL协议
pub const SUPPORTED_DATABASE_SCHEMES: [&str; 3] = ["sqlite", "postgres", "postgresql"];

pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field_name} 不能为空")));
        }
        Ok(())
    }

    /// 取值必须落在 `[min, max]` 内
    pub fn validate_range(value: u64, min: u64, max: u64, field_name: &str) -> ConfigResult<()> {
        if value < min || value > max {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须在 {min} 到 {max} 之间，当前为 {value}"
            )));
        }
        Ok(())
    }

    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        Self::validate_range(timeout_seconds, 1, 3600, field_name)
    }

    /// 存储URL必须可解析且协议受支持
    pub fn validate_database_url(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        let parsed = url::Url::parse(value)
            .map_err(|e| ConfigError::Validation(format!("{field_name} 不是合法的URL: {e}")))?;
        if !SUPPORTED_DATABASE_SCHEMES.contains(&parsed.scheme()) {
            return Err(ConfigError::Validation(format!(
                "{field_name} 使用了不支持的协议 {}，仅支持 sqlite / postgres",
                parsed.scheme()
            )));
        }
        Ok(())
    }

    pub fn validate_socket_addr(value: &str, field_name: &str) -> ConfigResult<()> {
        value
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| ConfigError::Validation(format!("{field_name} 不是合法的监听地址: {e}")))
    }

    pub fn validate_one_of(value: &str, allowed: &[&str], field_name: &str) -> ConfigResult<()> {
        if !allowed.contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须是 {allowed:?} 之一，当前为 {value}"
            )));
        }
        Ok(())
    }
}
