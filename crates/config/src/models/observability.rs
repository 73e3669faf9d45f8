use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
pub const LOG_FORMATS: [&str; 2] = ["json", "pretty"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9464".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_one_of(&self.log_level, &LOG_LEVELS, "observability.log_level")?;
        ValidationUtils::validate_one_of(
            &self.log_format,
            &LOG_FORMATS,
            "observability.log_format",
        )?;
        if self.metrics_enabled {
            ValidationUtils::validate_socket_addr(
                &self.metrics_bind_address,
                "observability.metrics_bind_address",
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_validation() {
        assert!(ObservabilityConfig::default().validate().is_ok());

        let mut config = ObservabilityConfig::default();
        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = ObservabilityConfig::default();
        config.metrics_enabled = true;
        config.metrics_bind_address = "nowhere".to_string();
        assert!(config.validate().is_err());

        // 未启用指标时不检查监听地址
        config.metrics_enabled = false;
        assert!(config.validate().is_ok());
    }
}
