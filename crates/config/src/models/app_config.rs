use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{CoordinatorConfig, DatabaseConfig, ObservabilityConfig, WorkerConfig};
use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// 未指定 `--config` 时依次尝试的配置文件
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/trainq.toml",
    "trainq.toml",
    "/etc/trainq/config.toml",
];

/// 环境变量前缀，例如 `TRAINQ_DATABASE__URL`
pub const ENV_PREFIX: &str = "TRAINQ";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub coordinator: CoordinatorConfig,
    pub observability: ObservabilityConfig,
    pub output_dir: String,
}

/// 命令行提供的覆盖项，优先级最高
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub output_dir: Option<String>,
    pub max_jobs: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl AppConfig {
    /// 按 文件 → 环境变量 → 命令行 的顺序叠加并校验
    pub fn load(config_path: Option<&str>, overrides: &ConfigOverrides) -> ConfigResult<Self> {
        let mut builder = ConfigBuilder::builder().set_default("output_dir", "./output")?;

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(ConfigError::FileNotFound(path.to_string()));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &overrides.database_url {
            builder = builder.set_override("database.url", url.as_str())?;
        }
        if let Some(dir) = &overrides.output_dir {
            builder = builder.set_override("output_dir", dir.as_str())?;
        }
        if let Some(max_jobs) = overrides.max_jobs {
            builder = builder.set_override("worker.max_jobs", max_jobs)?;
        }
        if let Some(level) = &overrides.log_level {
            builder = builder.set_override("observability.log_level", level.as_str())?;
        }
        if let Some(format) = &overrides.log_format {
            builder = builder.set_override("observability.log_format", format.as_str())?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.worker.validate()?;
        self.coordinator.validate()?;
        self.observability.validate()?;
        ValidationUtils::validate_not_empty(&self.output_dir, "output_dir")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
output_dir = "/tmp/trainq"

[database]
url = "sqlite:trainq.db"
max_connections = 4

[worker]
heartbeat_interval_seconds = 10
poll_interval_ms = 250
accelerator = true

[worker.capabilities]
zone = "eu-west"

[coordinator]
poll_interval_seconds = 2
job_recovery_enabled = true

[coordinator.task]
dataset_id = "cifar10"
model_type = "resnet18"
epochs = 3
layers = ["conv1", "fc"]

[observability]
log_format = "json"
"#;

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.database.url, "sqlite:trainq.db");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.worker.heartbeat_interval_seconds, 10);
        assert!(config.worker.accelerator);
        assert_eq!(config.worker.capabilities["zone"], "eu-west");
        assert!(config.coordinator.job_recovery_enabled);
        assert_eq!(config.coordinator.task.epochs, 3);
        assert_eq!(config.coordinator.task.batch_size, 32);
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.output_dir, "/tmp/trainq");
    }

    #[test]
    fn test_missing_database_url_is_rejected() {
        let result = AppConfig::from_toml("[worker]\naddress = \"10.0.0.1\"");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unsupported_scheme_is_rejected() {
        let result = AppConfig::from_toml("[database]\nurl = \"mysql://localhost/db\"");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let rendered = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn test_load_from_file_with_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let overrides = ConfigOverrides {
            database_url: Some("postgres://trainq:secret@db:5432/trainq".to_string()),
            output_dir: Some("/var/lib/trainq".to_string()),
            max_jobs: Some(7),
            ..ConfigOverrides::default()
        };
        let config = AppConfig::load(Some(&path), &overrides).unwrap();

        assert_eq!(config.database.url, "postgres://trainq:secret@db:5432/trainq");
        assert_eq!(config.output_dir, "/var/lib/trainq");
        assert_eq!(config.worker.max_jobs, Some(7));
        assert_eq!(config.worker.poll_interval_ms, 250);
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load(Some("/nonexistent/trainq.toml"), &ConfigOverrides::default());
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
