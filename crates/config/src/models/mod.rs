pub mod app_config;
pub mod coordinator;
pub mod database;
pub mod observability;
pub mod worker;

pub use app_config::{AppConfig, ConfigOverrides};
pub use coordinator::{CoordinatorConfig, TrainingPlan};
pub use database::DatabaseConfig;
pub use observability::ObservabilityConfig;
pub use worker::WorkerConfig;
