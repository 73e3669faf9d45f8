//! # trainq-infrastructure
//!
//! `trainq-core` 存储接口的SQLite/PostgreSQL实现，以及指标导出。

pub mod database;
pub mod observability;

pub use database::*;
pub use observability::install_metrics_exporter;
