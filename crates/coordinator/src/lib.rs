//! # trainq-coordinator
//!
//! Coordinator角色：创建训练任务、按计划批量提交Job、跟踪进度并输出报告。

pub mod coordinator;
pub mod report;

pub use coordinator::{Coordinator, CoordinatorSettings};
pub use report::{write_report, TrainingReport};
