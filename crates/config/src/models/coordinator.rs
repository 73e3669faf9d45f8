use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// Coordinator角色配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub poll_interval_seconds: u64,
    /// 把失联Worker手中的Job放回队列，默认关闭
    pub job_recovery_enabled: bool,
    pub task: TrainingPlan,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            job_recovery_enabled: false,
            task: TrainingPlan::default(),
        }
    }
}

impl ConfigValidator for CoordinatorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.poll_interval_seconds,
            "coordinator.poll_interval_seconds",
        )?;
        self.task.validate()
    }
}

/// 一次训练运行的描述
///
/// 每个epoch拆成 `batches_per_epoch` 个 `train_batch` Job，
/// 数据准备拆成 `data_shards` 个 `prepare_data` Job。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingPlan {
    pub task_type: String,
    pub dataset_id: String,
    pub model_type: String,
    pub epochs: u32,
    pub batches_per_epoch: u32,
    pub batch_size: u32,
    pub data_shards: u32,
    pub layers: Vec<String>,
    /// 每层梯度的元素个数
    pub gradient_size: usize,
    pub hyperparameters: HashMap<String, serde_json::Value>,
}

impl Default for TrainingPlan {
    fn default() -> Self {
        let mut hyperparameters = HashMap::new();
        hyperparameters.insert("learning_rate".to_string(), serde_json::json!(0.01));
        Self {
            task_type: "training".to_string(),
            dataset_id: "synthetic".to_string(),
            model_type: "mlp".to_string(),
            epochs: 2,
            batches_per_epoch: 4,
            batch_size: 32,
            data_shards: 2,
            layers: vec!["dense_1".to_string(), "dense_2".to_string()],
            gradient_size: 8,
            hyperparameters,
        }
    }
}

impl TrainingPlan {
    /// 计划生成的Job总数
    pub fn total_jobs(&self) -> u64 {
        self.data_shards as u64 + self.epochs as u64 * self.batches_per_epoch as u64
    }
}

impl ConfigValidator for TrainingPlan {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.task_type, "coordinator.task.task_type")?;
        ValidationUtils::validate_not_empty(&self.dataset_id, "coordinator.task.dataset_id")?;
        ValidationUtils::validate_not_empty(&self.model_type, "coordinator.task.model_type")?;
        ValidationUtils::validate_range(self.epochs as u64, 1, 10_000, "coordinator.task.epochs")?;
        ValidationUtils::validate_range(
            self.batches_per_epoch as u64,
            1,
            100_000,
            "coordinator.task.batches_per_epoch",
        )?;
        ValidationUtils::validate_range(
            self.batch_size as u64,
            1,
            1_000_000,
            "coordinator.task.batch_size",
        )?;
        ValidationUtils::validate_range(
            self.data_shards as u64,
            1,
            100_000,
            "coordinator.task.data_shards",
        )?;
        ValidationUtils::validate_range(
            self.gradient_size as u64,
            1,
            1_000_000,
            "coordinator.task.gradient_size",
        )?;
        if self.layers.is_empty() {
            return Err(crate::ConfigError::Validation(
                "coordinator.task.layers 至少需要一层".to_string(),
            ));
        }
        for layer in &self.layers {
            ValidationUtils::validate_not_empty(layer, "coordinator.task.layers[]")?;
        }
        Ok(())
    }
}
