use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::EncodedTensor;

/// 某个Worker针对某一层、某次迭代提交的梯度
#[derive(Debug, Clone, PartialEq)]
pub struct GradientContribution {
    pub id: String,
    pub job_id: String,
    pub worker_id: String,
    pub layer_name: String,
    pub iteration: i64,
    pub batch_size: i64,
    pub payload: EncodedTensor,
    /// 产生该梯度的Job；同一来源在同一层、同一迭代只保留最新一份
    pub source_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GradientContribution {
    pub fn new(
        job_id: impl Into<String>,
        worker_id: impl Into<String>,
        layer_name: impl Into<String>,
        iteration: i64,
        batch_size: i64,
        payload: EncodedTensor,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            worker_id: worker_id.into(),
            layer_name: layer_name.into(),
            iteration,
            batch_size,
            payload,
            source_job_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source_job_id: Option<String>) -> Self {
        self.source_job_id = source_job_id;
        self
    }
}
