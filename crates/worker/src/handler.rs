use std::path::PathBuf;

use async_trait::async_trait;
use trainq_core::{GradientAggregator, Job, JsonMap, QueueResult};

/// 处理器返回的结果，写入Job的 `results`
pub type JobResults = JsonMap;

/// 处理器执行时可用的环境
#[derive(Clone)]
pub struct JobContext {
    pub worker_id: String,
    pub output_dir: PathBuf,
    pub gradients: GradientAggregator,
}

/// 按Job类型分发的处理器
///
/// 产生梯度的处理器需要自行调用 [`GradientAggregator::submit_gradient`]。
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// 处理器对应的Job类型
    fn job_type(&self) -> &str;

    async fn handle(&self, ctx: &JobContext, job: &Job) -> QueueResult<JobResults>;
}
