//! 内置处理器
//!
//! 代替外部数值计算代码，用合成数据走通完整的训练流程。

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{debug, info};
use trainq_core::{Job, QueueError, QueueResult, Tensor};

use crate::handler::{JobContext, JobHandler, JobResults};
use crate::registry::HandlerRegistry;

pub const PREPARE_DATA: &str = "prepare_data";
pub const TRAIN_BATCH: &str = "train_batch";
pub const AGGREGATE_GRADIENTS: &str = "aggregate_gradients";

const DEFAULT_GRADIENT_SIZE: i64 = 8;
const DEFAULT_BATCH_SIZE: i64 = 32;

/// 注册全部内置处理器
pub fn builtin_registry() -> QueueResult<HandlerRegistry> {
    HandlerRegistry::new()
        .with(Arc::new(PrepareDataHandler))
        .and_then(|r| r.with(Arc::new(TrainBatchHandler)))
        .and_then(|r| r.with(Arc::new(AggregateGradientsHandler)))
}

fn required_i64(job: &Job, key: &str) -> QueueResult<i64> {
    job.param_i64(key)
        .ok_or_else(|| QueueError::validation(format!("Job {} 缺少整数参数 {key}", job.id)))
}

fn layer_names(job: &Job) -> QueueResult<Vec<String>> {
    let layers: Vec<String> = job
        .parameters
        .get("layers")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if layers.is_empty() {
        return Err(QueueError::validation(format!("Job {} 未指定 layers", job.id)));
    }
    Ok(layers)
}

/// 报告准备好的数据分片
pub struct PrepareDataHandler;

#[async_trait]
impl JobHandler for PrepareDataHandler {
    fn job_type(&self) -> &str {
        PREPARE_DATA
    }

    async fn handle(&self, ctx: &JobContext, job: &Job) -> QueueResult<JobResults> {
        let shard = job
            .param_i64("shard")
            .or_else(|| job.param_i64("batch_index"))
            .unwrap_or(0);
        let dataset_id = job.param_str("dataset_id").unwrap_or("unknown");
        let samples = job.param_i64("samples").unwrap_or(0);

        info!("Worker {} 准备数据集 {} 分片 {}", ctx.worker_id, dataset_id, shard);

        let mut results = JobResults::new();
        results.insert("dataset_id".to_string(), json!(dataset_id));
        results.insert("shard".to_string(), json!(shard));
        results.insert("samples".to_string(), json!(samples));
        results.insert("prepared".to_string(), json!(true));
        Ok(results)
    }
}

/// 对每一层生成合成梯度并提交
///
/// 梯度由 (iteration, batch_index, 层序号) 决定的种子生成，重复执行结果一致。
pub struct TrainBatchHandler;

impl TrainBatchHandler {
    fn synthetic_gradient(seed: u64, size: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..size).map(|_| rng.random_range(-1.0f32..1.0)).collect()
    }
}

#[async_trait]
impl JobHandler for TrainBatchHandler {
    fn job_type(&self) -> &str {
        TRAIN_BATCH
    }

    async fn handle(&self, ctx: &JobContext, job: &Job) -> QueueResult<JobResults> {
        let iteration = required_i64(job, "iteration")?;
        let batch_index = job.param_i64("batch_index").unwrap_or(0);
        let batch_size = job.param_i64("batch_size").unwrap_or(DEFAULT_BATCH_SIZE);
        let gradient_size = job
            .param_i64("gradient_size")
            .unwrap_or(DEFAULT_GRADIENT_SIZE);
        if gradient_size <= 0 {
            return Err(QueueError::validation(format!(
                "gradient_size 必须为正数: {gradient_size}"
            )));
        }
        let gradient_job_id = job.param_str("gradient_job_id").unwrap_or(&job.id);
        let layers = layer_names(job)?;

        let mut squared_sum = 0.0f64;
        let mut element_total = 0usize;
        for (layer_index, layer) in layers.iter().enumerate() {
            let seed = ((iteration as u64) << 32) ^ ((batch_index as u64) << 8) ^ layer_index as u64;
            let values = Self::synthetic_gradient(seed, gradient_size as usize);
            squared_sum += values.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>();
            element_total += values.len();

            let gradient = Tensor::from_f32(vec![values.len()], &values)?;
            ctx.gradients
                .submit_gradient(
                    gradient_job_id,
                    &ctx.worker_id,
                    layer,
                    iteration,
                    batch_size,
                    &gradient,
                )
                .await?;
        }

        let loss = if element_total == 0 {
            0.0
        } else {
            squared_sum / element_total as f64
        };
        debug!(
            "Job {} 完成第 {} 轮批次 {}，{} 层梯度已提交",
            job.id,
            iteration,
            batch_index,
            layers.len()
        );

        let mut results = JobResults::new();
        results.insert("iteration".to_string(), json!(iteration));
        results.insert("batch_index".to_string(), json!(batch_index));
        results.insert("layers".to_string(), json!(layers.len()));
        results.insert("loss".to_string(), json!(loss));
        results.insert("gradient_job_id".to_string(), json!(gradient_job_id));
        Ok(results)
    }
}

/// 聚合一轮迭代的梯度并写入输出目录
pub struct AggregateGradientsHandler;

#[async_trait]
impl JobHandler for AggregateGradientsHandler {
    fn job_type(&self) -> &str {
        AGGREGATE_GRADIENTS
    }

    async fn handle(&self, ctx: &JobContext, job: &Job) -> QueueResult<JobResults> {
        let iteration = required_i64(job, "iteration")?;
        let gradient_job_id = job
            .param_str("gradient_job_id")
            .ok_or_else(|| QueueError::validation(format!("Job {} 缺少 gradient_job_id", job.id)))?;
        ensure_file_component(gradient_job_id)?;

        let aggregated = ctx
            .gradients
            .get_aggregated_gradients(gradient_job_id, iteration)
            .await?;

        tokio::fs::create_dir_all(&ctx.output_dir)
            .await
            .map_err(|e| QueueError::handler_failed(format!("创建输出目录失败: {e}")))?;
        let path = ctx
            .output_dir
            .join(format!("gradients_{gradient_job_id}_{iteration}.json"));
        let body = serde_json::to_vec_pretty(&aggregated)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| QueueError::handler_failed(format!("写入 {} 失败: {e}", path.display())))?;

        info!("第 {} 轮梯度已聚合到 {}", iteration, path.display());

        let mut results = JobResults::new();
        results.insert("iteration".to_string(), json!(iteration));
        results.insert("layers".to_string(), json!(aggregated.len()));
        results.insert("path".to_string(), json!(path.display().to_string()));
        Ok(results)
    }
}

/// 输出文件名中的标识只允许字母、数字、`-` 与 `_`
fn ensure_file_component(raw: &str) -> QueueResult<()> {
    if raw.is_empty()
        || !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(QueueError::validation(format!(
            "gradient_job_id {raw:?} 不能用作文件名"
        )));
    }
    Ok(())
}
