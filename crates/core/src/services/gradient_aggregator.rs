use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument};
use trainq_errors::{QueueError, QueueResult};

use crate::metrics;
use crate::models::{element_count, GradientContribution, Tensor};
use crate::traits::GradientRepository;

/// 梯度聚合
///
/// 同一 (job_id, iteration) 下，每层的聚合结果为按批大小加权的平均值，
/// 计算统一使用 f64。
#[derive(Clone)]
pub struct GradientAggregator {
    gradients: Arc<dyn GradientRepository>,
    source_job_id: Option<String>,
}

impl GradientAggregator {
    pub fn new(gradients: Arc<dyn GradientRepository>) -> Self {
        Self {
            gradients,
            source_job_id: None,
        }
    }

    /// 以 `job_id` 为来源提交梯度；该Job重新执行时覆盖之前的贡献而不是重复计入
    pub fn for_source_job(&self, job_id: &str) -> Self {
        Self {
            gradients: self.gradients.clone(),
            source_job_id: Some(job_id.to_string()),
        }
    }

    /// 记录一份梯度贡献，返回贡献标识
    #[instrument(skip(self, gradient))]
    pub async fn submit_gradient(
        &self,
        job_id: &str,
        worker_id: &str,
        layer_name: &str,
        iteration: i64,
        batch_size: i64,
        gradient: &Tensor,
    ) -> QueueResult<String> {
        if batch_size <= 0 {
            return Err(QueueError::validation(format!(
                "批大小必须为正数: {batch_size}"
            )));
        }
        if layer_name.is_empty() {
            return Err(QueueError::validation("层名称不能为空"));
        }
        if gradient.values.len() != element_count(&gradient.shape)? {
            return Err(QueueError::validation(format!(
                "梯度形状 {:?} 与元素个数 {} 不一致",
                gradient.shape,
                gradient.values.len()
            )));
        }

        let contribution = GradientContribution::new(
            job_id,
            worker_id,
            layer_name,
            iteration,
            batch_size,
            gradient.encode(),
        )
        .with_source(self.source_job_id.clone());
        self.gradients.insert(&contribution).await?;

        metrics::record_gradient_submitted(layer_name);
        debug!(
            "收到梯度: job={} layer={} iteration={} batch={}",
            job_id, layer_name, iteration, batch_size
        );
        Ok(contribution.id)
    }

    /// 按层聚合，未提交任何贡献时返回空映射
    pub async fn get_aggregated_gradients(
        &self,
        job_id: &str,
        iteration: i64,
    ) -> QueueResult<BTreeMap<String, Tensor>> {
        let contributions = self
            .gradients
            .find_by_job_iteration(job_id, iteration)
            .await?;

        let mut by_layer: BTreeMap<String, Vec<(Tensor, i64)>> = BTreeMap::new();
        for contribution in contributions {
            let tensor = contribution.payload.decode()?;
            by_layer
                .entry(contribution.layer_name)
                .or_default()
                .push((tensor, contribution.batch_size));
        }

        by_layer
            .into_iter()
            .map(|(layer, parts)| {
                let mean = weighted_mean(&parts)
                    .map_err(|e| QueueError::validation(format!("层 {layer} 聚合失败: {e}")))?;
                Ok((layer, mean))
            })
            .collect()
    }
}

/// 按权重求平均：Σ(tensor × weight) / Σweight
///
/// 所有张量形状必须一致；结果的精度取输入中最宽的一种。
pub fn weighted_mean(parts: &[(Tensor, i64)]) -> QueueResult<Tensor> {
    let Some((first, _)) = parts.first() else {
        return Err(QueueError::validation("没有可聚合的梯度"));
    };

    let mut sums = vec![0.0f64; first.values.len()];
    let mut total_weight = 0.0f64;
    let mut dtype = first.dtype;

    for (tensor, weight) in parts {
        if tensor.shape != first.shape {
            return Err(QueueError::validation(format!(
                "梯度形状不一致: {:?} 与 {:?}",
                tensor.shape, first.shape
            )));
        }
        let weight = *weight as f64;
        for (sum, value) in sums.iter_mut().zip(&tensor.values) {
            *sum += value * weight;
        }
        total_weight += weight;
        dtype = dtype.widen(tensor.dtype);
    }

    if total_weight <= 0.0 {
        return Err(QueueError::validation("批大小之和必须为正数"));
    }

    Tensor::new(
        first.shape.clone(),
        dtype,
        sums.into_iter().map(|sum| sum / total_weight).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DType;

    #[test]
    fn test_weighted_mean_by_batch_size() {
        let parts = vec![
            (Tensor::scalar(1.0, DType::F64), 10),
            (Tensor::scalar(2.0, DType::F64), 20),
        ];
        let mean = weighted_mean(&parts).unwrap();
        assert!((mean.values[0] - 5.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_mean_elementwise() {
        let parts = vec![
            (Tensor::from_f64(vec![2], vec![1.0, 4.0]).unwrap(), 1),
            (Tensor::from_f64(vec![2], vec![3.0, 0.0]).unwrap(), 3),
        ];
        let mean = weighted_mean(&parts).unwrap();
        assert_eq!(mean.shape, vec![2]);
        assert!((mean.values[0] - 2.5).abs() < 1e-12);
        assert!((mean.values[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_mean_single_part_is_identity() {
        let t = Tensor::from_f32(vec![3], &[0.5, -0.25, 8.0]).unwrap();
        let mean = weighted_mean(&[(t.clone(), 7)]).unwrap();
        assert_eq!(mean, t);
    }

    #[test]
    fn test_weighted_mean_rejects_shape_mismatch() {
        let parts = vec![
            (Tensor::from_f64(vec![2], vec![1.0, 2.0]).unwrap(), 1),
            (Tensor::from_f64(vec![1, 2], vec![1.0, 2.0]).unwrap(), 1),
        ];
        assert!(matches!(weighted_mean(&parts), Err(QueueError::Validation(_))));
    }

    #[test]
    fn test_weighted_mean_widens_dtype() {
        let parts = vec![
            (Tensor::scalar(1.0, DType::F32), 1),
            (Tensor::scalar(3.0, DType::F64), 1),
        ];
        assert_eq!(weighted_mean(&parts).unwrap().dtype, DType::F64);
    }

    #[test]
    fn test_weighted_mean_empty_input() {
        assert!(weighted_mean(&[]).is_err());
    }
}
