use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use trainq_errors::{QueueError, QueueResult};

/// 张量元素类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DType {
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float64")]
    F64,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    /// 单个元素占用的字节数
    pub fn size_of(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// 两种精度混合时取较宽者
    pub fn widen(self, other: DType) -> DType {
        if self == DType::F64 || other == DType::F64 {
            DType::F64
        } else {
            DType::F32
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" => Ok(DType::F32),
            "float64" => Ok(DType::F64),
            _ => Err(QueueError::serialization(format!("不支持的张量类型: {s}"))),
        }
    }
}

impl_sqlx_text_enum!(DType);

/// 形状为 `shape` 的张量，元素在内存中统一以 f64 保存
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub values: Vec<f64>,
}

impl Tensor {
    /// 创建张量，元素个数必须与形状一致
    pub fn new(shape: Vec<usize>, dtype: DType, values: Vec<f64>) -> QueueResult<Self> {
        let expected = element_count(&shape)?;
        if values.len() != expected {
            return Err(QueueError::validation(format!(
                "张量形状 {shape:?} 需要 {expected} 个元素，实际为 {}",
                values.len()
            )));
        }
        Ok(Self {
            shape,
            dtype,
            values,
        })
    }

    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> QueueResult<Self> {
        Self::new(
            shape,
            DType::F32,
            values.iter().map(|v| f64::from(*v)).collect(),
        )
    }

    pub fn from_f64(shape: Vec<usize>, values: Vec<f64>) -> QueueResult<Self> {
        Self::new(shape, DType::F64, values)
    }

    /// 零维标量
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Self {
            shape: Vec::new(),
            dtype,
            values: vec![value],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 编码为小端字节序，F32 张量在此处收窄精度
    pub fn encode(&self) -> EncodedTensor {
        let mut bytes = Vec::with_capacity(self.values.len() * self.dtype.size_of());
        for value in &self.values {
            match self.dtype {
                DType::F32 => bytes.extend_from_slice(&(*value as f32).to_le_bytes()),
                DType::F64 => bytes.extend_from_slice(&value.to_le_bytes()),
            }
        }
        EncodedTensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            bytes,
        }
    }
}

/// 存储形式的张量：原始字节加上形状与类型元数据
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTensor {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub bytes: Vec<u8>,
}

impl EncodedTensor {
    pub fn decode(&self) -> QueueResult<Tensor> {
        let width = self.dtype.size_of();
        let expected = element_count(&self.shape)?
            .checked_mul(width)
            .ok_or_else(|| QueueError::serialization(format!("张量形状过大: {:?}", self.shape)))?;
        if self.bytes.len() != expected {
            return Err(QueueError::serialization(format!(
                "张量数据长度不匹配: 期望 {expected} 字节，实际 {} 字节",
                self.bytes.len()
            )));
        }

        let values = self
            .bytes
            .chunks_exact(width)
            .map(|chunk| match self.dtype {
                DType::F32 => f64::from(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
                DType::F64 => f64::from_le_bytes([
                    chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
                ]),
            })
            .collect();

        Ok(Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            values,
        })
    }

    /// 形状以JSON数组形式持久化
    pub fn shape_json(&self) -> String {
        serde_json::Value::from(self.shape.iter().map(|d| *d as u64).collect::<Vec<_>>()).to_string()
    }

    pub fn parse_shape(raw: &str) -> QueueResult<Vec<usize>> {
        serde_json::from_str(raw)
            .map_err(|e| QueueError::serialization(format!("无效的张量形状 {raw}: {e}")))
    }
}

/// 形状对应的元素个数，零维张量为 1；乘积溢出时报错
pub fn element_count(shape: &[usize]) -> QueueResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |count, dim| count.checked_mul(*dim))
        .ok_or_else(|| QueueError::serialization(format!("张量形状过大: {shape:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_rejected() {
        let result = Tensor::new(vec![2, 2], DType::F32, vec![1.0, 2.0, 3.0]);
        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    #[test]
    fn test_scalar_has_one_element() {
        let t = Tensor::scalar(2.5, DType::F64);
        assert_eq!(element_count(&t.shape).unwrap(), 1);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_f32_encoding_is_little_endian() {
        let t = Tensor::from_f32(vec![1], &[1.0]).unwrap();
        let encoded = t.encode();
        assert_eq!(encoded.bytes, vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_decode_preserves_shape_and_dtype() {
        let t = Tensor::from_f64(vec![2, 3], vec![0.5, -1.0, 2.0, 3.25, 0.0, 7.0]).unwrap();
        let decoded = t.encode().decode().unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_decode_rejects_truncated_bytes() {
        let mut encoded = Tensor::from_f32(vec![2], &[1.0, 2.0]).unwrap().encode();
        encoded.bytes.pop();
        assert!(matches!(encoded.decode(), Err(QueueError::Serialization(_))));
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        assert!(matches!(
            element_count(&[usize::MAX, 2]),
            Err(QueueError::Serialization(_))
        ));
        assert!(matches!(
            Tensor::new(vec![usize::MAX, 2], DType::F32, Vec::new()),
            Err(QueueError::Serialization(_))
        ));

        let encoded = EncodedTensor {
            shape: vec![usize::MAX / 4 + 1],
            dtype: DType::F64,
            bytes: Vec::new(),
        };
        assert!(matches!(encoded.decode(), Err(QueueError::Serialization(_))));
    }

    #[test]
    fn test_shape_json() {
        let encoded = Tensor::from_f32(vec![2, 1], &[1.0, 2.0]).unwrap().encode();
        assert_eq!(encoded.shape_json(), "[2,1]");
        assert_eq!(EncodedTensor::parse_shape("[2,1]").unwrap(), vec![2, 1]);
        assert_eq!(EncodedTensor::parse_shape("[]").unwrap(), Vec::<usize>::new());
        assert!(EncodedTensor::parse_shape("oops").is_err());
    }

    #[test]
    fn test_dtype_parse_and_widen() {
        assert_eq!("float64".parse::<DType>().unwrap(), DType::F64);
        assert!("int8".parse::<DType>().is_err());
        assert_eq!(DType::F32.widen(DType::F64), DType::F64);
        assert_eq!(DType::F32.widen(DType::F32), DType::F32);
    }
}
