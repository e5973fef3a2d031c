//! 运行时错误.

use std::path::PathBuf;
use thiserror::Error;

/// 训练、评估、推理过程中的错误.
///
/// 大致分为三类: 配置错误 (`Config`, `CheckpointMismatch`, `NotFound`),
/// 数据错误 (`ShapeMismatch`, `NonFinite`, `LabelOutOfRange`, `SourceExhausted`,
/// 以及底层 I/O / 图像解码错误), 数值错误 (`NonFiniteLoss`).
#[derive(Debug, Error)]
pub enum SegError {
    /// 参数配置不合法.
    #[error("配置错误: {0}")]
    Config(String),

    /// 数组尺寸不符.
    #[error("{what} 尺寸不符: 期望 {expected:?}, 实际 {actual:?}")]
    ShapeMismatch {
        /// 出错的对象.
        what: &'static str,
        /// 期望尺寸.
        expected: Vec<usize>,
        /// 实际尺寸.
        actual: Vec<usize>,
    },

    /// 样本中含有 inf 或 NaN. 参数为样本名称.
    #[error("样本 `{0}` 含有非有限值")]
    NonFinite(String),

    /// 标签 (或预测) 值超出 `[0, num_classes)`, 且不是忽略值.
    #[error("标签值 {label} 超出类别范围 [0, {num_classes})")]
    LabelOutOfRange {
        /// 越界的标签值.
        label: u32,
        /// 类别数.
        num_classes: usize,
    },

    /// 损失值为 inf 或 NaN, 训练必须立即停止.
    #[error("第 {iteration} 次迭代出现非有限损失 {loss}")]
    NonFiniteLoss {
        /// 出错的迭代序号.
        iteration: usize,
        /// 损失值.
        loss: f32,
    },

    /// 训练数据源在预定步数之前耗尽.
    #[error("数据源在第 {iteration} 次迭代时耗尽")]
    SourceExhausted {
        /// 耗尽时的迭代序号.
        iteration: usize,
    },

    /// 检查点与模型不兼容.
    #[error("检查点参数 `{name}` 与模型不兼容: 模型 {model:?}, 检查点 {checkpoint:?}")]
    CheckpointMismatch {
        /// 参数名称.
        name: String,
        /// 模型中该参数的形状.
        model: Vec<usize>,
        /// 检查点中该参数的形状.
        checkpoint: Vec<usize>,
    },

    /// 文件或目录不存在.
    #[error("路径不存在: {}", .0.display())]
    NotFound(PathBuf),

    /// ndarray 形状错误.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    /// 底层 I/O 错误.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 图像读写错误.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// 检查点序列化错误.
    #[error("序列化错误: {0}")]
    Serialize(#[from] bincode::Error),

    /// 统计信息 JSON 错误.
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 本 crate 的通用结果类型.
pub type SegResult<T> = Result<T, SegError>;

impl SegError {
    /// 快速构造 [`SegError::Config`].
    #[inline]
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// 快速构造 [`SegError::ShapeMismatch`].
    #[inline]
    pub(crate) fn shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
