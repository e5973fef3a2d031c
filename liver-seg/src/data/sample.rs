use crate::{Idx2d, SegError, SegResult};
use ndarray::{Array2, Array3, Array4, Axis};

/// 单个样本: 图像、标签、原始 (补边前) 尺寸与名称.
///
/// 图像为 `3 x H x W`, BGR 排列且已减去均值; 标签为 `H x W`.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// 图像.
    pub image: Array3<f32>,

    /// 逐像素类别标签, 可能含忽略值.
    pub label: Array2<u8>,

    /// 补边前的尺寸 (高, 宽).
    pub original_size: Idx2d,

    /// 样本名称.
    pub name: String,
}

impl Sample {
    /// 构建并检查样本, 见 [`Sample::check`].
    pub fn new<S: Into<String>>(
        image: Array3<f32>,
        label: Array2<u8>,
        original_size: Idx2d,
        name: S,
    ) -> SegResult<Self> {
        let sample = Self {
            image,
            label,
            original_size,
            name: name.into(),
        };
        sample.check()?;
        Ok(sample)
    }

    /// 标签 (也即图像) 的空间尺寸.
    #[inline]
    pub fn size(&self) -> Idx2d {
        self.label.dim()
    }

    /// 检查样本是否完好:
    ///
    /// 1. 图像与标签空间尺寸一致, 且不为空;
    /// 2. `original_size` 非零且不超过标签尺寸;
    /// 3. 图像中没有 inf 或 NaN.
    pub fn check(&self) -> SegResult<()> {
        let (_, h, w) = self.image.dim();
        let (lh, lw) = self.label.dim();
        if (h, w) != (lh, lw) || h == 0 || w == 0 {
            return Err(SegError::shape("样本标签", &[h, w], &[lh, lw]));
        }
        let (oh, ow) = self.original_size;
        if oh == 0 || ow == 0 || oh > h || ow > w {
            return Err(SegError::shape("样本原始尺寸", &[h, w], &[oh, ow]));
        }
        if self.image.iter().any(|v| !v.is_finite()) {
            return Err(SegError::NonFinite(self.name.clone()));
        }
        Ok(())
    }
}

/// 一批尺寸相同的样本, 沿第 0 轴堆叠.
#[derive(Clone, Debug)]
pub struct Batch {
    /// `N x 3 x H x W`.
    pub images: Array4<f32>,

    /// `N x H x W`.
    pub labels: ndarray::Array3<u8>,

    /// 各样本原始尺寸.
    pub sizes: Vec<Idx2d>,

    /// 各样本名称.
    pub names: Vec<String>,
}

impl Batch {
    /// 堆叠样本. 样本为空或尺寸不一致时返回错误.
    pub fn stack(samples: &[Sample]) -> SegResult<Self> {
        let first = samples
            .first()
            .ok_or_else(|| SegError::config("不能堆叠空批次"))?;
        for s in samples.iter() {
            if s.image.dim() != first.image.dim() {
                return Err(SegError::shape(
                    "批次图像",
                    first.image.shape(),
                    s.image.shape(),
                ));
            }
            if s.label.dim() != first.label.dim() {
                return Err(SegError::shape(
                    "批次标签",
                    first.label.shape(),
                    s.label.shape(),
                ));
            }
        }

        let images: Vec<_> = samples.iter().map(|s| s.image.view()).collect();
        let labels: Vec<_> = samples.iter().map(|s| s.label.view()).collect();
        Ok(Self {
            images: ndarray::stack(Axis(0), &images)?,
            labels: ndarray::stack(Axis(0), &labels)?,
            sizes: samples.iter().map(|s| s.original_size).collect(),
            names: samples.iter().map(|s| s.name.clone()).collect(),
        })
    }

    /// 批大小.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// 是否为空. 由 [`Batch::stack`] 构造的批次总是非空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
