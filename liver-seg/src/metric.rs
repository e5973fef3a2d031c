//! 混淆矩阵与分割指标.
//!
//! `M[i, j]` 为真值类别 `i` 被预测为类别 `j` 的像素个数. 忽略像素由调用方事先滤除,
//! 本模块不感知忽略值.

use crate::{SegError, SegResult};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use std::ops::{Add, AddAssign};

/// `C x C` 混淆矩阵. 计数以 `f64` 累加.
///
/// 不变式: 所有元素之和等于迄今为止累加过的 (未被忽略的) 像素个数.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfusionMatrix {
    data: Array2<f64>,
}

/// 由混淆矩阵导出的指标.
#[derive(Clone, Debug, PartialEq)]
pub struct SegScores {
    /// 各类别 IoU.
    pub iou: Array1<f64>,

    /// IoU 均值.
    pub mean_iou: f64,

    /// 各类别 Dice.
    pub dice: Array1<f64>,

    /// Dice 均值.
    pub mean_dice: f64,
}

impl ConfusionMatrix {
    /// 全零矩阵. `num_classes == 0` 时返回 [`SegError::Config`].
    pub fn new(num_classes: usize) -> SegResult<Self> {
        if num_classes == 0 {
            return Err(SegError::config("num_classes 必须大于 0"));
        }
        Ok(Self {
            data: Array2::zeros((num_classes, num_classes)),
        })
    }

    /// 从已有矩阵构造. 矩阵必须是非空方阵, 且元素为非负有限数.
    pub fn from_array(data: Array2<f64>) -> SegResult<Self> {
        let (h, w) = data.dim();
        if h == 0 || h != w {
            return Err(SegError::shape("混淆矩阵", &[h, h], &[h, w]));
        }
        if data.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(SegError::config("混淆矩阵元素必须是非负有限数"));
        }
        Ok(Self { data })
    }

    /// 类别数.
    #[inline]
    pub fn num_classes(&self) -> usize {
        self.data.nrows()
    }

    /// 底层矩阵的只读视图.
    #[inline]
    pub fn view(&self) -> ArrayView2<f64> {
        self.data.view()
    }

    /// 累计像素数.
    #[inline]
    pub fn total(&self) -> f64 {
        self.data.sum()
    }

    /// 带检查地累加另一个矩阵.
    pub fn merge(&mut self, other: &ConfusionMatrix) -> SegResult<()> {
        if self.num_classes() != other.num_classes() {
            return Err(SegError::shape(
                "混淆矩阵",
                self.data.shape(),
                other.data.shape(),
            ));
        }
        self.data += &other.data;
        Ok(())
    }

    /// 计算 IoU 与 Dice.
    ///
    /// 分母以 1 为下限: 某类别在真值和预测中都从未出现时, 其分子也为 0,
    /// 于是 IoU 与 Dice 取 0, 而不是 NaN.
    pub fn scores(&self) -> SegScores {
        let pos = self.data.sum_axis(Axis(1));
        let res = self.data.sum_axis(Axis(0));
        let tp = self.data.diag().to_owned();

        let iou = ndarray::Zip::from(&tp)
            .and(&pos)
            .and(&res)
            .map_collect(|&t, &p, &r| t / (p + r - t).max(1.0));
        let dice = ndarray::Zip::from(&tp)
            .and(&pos)
            .and(&res)
            .map_collect(|&t, &p, &r| 2.0 * t / (p + r).max(1.0));

        // 构造时保证了非空.
        let mean_iou = iou.mean().unwrap_or_default();
        let mean_dice = dice.mean().unwrap_or_default();
        SegScores {
            iou,
            mean_iou,
            dice,
            mean_dice,
        }
    }
}

/// # Panics
///
/// 类别数不同时 panic. 需要错误返回时使用 [`ConfusionMatrix::merge`].
impl AddAssign<&ConfusionMatrix> for ConfusionMatrix {
    fn add_assign(&mut self, rhs: &ConfusionMatrix) {
        assert_eq!(self.num_classes(), rhs.num_classes(), "混淆矩阵类别数不符");
        self.data += &rhs.data;
    }
}

/// # Panics
///
/// 类别数不同时 panic.
impl Add for ConfusionMatrix {
    type Output = ConfusionMatrix;

    fn add(mut self, rhs: ConfusionMatrix) -> Self::Output {
        self += &rhs;
        self
    }
}

/// 由成对的真值与预测标签计算混淆矩阵.
///
/// 两者先展平, 组合索引 `gt * num_classes + pred` 计数后散射进矩阵.
/// 任一标签 `>= num_classes` 时返回 [`SegError::LabelOutOfRange`], 长度不同时返回
/// [`SegError::ShapeMismatch`].
pub fn confusion_matrix(gt: &[u8], pred: &[u8], num_classes: usize) -> SegResult<ConfusionMatrix> {
    let mut cm = ConfusionMatrix::new(num_classes)?;
    if gt.len() != pred.len() {
        return Err(SegError::shape("预测标签", &[gt.len()], &[pred.len()]));
    }

    let mut counts = vec![0u64; num_classes * num_classes];
    for (&g, &p) in gt.iter().zip(pred) {
        for label in [g, p] {
            if label as usize >= num_classes {
                return Err(SegError::LabelOutOfRange {
                    label: label as u32,
                    num_classes,
                });
            }
        }
        counts[g as usize * num_classes + p as usize] += 1;
    }

    for (index, &count) in counts.iter().enumerate() {
        cm.data[[index / num_classes, index % num_classes]] = count as f64;
    }
    Ok(cm)
}
