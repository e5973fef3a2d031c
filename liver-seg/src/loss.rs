//! 带类别权重与忽略值的交叉熵.

use crate::resize::{resize_bilinear, resize_bilinear_adjoint};
use crate::{SegError, SegResult};
use itertools::izip;
use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};

/// 交叉熵损失.
///
/// 预测先以角点对齐的双线性插值上采样到标签分辨率, 再与标签比较.
/// 归约方式为 `sum(w[y] * nll) / sum(w[y])`, 只统计非忽略像素.
#[derive(Clone, Debug)]
pub struct Criterion {
    ignore_index: u8,
    weights: Option<Vec<f32>>,
}

impl Criterion {
    /// 构建损失函数. `weights` 中的值必须是非负有限数, 且不能全为 0.
    pub fn new(ignore_index: u8, weights: Option<Vec<f32>>) -> SegResult<Self> {
        if let Some(w) = weights.as_ref() {
            if w.is_empty() || w.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
                return Err(SegError::config(format!("非法的类别权重 {w:?}")));
            }
            if w.iter().all(|v| *v == 0.0) {
                return Err(SegError::config("类别权重不能全为 0"));
            }
        }
        Ok(Self {
            ignore_index,
            weights,
        })
    }

    /// 忽略值.
    #[inline]
    pub fn ignore_index(&self) -> u8 {
        self.ignore_index
    }

    /// 计算损失以及损失对原始 (未上采样) 得分 `N x C x h x w` 的梯度.
    ///
    /// 若整批都是忽略像素, 返回的损失为 NaN (0 / 0), 由调用方决定如何处理.
    pub fn forward(
        &self,
        scores: ArrayView4<f32>,
        labels: ArrayView3<u8>,
    ) -> SegResult<(f32, Array4<f32>)> {
        let (n, c, h, w) = scores.dim();
        let (ln, lh, lw) = labels.dim();
        if n != ln {
            return Err(SegError::shape("标签批大小", &[n], &[ln]));
        }
        if let Some(weights) = self.weights.as_ref() {
            if weights.len() != c {
                return Err(SegError::config(format!(
                    "类别权重个数 {} 与类别数 {c} 不符",
                    weights.len()
                )));
            }
        }

        let mut total = 0.0f64;
        let mut weight_sum = 0.0f64;
        let mut upsampled_grads = Vec::with_capacity(n);
        for (score, label) in scores.outer_iter().zip(labels.outer_iter()) {
            let up = resize_bilinear(score, (lh, lw))?;
            let mut grad = Array3::<f32>::zeros((c, lh, lw));
            for ((y, x), &target) in label.indexed_iter() {
                if target == self.ignore_index {
                    continue;
                }
                let target = target as usize;
                if target >= c {
                    return Err(SegError::LabelOutOfRange {
                        label: target as u32,
                        num_classes: c,
                    });
                }
                let wt = self.weights.as_ref().map_or(1.0, |w| w[target]);

                let logits = up.slice(ndarray::s![.., y, x]);
                let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                let exp = logits.mapv(|v| (v - max).exp());
                let denom = exp.sum();
                total += wt as f64 * ((denom.ln() + max - logits[target]) as f64);
                weight_sum += wt as f64;

                let mut pixel_grad = grad.slice_mut(ndarray::s![.., y, x]);
                for (cls, g, e) in izip!(0..c, pixel_grad.iter_mut(), exp.iter()) {
                    let onehot = if cls == target { 1.0 } else { 0.0 };
                    *g = wt * (e / denom - onehot);
                }
            }
            upsampled_grads.push(grad);
        }

        let loss = (total / weight_sum) as f32;
        let mut grads = Array4::<f32>::zeros((n, c, h, w));
        if weight_sum > 0.0 {
            let scale = (1.0 / weight_sum) as f32;
            for (up, mut out) in upsampled_grads.iter().zip(grads.axis_iter_mut(Axis(0))) {
                let back = resize_bilinear_adjoint(up.view(), (h, w))?;
                out.assign(&(back * scale));
            }
        }
        Ok((loss, grads))
    }
}
