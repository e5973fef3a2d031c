//! 多尺度预测.
//!
//! 每个尺度上: 输入按比例缩放 -> 模型推理 -> 主输出以角点对齐双线性插值还原到目标尺寸.
//! 最终结果为各尺度原始得分的算术平均, 排列为 `H x W x C`.

use crate::model::{Mode, SegModel};
use crate::resize::{resize_bilinear, zoom};
use crate::{Idx2d, SegError, SegResult};
use ndarray::{Array2, Array3, ArrayView3, Axis};

/// 整图单尺度预测. 输入 `3 x H x W`, 输出还原到 `target` 的 `C x target_h x target_w` 得分图.
///
/// 总是以 [`Mode::Eval`] 调用模型, 只使用主输出.
pub fn predict_whole<M: SegModel>(
    model: &M,
    image: ArrayView3<f32>,
    target: Idx2d,
) -> SegResult<Array3<f32>> {
    let batch = image.insert_axis(Axis(0));
    let (output, _) = model.forward(batch, Mode::Eval)?;
    let scores = output
        .primary
        .outer_iter()
        .next()
        .ok_or_else(|| SegError::shape("模型输出", &[1], &[0]))?;
    resize_bilinear(scores, target)
}

/// 多尺度预测, 返回 `target_h x target_w x num_classes` 的平均得分图.
///
/// 以下情况返回 [`SegError::Config`], 且不会调用模型:
///
/// 1. `scales` 为空;
/// 2. 任一尺度不是正有限数;
/// 3. 模型类别数与 `num_classes` 不符.
pub fn predict_multiscale<M: SegModel>(
    model: &M,
    image: ArrayView3<f32>,
    target: Idx2d,
    scales: &[f64],
    num_classes: usize,
) -> SegResult<Array3<f32>> {
    if scales.is_empty() {
        return Err(SegError::config("尺度列表不能为空"));
    }
    if let Some(bad) = scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
        return Err(SegError::config(format!("非法的尺度 {bad}")));
    }
    if model.num_classes() != num_classes {
        return Err(SegError::config(format!(
            "模型类别数 {} 与指定类别数 {num_classes} 不符",
            model.num_classes()
        )));
    }

    let mut full = Array3::<f32>::zeros((num_classes, target.0, target.1));
    for &scale in scales {
        let scaled = zoom(image, scale)?;
        let probs = predict_whole(model, scaled.view(), target)?;
        if probs.dim().0 != num_classes {
            return Err(SegError::shape(
                "模型输出",
                &[num_classes, target.0, target.1],
                probs.shape(),
            ));
        }
        full += &probs;
    }
    full /= scales.len() as f32;
    Ok(full.permuted_axes([1, 2, 0]))
}

/// 沿最后一个 (类别) 轴取 argmax. 并列时取较小的类别编号.
pub fn argmax_classes(probs: ArrayView3<f32>) -> Array2<u8> {
    probs.map_axis(Axis(2), |lane| {
        let mut best = 0;
        let mut best_v = f32::NEG_INFINITY;
        for (c, &v) in lane.iter().enumerate() {
            if v > best_v {
                best = c;
                best_v = v;
            }
        }
        best as u8
    })
}
