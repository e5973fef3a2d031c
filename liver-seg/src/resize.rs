//! 图像 / 得分图的空间重采样.
//!
//! 双线性插值一律角点对齐: 输出第 `i` 个位置映射到输入的 `i * (in - 1) / (out - 1)`.
//! 这与不做预滤波的一阶 zoom 以及 `align_corners = true` 的上采样是同一个映射,
//! 因此尺度缩放和还原共用一套实现.

use crate::{Idx2d, SegError, SegResult};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

/// 一维采样表项: (低位索引, 高位索引, 高位权重).
type Tap = (usize, usize, f32);

fn axis_taps(src: usize, dst: usize) -> Vec<Tap> {
    debug_assert!(src > 0 && dst > 0);
    let ratio = if dst > 1 {
        (src - 1) as f64 / (dst - 1) as f64
    } else {
        0.0
    };
    (0..dst)
        .map(|i| {
            let pos = i as f64 * ratio;
            let lo = (pos.floor() as usize).min(src - 1);
            let hi = (lo + 1).min(src - 1);
            (lo, hi, (pos - lo as f64) as f32)
        })
        .collect()
}

fn check_dims(what: &'static str, (h, w): Idx2d) -> SegResult<()> {
    if h == 0 || w == 0 {
        Err(SegError::config(format!("{what} 尺寸不能为 0, 实际为 {h}x{w}")))
    } else {
        Ok(())
    }
}

/// 按缩放比例计算输出边长: `round(len * scale)`, 至少为 1.
#[inline]
pub fn zoom_len(len: usize, scale: f64) -> usize {
    ((len as f64 * scale).round() as usize).max(1)
}

/// 对 `C x H x W` 数组的每个通道做角点对齐的双线性插值, 输出 `C x out_h x out_w`.
pub fn resize_bilinear(src: ArrayView3<f32>, out: Idx2d) -> SegResult<Array3<f32>> {
    let (c, h, w) = src.dim();
    check_dims("输入", (h, w))?;
    check_dims("输出", out)?;
    if (h, w) == out {
        return Ok(src.to_owned());
    }

    let rows = axis_taps(h, out.0);
    let cols = axis_taps(w, out.1);
    let mut dst = Array3::zeros((c, out.0, out.1));
    for (plane, mut target) in src.axis_iter(Axis(0)).zip(dst.axis_iter_mut(Axis(0))) {
        for (y, &(y0, y1, fy)) in rows.iter().enumerate() {
            for (x, &(x0, x1, fx)) in cols.iter().enumerate() {
                let top = plane[[y0, x0]] * (1.0 - fx) + plane[[y0, x1]] * fx;
                let bottom = plane[[y1, x0]] * (1.0 - fx) + plane[[y1, x1]] * fx;
                target[[y, x]] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
    Ok(dst)
}

/// [`resize_bilinear`] 的伴随 (转置) 运算.
///
/// `grad` 为插值输出上的梯度 `C x out_h x out_w`, 返回插值输入 (尺寸 `src`) 上的梯度.
/// 对任意 `x`, `y` 满足 `<resize(x), y> == <x, adjoint(y)>`.
pub fn resize_bilinear_adjoint(grad: ArrayView3<f32>, src: Idx2d) -> SegResult<Array3<f32>> {
    let (c, oh, ow) = grad.dim();
    check_dims("输入", src)?;
    check_dims("输出", (oh, ow))?;
    if (oh, ow) == src {
        return Ok(grad.to_owned());
    }

    let rows = axis_taps(src.0, oh);
    let cols = axis_taps(src.1, ow);
    let mut dst = Array3::zeros((c, src.0, src.1));
    for (plane, mut target) in grad.axis_iter(Axis(0)).zip(dst.axis_iter_mut(Axis(0))) {
        for (y, &(y0, y1, fy)) in rows.iter().enumerate() {
            for (x, &(x0, x1, fx)) in cols.iter().enumerate() {
                let g = plane[[y, x]];
                target[[y0, x0]] += g * (1.0 - fy) * (1.0 - fx);
                target[[y0, x1]] += g * (1.0 - fy) * fx;
                target[[y1, x0]] += g * fy * (1.0 - fx);
                target[[y1, x1]] += g * fy * fx;
            }
        }
    }
    Ok(dst)
}

/// 把 `C x H x W` 图像在空间上按 `scale` 缩放 (一阶插值, 无抗混叠预滤波).
///
/// `scale` 必须是正有限数.
pub fn zoom(src: ArrayView3<f32>, scale: f64) -> SegResult<Array3<f32>> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(SegError::config(format!(
            "缩放比例必须是正有限数, 实际为 {scale}"
        )));
    }
    let (_, h, w) = src.dim();
    resize_bilinear(src, (zoom_len(h, scale), zoom_len(w, scale)))
}

/// 最近邻缩放标签图. 输出 `(y, x)` 取输入 `(floor(y * h / out_h), floor(x * w / out_w))`.
pub fn resize_nearest(src: ArrayView2<u8>, out: Idx2d) -> SegResult<Array2<u8>> {
    let (h, w) = src.dim();
    check_dims("输入", (h, w))?;
    check_dims("输出", out)?;
    if (h, w) == out {
        return Ok(src.to_owned());
    }
    Ok(Array2::from_shape_fn(out, |(y, x)| {
        let sy = (y * h / out.0).min(h - 1);
        let sx = (x * w / out.1).min(w - 1);
        src[[sy, sx]]
    }))
}
