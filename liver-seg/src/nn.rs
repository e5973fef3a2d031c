//! 轻量参考网络.
//!
//! `k x k` 平均池化编码, 后接 `1 x 1` 卷积分类头, 输出分辨率为输入的 `1 / k`.
//! 输出比标签小, 因此损失函数的上采样与其伴随运算都会被实际用到.

use crate::model::{Mode, ModelOutput, ParamSet, SegModel};
use crate::{SegError, SegResult};
use ndarray::{s, Array1, Array2, Array4, ArrayView4, Axis, Ix1, Ix2};

const WEIGHT: &str = "head.weight";
const BIAS: &str = "head.bias";

/// [`TinySegNet`] 的结构参数.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TinySegNetConfig {
    /// 输入通道数.
    pub in_channels: usize,

    /// 类别数.
    pub num_classes: usize,

    /// 池化窗口边长.
    pub pool: usize,
}

impl Default for TinySegNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            num_classes: crate::consts::NUM_CLASSES,
            pool: 2,
        }
    }
}

/// 训练模式前向时保存的池化特征.
#[derive(Clone, Debug)]
pub struct TinyCache {
    pooled: Array4<f32>,
}

/// 池化 + `1 x 1` 卷积的分割网络.
#[derive(Clone, Debug)]
pub struct TinySegNet {
    cfg: TinySegNetConfig,
    params: ParamSet,
}

impl TinySegNet {
    /// 以确定性的小权重初始化, 偏置为 0.
    pub fn new(cfg: TinySegNetConfig) -> SegResult<Self> {
        if cfg.in_channels == 0 || cfg.num_classes == 0 || cfg.pool == 0 {
            return Err(SegError::config(format!("非法的网络结构参数 {cfg:?}")));
        }
        let weight = Array2::from_shape_fn((cfg.num_classes, cfg.in_channels), |(c, k)| {
            ((c * cfg.in_channels + k) as f32 * 0.7 + 0.3).sin() * 0.01
        });
        let mut params = ParamSet::new();
        params.insert(WEIGHT, weight.into_dyn());
        params.insert(BIAS, Array1::<f32>::zeros(cfg.num_classes).into_dyn());
        Ok(Self { cfg, params })
    }

    /// 结构参数.
    #[inline]
    pub fn config(&self) -> TinySegNetConfig {
        self.cfg
    }

    /// 输出空间尺寸: `ceil(len / pool)`.
    #[inline]
    pub fn output_len(&self, len: usize) -> usize {
        (len + self.cfg.pool - 1) / self.cfg.pool
    }

    /// 平均池化. 边缘不足一个窗口时按实际像素数平均.
    fn pool(&self, images: ArrayView4<f32>) -> Array4<f32> {
        let (n, c, h, w) = images.dim();
        let k = self.cfg.pool;
        let (oh, ow) = (self.output_len(h), self.output_len(w));
        Array4::from_shape_fn((n, c, oh, ow), |(b, ch, y, x)| {
            let window = images.slice(s![b, ch, y * k..((y + 1) * k).min(h), x * k..((x + 1) * k).min(w)]);
            window.mean().unwrap_or_default()
        })
    }

    fn head(&self) -> SegResult<(ndarray::ArrayView2<f32>, ndarray::ArrayView1<f32>)> {
        let weight = self.params.require(WEIGHT)?.view().into_dimensionality::<Ix2>()?;
        let bias = self.params.require(BIAS)?.view().into_dimensionality::<Ix1>()?;
        Ok((weight, bias))
    }
}

impl SegModel for TinySegNet {
    type Cache = TinyCache;

    #[inline]
    fn num_classes(&self) -> usize {
        self.cfg.num_classes
    }

    fn forward(
        &self,
        images: ArrayView4<f32>,
        mode: Mode,
    ) -> SegResult<(ModelOutput, Option<TinyCache>)> {
        let (n, c, h, w) = images.dim();
        if c != self.cfg.in_channels {
            return Err(SegError::shape(
                "输入通道",
                &[n, self.cfg.in_channels, h, w],
                images.shape(),
            ));
        }
        if n == 0 || h == 0 || w == 0 {
            return Err(SegError::shape("输入", &[1, c, 1, 1], images.shape()));
        }

        let (weight, bias) = self.head()?;
        let pooled = self.pool(images);
        let (_, _, oh, ow) = pooled.dim();
        let mut scores = Array4::<f32>::zeros((n, self.cfg.num_classes, oh, ow));
        for (features, mut out) in pooled.outer_iter().zip(scores.outer_iter_mut()) {
            for (cls, mut plane) in out.outer_iter_mut().enumerate() {
                plane.fill(bias[cls]);
                for (k, feature) in features.outer_iter().enumerate() {
                    plane.scaled_add(weight[[cls, k]], &feature);
                }
            }
        }

        let cache = mode.tracks_grad().then_some(TinyCache { pooled });
        Ok((ModelOutput::single(scores), cache))
    }

    fn backward(&self, cache: &TinyCache, grad_primary: ArrayView4<f32>) -> SegResult<ParamSet> {
        let (n, _, oh, ow) = cache.pooled.dim();
        let expected = [n, self.cfg.num_classes, oh, ow];
        if grad_primary.shape() != expected {
            return Err(SegError::shape("输出梯度", &expected, grad_primary.shape()));
        }

        let mut grad_w = Array2::<f32>::zeros((self.cfg.num_classes, self.cfg.in_channels));
        for (cls, g) in grad_primary.axis_iter(Axis(1)).enumerate() {
            for (k, f) in cache.pooled.axis_iter(Axis(1)).enumerate() {
                grad_w[[cls, k]] = (&g * &f).sum();
            }
        }
        let grad_b = grad_primary.sum_axis(Axis(0)).sum_axis(Axis(1)).sum_axis(Axis(1));

        let mut grads = ParamSet::new();
        grads.insert(WEIGHT, grad_w.into_dyn());
        grads.insert(BIAS, grad_b.into_dyn());
        Ok(grads)
    }

    #[inline]
    fn params(&self) -> &ParamSet {
        &self.params
    }

    #[inline]
    fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn net() -> TinySegNet {
        TinySegNet::new(TinySegNetConfig::default()).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let x = Array4::<f32>::zeros((2, 3, 5, 8));
        let (out, cache) = net().forward(x.view(), Mode::Eval).unwrap();
        assert_eq!(out.primary.dim(), (2, 2, 3, 4));
        assert!(out.auxiliary.is_empty());
        assert!(cache.is_none());

        let (_, cache) = net().forward(x.view(), Mode::Train).unwrap();
        assert!(cache.is_some());
    }

    #[test]
    fn test_pool_edges() {
        let x = Array::from_shape_fn((1, 3, 3, 3), |(_, _, y, x)| (y * 3 + x) as f32);
        let pooled = net().pool(x.view());
        // 左上窗口 {0, 1, 3, 4}, 右下窗口只有 {8}.
        assert_eq!(pooled[[0, 0, 0, 0]], 2.0);
        assert_eq!(pooled[[0, 0, 1, 1]], 8.0);
    }

    #[test]
    fn test_wrong_channels() {
        let x = Array4::<f32>::zeros((1, 1, 4, 4));
        assert!(net().forward(x.view(), Mode::Eval).is_err());
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let model = net();
        let x = Array::from_shape_fn((2, 3, 4, 4), |(b, c, y, x)| {
            ((b * 7 + c * 5 + y * 3 + x) as f32 * 0.37).sin()
        });
        // 损失 L = sum(scores * r), 于是 dL/dscores = r.
        let r = Array::from_shape_fn((2, 2, 2, 2), |(b, c, y, x)| {
            ((b + c * 2 + y * 3 + x * 5) as f32 * 0.11).cos()
        });
        let loss = |m: &TinySegNet| -> f32 {
            let (out, _) = m.forward(x.view(), Mode::Eval).unwrap();
            (&out.primary * &r).sum()
        };

        let (_, cache) = model.forward(x.view(), Mode::Train).unwrap();
        let grads = model.backward(&cache.unwrap(), r.view()).unwrap();

        let eps = 1e-2;
        for name in [WEIGHT, BIAS] {
            let analytic = grads.get(name).unwrap();
            for (idx, g) in analytic.indexed_iter() {
                let mut plus = model.clone();
                plus.params_mut().get_mut(name).unwrap()[&idx] += eps;
                let mut minus = model.clone();
                minus.params_mut().get_mut(name).unwrap()[&idx] -= eps;
                let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
                assert!((numeric - g).abs() < 1e-2, "{name}{idx:?}: {numeric} vs {g}");
            }
        }
    }
}
