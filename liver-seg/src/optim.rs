//! 带动量与权重衰减的随机梯度下降.

use crate::model::ParamSet;
use crate::{SegError, SegResult};

/// SGD 优化器.
///
/// 单步更新规则:
///
/// 1. `d = g + weight_decay * p`;
/// 2. 首次更新时 `buf = d`, 之后 `buf = momentum * buf + d`;
/// 3. `p -= lr * buf`.
///
/// 梯度由 [`Sgd::accumulate`] 累加, [`Sgd::zero_grad`] 清空.
#[derive(Clone, Debug)]
pub struct Sgd {
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    grads: ParamSet,
    buffers: ParamSet,
}

impl Sgd {
    /// 创建优化器. 三个超参数都必须是非负有限数, `momentum` 还必须小于 1.
    pub fn new(lr: f64, momentum: f64, weight_decay: f64) -> SegResult<Self> {
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !(valid(lr) && valid(momentum) && momentum < 1.0 && valid(weight_decay)) {
            return Err(SegError::config(format!(
                "非法的 SGD 参数: lr = {lr}, momentum = {momentum}, weight_decay = {weight_decay}"
            )));
        }
        Ok(Self {
            lr,
            momentum,
            weight_decay,
            grads: ParamSet::new(),
            buffers: ParamSet::new(),
        })
    }

    /// 设置当前学习率.
    #[inline]
    pub fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// 当前学习率.
    #[inline]
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// 清空累积梯度. 动量缓冲保持不变.
    #[inline]
    pub fn zero_grad(&mut self) {
        self.grads.clear();
    }

    /// 累加梯度.
    #[inline]
    pub fn accumulate(&mut self, grads: &ParamSet) -> SegResult<()> {
        self.grads.accumulate(grads)
    }

    /// 当前累积的梯度.
    #[inline]
    pub fn grads(&self) -> &ParamSet {
        &self.grads
    }

    /// 动量缓冲.
    #[inline]
    pub fn momentum_buffers(&self) -> &ParamSet {
        &self.buffers
    }

    /// 用累积梯度更新 `params`. 没有梯度的参数保持不变.
    pub fn step(&mut self, params: &mut ParamSet) -> SegResult<()> {
        let lr = self.lr as f32;
        let momentum = self.momentum as f32;
        let wd = self.weight_decay as f32;

        for (name, p) in params.iter_mut() {
            let Some(g) = self.grads.get(name) else {
                continue;
            };
            if g.shape() != p.shape() {
                return Err(SegError::shape("梯度", p.shape(), g.shape()));
            }

            let mut d = g.clone();
            if wd != 0.0 {
                d.scaled_add(wd, &*p);
            }
            let update = if momentum != 0.0 {
                match self.buffers.get_mut(name) {
                    Some(buf) => {
                        buf.mapv_inplace(|v| v * momentum);
                        *buf += &d;
                        buf.clone()
                    }
                    None => {
                        self.buffers.insert(name, d.clone());
                        d
                    }
                }
            } else {
                d
            };
            p.scaled_add(-lr, &update);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn single(v: f32) -> ParamSet {
        let mut p = ParamSet::new();
        p.insert("w", arr1(&[v]).into_dyn());
        p
    }

    #[test]
    fn test_plain_step() {
        let mut params = single(1.0);
        let mut sgd = Sgd::new(0.1, 0.0, 0.0).unwrap();
        sgd.accumulate(&single(2.0)).unwrap();
        sgd.step(&mut params).unwrap();
        assert!(float_eq(params.get("w").unwrap()[[0]], 0.8));
        assert!(sgd.momentum_buffers().is_empty());
    }

    #[test]
    fn test_momentum_and_decay() {
        let mut params = single(1.0);
        let mut sgd = Sgd::new(0.1, 0.9, 0.5).unwrap();

        // d = 1 + 0.5 * 1 = 1.5, buf = 1.5, p = 1 - 0.15 = 0.85.
        sgd.accumulate(&single(1.0)).unwrap();
        sgd.step(&mut params).unwrap();
        assert!(float_eq(params.get("w").unwrap()[[0]], 0.85));

        // d = 1 + 0.425 = 1.425, buf = 1.35 + 1.425 = 2.775, p = 0.85 - 0.2775.
        sgd.zero_grad();
        sgd.accumulate(&single(1.0)).unwrap();
        sgd.step(&mut params).unwrap();
        assert!(float_eq(sgd.momentum_buffers().get("w").unwrap()[[0]], 2.775));
        assert!(float_eq(params.get("w").unwrap()[[0]], 0.5725));
    }

    #[test]
    fn test_zero_grad_accumulate() {
        let mut sgd = Sgd::new(0.1, 0.9, 0.0).unwrap();
        sgd.accumulate(&single(1.0)).unwrap();
        sgd.accumulate(&single(1.0)).unwrap();
        assert_eq!(sgd.grads().get("w").unwrap()[[0]], 2.0);
        sgd.zero_grad();
        assert!(sgd.grads().is_empty());

        // 没有梯度时参数不动.
        let mut params = single(3.0);
        sgd.step(&mut params).unwrap();
        assert_eq!(params, single(3.0));
    }

    #[test]
    fn test_invalid() {
        assert!(Sgd::new(-0.1, 0.9, 0.0).is_err());
        assert!(Sgd::new(0.1, 1.0, 0.0).is_err());
        assert!(Sgd::new(0.1, 0.9, f64::NAN).is_err());
    }
}
