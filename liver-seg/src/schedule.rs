//! 学习率调度.
//!
//! 多项式衰减 `base * (1 - i / total) ^ power`, 可选一个线性预热阶段.
//! 开启预热后, 衰减会以预热结束时刻为起点重新计算剩余步数.

use crate::consts::{WARMUP_FACTOR, WARMUP_ITERS};
use crate::{SegError, SegResult};
use serde::{Deserialize, Serialize};

/// 线性预热参数.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Warmup {
    /// 预热迭代次数.
    pub iters: usize,

    /// 第 0 次迭代时的学习率倍率, 取值 `(0, 1]`.
    pub factor: f64,
}

impl Default for Warmup {
    fn default() -> Self {
        Self {
            iters: WARMUP_ITERS,
            factor: WARMUP_FACTOR,
        }
    }
}

/// 学习率策略. 构造时完成全部参数检查, 之后 [`LrPolicy::rate`] 不会失败.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LrPolicy {
    base_lr: f64,
    total_steps: usize,
    power: f64,
    warmup: Option<Warmup>,
}

impl LrPolicy {
    /// 构建策略.
    ///
    /// 以下情况返回 [`SegError::Config`]:
    ///
    /// 1. `base_lr` 不是正有限数;
    /// 2. `total_steps == 0`;
    /// 3. `power` 不是非负有限数;
    /// 4. 开启预热时 `warmup.iters == 0`, 或 `warmup.factor` 不在 `(0, 1]`;
    /// 5. 开启预热时 `total_steps <= warmup.iters` (衰减段长度为 0).
    pub fn new(
        base_lr: f64,
        total_steps: usize,
        power: f64,
        warmup: Option<Warmup>,
    ) -> SegResult<Self> {
        if !(base_lr.is_finite() && base_lr > 0.0) {
            return Err(SegError::config(format!(
                "base_lr 必须是正有限数, 实际为 {base_lr}"
            )));
        }
        if total_steps == 0 {
            return Err(SegError::config("total_steps 必须大于 0"));
        }
        if !(power.is_finite() && power >= 0.0) {
            return Err(SegError::config(format!(
                "power 必须是非负有限数, 实际为 {power}"
            )));
        }
        if let Some(Warmup { iters, factor }) = warmup {
            if iters == 0 {
                return Err(SegError::config("warmup iters 必须大于 0"));
            }
            if !(factor > 0.0 && factor <= 1.0) {
                return Err(SegError::config(format!(
                    "warmup factor 必须位于 (0, 1], 实际为 {factor}"
                )));
            }
            if total_steps <= iters {
                return Err(SegError::config(format!(
                    "开启预热时 total_steps ({total_steps}) 必须大于 warmup iters ({iters})"
                )));
            }
        }
        Ok(Self {
            base_lr,
            total_steps,
            power,
            warmup,
        })
    }

    /// 基础学习率.
    #[inline]
    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    /// 总步数.
    #[inline]
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// 第 `iteration` 次迭代的学习率.
    ///
    /// `iteration >= total_steps` 时衰减进度按 1 计, 返回 0.
    pub fn rate(&self, iteration: usize) -> f64 {
        match self.warmup {
            Some(Warmup { iters, factor }) if iteration < iters => {
                let alpha = iteration as f64 / iters as f64;
                self.base_lr * (factor * (1.0 - alpha) + alpha)
            }
            Some(Warmup { iters, .. }) => {
                self.poly(iteration - iters, self.total_steps - iters)
            }
            None => self.poly(iteration, self.total_steps),
        }
    }

    #[inline]
    fn poly(&self, step: usize, span: usize) -> f64 {
        let progress = (step as f64 / span as f64).min(1.0);
        self.base_lr * (1.0 - progress).powf(self.power)
    }
}

/// 一次性计算学习率. 等价于 `LrPolicy::new(..)?.rate(iteration)`.
///
/// `warmup_enabled` 为 `false` 时忽略 `warmup_iters` 与 `warmup_factor`.
pub fn rate(
    base_lr: f64,
    iteration: usize,
    total_steps: usize,
    power: f64,
    warmup_enabled: bool,
    warmup_iters: usize,
    warmup_factor: f64,
) -> SegResult<f64> {
    let warmup = warmup_enabled.then_some(Warmup {
        iters: warmup_iters,
        factor: warmup_factor,
    });
    Ok(LrPolicy::new(base_lr, total_steps, power, warmup)?.rate(iteration))
}
