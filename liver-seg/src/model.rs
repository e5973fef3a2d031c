//! 分割模型能力接口.
//!
//! 核心流程只依赖 "把 `N x 3 x H x W` 图像映射为 `N x C x h x w` 类别得分图" 这一能力,
//! 网络内部结构由具体实现决定 (参见 [`crate::nn::TinySegNet`]).

use crate::{SegError, SegResult};
use ndarray::{Array4, ArrayD, ArrayView4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 前向模式. 每次前向调用都必须显式给出, 模型自身不保存模式状态.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// 训练: 记录反向传播所需的中间量, batch-norm / dropout 处于训练行为.
    Train,

    /// 推理: 不记录梯度信息, batch-norm / dropout 处于评估行为.
    Eval,
}

impl Mode {
    /// 是否需要记录梯度信息.
    #[inline]
    pub fn tracks_grad(&self) -> bool {
        matches!(self, Self::Train)
    }
}

/// 模型输出. 核心流程只使用 `primary`, 辅助头输出被忽略.
#[derive(Clone, Debug)]
pub struct ModelOutput {
    /// 主输出, `N x C x h x w`.
    pub primary: Array4<f32>,

    /// 辅助头输出 (若有).
    pub auxiliary: Vec<Array4<f32>>,
}

impl ModelOutput {
    /// 只有主输出.
    #[inline]
    pub fn single(primary: Array4<f32>) -> Self {
        Self {
            primary,
            auxiliary: Vec::new(),
        }
    }
}

/// 分割模型.
pub trait SegModel {
    /// 训练模式前向时记录的中间量, 供 [`SegModel::backward`] 使用.
    type Cache;

    /// 输出类别数 `C`.
    fn num_classes(&self) -> usize;

    /// 前向计算.
    ///
    /// 仅当 `mode` 为 [`Mode::Train`] 时返回 `Some(cache)`. 推理只需要 `&self`,
    /// 所以评估期间参数保持只读.
    fn forward(
        &self,
        images: ArrayView4<f32>,
        mode: Mode,
    ) -> SegResult<(ModelOutput, Option<Self::Cache>)>;

    /// 由主输出上的梯度 (与 `primary` 同形状) 求各参数的梯度.
    fn backward(&self, cache: &Self::Cache, grad_primary: ArrayView4<f32>) -> SegResult<ParamSet>;

    /// 参数集合.
    fn params(&self) -> &ParamSet;

    /// 可变参数集合.
    fn params_mut(&mut self) -> &mut ParamSet;
}

/// 具名参数集合: 名称 -> 张量. 也用作梯度与动量缓冲的容器.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

/// [`ParamSet::load_overlapping`] 的结果.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadReport {
    /// 成功覆盖的参数.
    pub loaded: Vec<String>,

    /// 只存在于来源中的参数 (被丢弃).
    pub unexpected: Vec<String>,

    /// 只存在于目标中的参数 (保持原值).
    pub missing: Vec<String>,
}

impl ParamSet {
    /// 空集合.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入 (或替换) 一个参数, 返回旧值.
    pub fn insert<S: Into<String>>(&mut self, name: S, tensor: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.tensors.insert(name.into(), tensor)
    }

    /// 按名称获取.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    /// 按名称获取, 不存在时返回 [`SegError::Config`].
    pub fn require(&self, name: &str) -> SegResult<&ArrayD<f32>> {
        self.get(name)
            .ok_or_else(|| SegError::config(format!("缺少参数 `{name}`")))
    }

    /// 按名称获取可变引用.
    #[inline]
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<f32>> {
        self.tensors.get_mut(name)
    }

    /// 参数个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// 是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// 按名称升序迭代.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 按名称升序可变迭代.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ArrayD<f32>)> {
        self.tensors.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// 清空.
    #[inline]
    pub fn clear(&mut self) {
        self.tensors.clear();
    }

    /// 所有元素是否都是有限数.
    pub fn is_finite(&self) -> bool {
        self.tensors
            .values()
            .all(|t| t.iter().all(|v| v.is_finite()))
    }

    /// 逐参数累加 `other`. 本集合中没有的参数直接复制过来.
    ///
    /// 同名参数形状不同时返回 [`SegError::ShapeMismatch`].
    pub fn accumulate(&mut self, other: &ParamSet) -> SegResult<()> {
        for (name, tensor) in other.tensors.iter() {
            match self.tensors.get_mut(name) {
                Some(acc) if acc.shape() == tensor.shape() => *acc += tensor,
                Some(acc) => return Err(SegError::shape("梯度", acc.shape(), tensor.shape())),
                None => {
                    self.tensors.insert(name.clone(), tensor.clone());
                }
            }
        }
        Ok(())
    }

    /// 只加载名称重叠的参数. 来源可以是本集合的真子集或部分重叠集合.
    ///
    /// 以下情况返回错误, 且本集合保持不变:
    ///
    /// 1. 重叠参数形状不同, 返回 [`SegError::CheckpointMismatch`];
    /// 2. 两者完全没有重叠 (显然不是同一个模型的权重), 返回 [`SegError::Config`].
    pub fn load_overlapping(&mut self, source: &ParamSet) -> SegResult<LoadReport> {
        let mut report = LoadReport::default();
        for (name, tensor) in source.tensors.iter() {
            match self.tensors.get(name) {
                Some(own) if own.shape() != tensor.shape() => {
                    return Err(SegError::CheckpointMismatch {
                        name: name.clone(),
                        model: own.shape().to_vec(),
                        checkpoint: tensor.shape().to_vec(),
                    })
                }
                Some(_) => report.loaded.push(name.clone()),
                None => report.unexpected.push(name.clone()),
            }
        }
        if report.loaded.is_empty() && !self.is_empty() {
            return Err(SegError::config("检查点与模型没有任何同名参数"));
        }

        for name in report.loaded.iter() {
            self.tensors.insert(name.clone(), source.tensors[name].clone());
        }
        report.missing = self
            .tensors
            .keys()
            .filter(|k| !source.tensors.contains_key(*k))
            .cloned()
            .collect();
        Ok(report)
    }
}
