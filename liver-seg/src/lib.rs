#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 CT 切片肝脏语义分割 (背景 / 肝脏) 的训练、评估与批量推理流程.
//!
//! 网络内部结构与数据增强不在本 crate 的关注范围内: 模型仅以 [`model::SegModel`]
//! 能力出现 ("把一批图像映射为逐像素类别得分图"), 数据源仅以
//! [`data::SampleSource`] 出现 ("产出 (图像, 标签, 原始尺寸, 名称) 四元组").
//!
//! # 注意
//!
//! 1. 所有输入图像均为灰度 CT 切片复制成的 3 通道图, BGR 排列并减去均值
//!   (见 [`consts::IMG_MEAN`]).
//! 2. 配置错误、数据错误、数值错误都以 [`SegError`] 返回, 训练与评估遇到即终止;
//!   只有批量推理会逐文件收集错误并继续.
//!
//! # 开发计划
//!
//! ### 学习率调度 ✅
//!
//! 多项式衰减, 可选线性预热. 纯函数, 无隐藏状态.
//!
//! 实现位于 `liver-seg/src/schedule.rs`.
//!
//! ### 混淆矩阵与 IoU / Dice ✅
//!
//! 分母下限取 1, 使整轮评估中从未出现的类别得分为 0 而不是 NaN.
//!
//! 实现位于 `liver-seg/src/metric.rs`.
//!
//! ### 多尺度预测 ✅
//!
//! 各尺度输出双线性 (角点对齐) 还原到统一尺寸后求平均.
//!
//! 实现位于 `liver-seg/src/predict.rs` 和 `liver-seg/src/resize.rs`.
//!
//! ### 评估循环 ✅
//!
//! 可选 `rayon` 并行版本, 每个工作线程持有独立的混淆矩阵, 最后求和.
//!
//! 实现位于 `liver-seg/src/eval.rs`.
//!
//! ### 训练状态机 ✅
//!
//! 调整学习率 -> 前向 -> 损失 -> 反向 -> 更新 -> 定期日志 -> 训练末段评估并按需保存检查点.
//!
//! 实现位于 `liver-seg/src/train.rs`.
//!
//! ### 检查点 ✅
//!
//! `bincode` 存储. 加载时只覆盖名称重叠的参数.
//!
//! 实现位于 `liver-seg/src/checkpoint.rs`.
//!
//! ### 批量推理 ✅
//!
//! 单文件失败只计数, 不中断整个目录. 最后总会写出 `inference_stats.json`.
//!
//! 实现位于 `liver-seg/src/infer.rs`.

/// 二维索引 / 尺寸, 以 (高, 宽) 排列.
pub type Idx2d = (usize, usize);

mod error;

pub use error::{SegError, SegResult};

pub mod consts;

pub mod resize;

pub mod schedule;

pub mod metric;

pub mod model;

pub mod nn;

pub mod loss;

pub mod optim;

pub mod predict;

pub mod eval;

pub mod checkpoint;

pub mod data;

pub mod train;

pub mod infer;

pub mod prelude;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        pub use eval::evaluate_par;
    }
}
