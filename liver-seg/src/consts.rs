//! 通用常量.

use crate::Idx2d;

/// 单通道颜色.
pub mod gray {
    /// 单通道黑色.
    pub const BLACK: u8 = 0b_0000_0000;

    /// 单通道白色.
    pub const WHITE: u8 = 0b_1111_1111;
}

/// 类别标签.
pub mod class {
    /// 背景的类别值.
    pub const BACKGROUND: u8 = 0;

    /// 肝脏的类别值.
    pub const LIVER: u8 = 1;

    /// 像素是否是肝脏?
    #[inline]
    pub const fn is_liver(p: u8) -> bool {
        matches!(p, LIVER)
    }
}

/// 图像均值, BGR 排列.
pub const IMG_MEAN: [f32; 3] = [104.00698793, 116.66876762, 122.67891434];

/// 网络输入尺寸 (高, 宽).
pub const INPUT_SIZE: Idx2d = (512, 512);

/// 不参与损失和指标计算的标签值.
pub const IGNORE_LABEL: u8 = 255;

/// 背景 + 肝脏.
pub const NUM_CLASSES: usize = 2;

/// 交叉熵的类别权重 (背景 = 1, 肝脏 = 12).
pub const CLASS_WEIGHTS: [f32; NUM_CLASSES] = [1.0, 12.0];

/// 预热迭代次数.
pub const WARMUP_ITERS: usize = 500;

/// 预热起点的学习率倍率.
pub const WARMUP_FACTOR: f64 = 1.0 / 3.0;

/// 训练日志间隔.
pub const LOG_INTERVAL: usize = 20;

/// 训练末段的评估窗口: 只有最后这么多步内才会按 `save_steps` 间隔评估.
pub const EVAL_WINDOW: usize = 2000;

/// 训练集一轮的切片数, 用于推导 `save_steps = TRAIN_EPOCH_LEN / batch_size`.
pub const TRAIN_EPOCH_LEN: usize = 479;

/// 叠加可视化时原图的权重. 掩码权重为 `1 - OVERLAY_ALPHA`.
pub const OVERLAY_ALPHA: f32 = 0.7;

/// 默认的数据集名称, 也是检查点文件名前缀.
pub const DATASET_TAG: &str = "ChaosCT";
