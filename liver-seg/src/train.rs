//! 训练循环.
//!
//! 每次迭代: 设定学习率 -> 清空梯度 -> 取批次 -> 前向 -> 损失 -> 反向 -> 参数更新
//! -> 定期日志 -> (训练末段或最后一步) 评估并在 Dice 严格提升时保存检查点.
//!
//! 训练状态显式保存在 [`TrainingState`] 中, 由调用方持有, 因此可以用任意构造的状态单独
//! 测试每一步.

use crate::checkpoint::Checkpoint;
use crate::consts::{
    CLASS_WEIGHTS, DATASET_TAG, EVAL_WINDOW, IGNORE_LABEL, INPUT_SIZE, LOG_INTERVAL, NUM_CLASSES,
    TRAIN_EPOCH_LEN,
};
use crate::data::{Batch, SampleSource};
use crate::eval::{evaluate, EvalReport};
use crate::loss::Criterion;
use crate::model::{Mode, SegModel};
use crate::optim::Sgd;
use crate::schedule::{LrPolicy, Warmup};
use crate::{Idx2d, SegError, SegResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 由批大小推导评估间隔: `TRAIN_EPOCH_LEN / batch_size`, 至少为 1.
#[inline]
pub fn default_save_steps(batch_size: usize) -> usize {
    (TRAIN_EPOCH_LEN / batch_size.max(1)).max(1)
}

/// 训练参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// 基础学习率.
    pub base_lr: f64,

    /// 总迭代次数.
    pub total_steps: usize,

    /// 多项式衰减指数.
    pub power: f64,

    /// 线性预热. `None` 表示关闭.
    pub warmup: Option<Warmup>,

    /// SGD 动量.
    pub momentum: f64,

    /// 权重衰减.
    pub weight_decay: f64,

    /// 批大小.
    pub batch_size: usize,

    /// 训练末段的评估间隔. 为 `None` 时由 `batch_size` 推导, 见 [`TrainConfig::save_steps`].
    pub save_steps: Option<usize>,

    /// 训练末段窗口长度.
    pub eval_window: usize,

    /// 日志间隔.
    pub log_interval: usize,

    /// 类别数.
    pub num_classes: usize,

    /// 忽略值.
    pub ignore_label: u8,

    /// 验证时的预测尺寸.
    pub input_size: Idx2d,

    /// 交叉熵类别权重.
    pub class_weights: Option<Vec<f32>>,

    /// 数据集名称, 用作检查点文件名前缀.
    pub dataset_tag: String,

    /// 检查点目录.
    pub ckpt_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        let batch_size = 8;
        Self {
            base_lr: 1e-2,
            total_steps: 40000,
            power: 0.9,
            warmup: None,
            momentum: 0.9,
            weight_decay: 1e-4,
            batch_size,
            save_steps: None,
            eval_window: EVAL_WINDOW,
            log_interval: LOG_INTERVAL,
            num_classes: NUM_CLASSES,
            ignore_label: IGNORE_LABEL,
            input_size: INPUT_SIZE,
            class_weights: Some(CLASS_WEIGHTS.to_vec()),
            dataset_tag: DATASET_TAG.to_owned(),
            ckpt_dir: PathBuf::from("checkpoints"),
        }
    }
}

impl TrainConfig {
    /// 修改批大小. 显式给出的 `save_steps` 保持不变.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// 实际使用的评估间隔: 显式值优先, 否则为 [`default_save_steps`]`(batch_size)`.
    #[inline]
    pub fn save_steps(&self) -> usize {
        self.save_steps
            .unwrap_or_else(|| default_save_steps(self.batch_size))
    }

    /// 学习率策略.
    #[inline]
    pub fn lr_policy(&self) -> SegResult<LrPolicy> {
        LrPolicy::new(self.base_lr, self.total_steps, self.power, self.warmup)
    }

    /// 检查所有参数. 任何不合法的组合都返回 [`SegError::Config`], 不做默认值替换.
    pub fn validate(&self) -> SegResult<()> {
        self.lr_policy()?;
        Sgd::new(self.base_lr, self.momentum, self.weight_decay)?;
        Criterion::new(self.ignore_label, self.class_weights.clone())?;

        let positive = [
            ("batch_size", self.batch_size),
            ("save_steps", self.save_steps()),
            ("log_interval", self.log_interval),
            ("num_classes", self.num_classes),
            ("input_size.0", self.input_size.0),
            ("input_size.1", self.input_size.1),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(SegError::config(format!("{name} 必须大于 0")));
        }
        if self.num_classes > u8::MAX as usize {
            return Err(SegError::config(format!(
                "类别数 {} 超出 u8 标签范围",
                self.num_classes
            )));
        }
        if (self.ignore_label as usize) < self.num_classes {
            return Err(SegError::config(format!(
                "忽略值 {} 与合法类别冲突",
                self.ignore_label
            )));
        }
        if let Some(w) = self.class_weights.as_ref() {
            if w.len() != self.num_classes {
                return Err(SegError::config(format!(
                    "类别权重个数 {} 与类别数 {} 不符",
                    w.len(),
                    self.num_classes
                )));
            }
        }
        if self.dataset_tag.is_empty() {
            return Err(SegError::config("dataset_tag 不能为空"));
        }
        Ok(())
    }

    /// 第 `iteration` 次迭代后是否评估.
    ///
    /// 只在训练末段 `eval_window` 步内、每 `save_steps` 步评估一次 (跳过前两步),
    /// 最后一步总是评估.
    pub fn should_evaluate(&self, iteration: usize) -> bool {
        let last = iteration + 1 == self.total_steps;
        let in_window = iteration + self.eval_window > self.total_steps;
        let periodic = iteration > 1 && iteration % self.save_steps() == 0 && in_window;
        periodic || last
    }
}

/// `dice` 是否严格优于 `best`. 相等或 NaN 都不算提升.
#[inline]
pub fn improves(best: f64, dice: f64) -> bool {
    dice > best
}

/// 训练状态. 由 [`Trainer`] 每步更新.
#[derive(Clone, Debug)]
pub struct TrainingState<M> {
    /// 模型.
    pub model: M,

    /// 优化器 (含动量缓冲).
    pub optim: Sgd,

    /// 当前 (或最近完成的) 迭代序号.
    pub iteration: usize,

    /// 当前学习率.
    pub lr: f64,

    /// 最近一次的损失.
    pub loss: f32,

    /// 本次训练迄今最佳 Dice.
    pub best_dice: f64,

    /// 最近保存的检查点.
    pub last_checkpoint: Option<PathBuf>,
}

/// 训练器. 持有经过检查的配置、学习率策略与损失函数.
#[derive(Clone, Debug)]
pub struct Trainer {
    cfg: TrainConfig,
    policy: LrPolicy,
    criterion: Criterion,
}

impl Trainer {
    /// 检查配置并创建训练器.
    pub fn new(cfg: TrainConfig) -> SegResult<Self> {
        cfg.validate()?;
        let policy = cfg.lr_policy()?;
        let criterion = Criterion::new(cfg.ignore_label, cfg.class_weights.clone())?;
        Ok(Self {
            cfg,
            policy,
            criterion,
        })
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &TrainConfig {
        &self.cfg
    }

    /// 学习率策略.
    #[inline]
    pub fn policy(&self) -> &LrPolicy {
        &self.policy
    }

    /// 初始训练状态. 模型类别数必须与配置一致.
    pub fn init_state<M: SegModel>(&self, model: M) -> SegResult<TrainingState<M>> {
        if model.num_classes() != self.cfg.num_classes {
            return Err(SegError::config(format!(
                "模型类别数 {} 与配置 {} 不符",
                model.num_classes(),
                self.cfg.num_classes
            )));
        }
        let lr = self.policy.rate(0);
        Ok(TrainingState {
            model,
            optim: Sgd::new(lr, self.cfg.momentum, self.cfg.weight_decay)?,
            iteration: 0,
            lr,
            loss: f32::NAN,
            best_dice: 0.0,
            last_checkpoint: None,
        })
    }

    /// 以 `state.iteration` 为序号执行一步训练, 返回损失.
    ///
    /// 损失非有限时返回 [`SegError::NonFiniteLoss`], 此时参数尚未被修改.
    pub fn step<M: SegModel>(&self, state: &mut TrainingState<M>, batch: &Batch) -> SegResult<f32> {
        let iteration = state.iteration;
        let lr = self.policy.rate(iteration);
        state.optim.set_lr(lr);
        state.lr = lr;
        state.optim.zero_grad();

        let (output, cache) = state.model.forward(batch.images.view(), Mode::Train)?;
        let cache =
            cache.ok_or_else(|| SegError::config("模型在训练模式下没有返回反向传播缓存"))?;
        let (loss, grad) = self
            .criterion
            .forward(output.primary.view(), batch.labels.view())?;
        if !loss.is_finite() {
            log::error!("iteration:{iteration:5} 出现非有限损失 {loss}, 停止训练");
            return Err(SegError::NonFiniteLoss { iteration, loss });
        }

        let grads = state.model.backward(&cache, grad.view())?;
        state.optim.accumulate(&grads)?;
        state.optim.step(state.model.params_mut())?;
        state.loss = loss;

        if iteration % self.cfg.log_interval == 0 {
            log::info!("iteration:{iteration:5} lr:{lr:.6} loss:{loss:.5}");
        }
        Ok(loss)
    }

    /// 在验证集上评估当前模型.
    pub fn validate<M, V>(&self, model: &M, val: &V) -> SegResult<EvalReport>
    where
        M: SegModel,
        V: SampleSource + ?Sized,
    {
        let report = evaluate(
            model,
            val.samples(),
            self.cfg.input_size,
            self.cfg.num_classes,
            self.cfg.ignore_label,
        )?;
        let (h, w) = self.cfg.input_size;
        log::info!(
            "[验证 {h}x{w}] mean_IU:{:.6} Dice:{:.6}",
            report.mean_iou,
            report.mean_dice
        );
        Ok(report)
    }

    /// 若 `dice` 严格优于 `state.best_dice`, 保存检查点并更新最佳值, 返回检查点路径.
    ///
    /// 最佳值只有在检查点写入成功之后才会更新.
    pub fn checkpoint_if_improved<M: SegModel>(
        &self,
        state: &mut TrainingState<M>,
        dice: f64,
    ) -> SegResult<Option<PathBuf>> {
        if !improves(state.best_dice, dice) {
            log::info!(
                "Dice {dice:.6} 未超过最佳值 {:.6}, 不保存",
                state.best_dice
            );
            return Ok(None);
        }
        log::info!(
            "保存最佳模型: iteration {} Dice:{dice:.6} (此前最佳 {:.6})",
            state.iteration,
            state.best_dice
        );
        let ckpt = Checkpoint::capture(&state.model, &self.cfg.dataset_tag, state.iteration, dice);
        let path = ckpt.save_to(&self.cfg.ckpt_dir)?;
        state.best_dice = dice;
        state.last_checkpoint = Some(path.clone());
        Ok(Some(path))
    }

    /// 完整训练.
    ///
    /// `batches` 在 `total_steps` 步之前耗尽时返回 [`SegError::SourceExhausted`].
    pub fn run<M, B, V>(&self, model: M, batches: B, val: &V) -> SegResult<TrainingState<M>>
    where
        M: SegModel,
        B: IntoIterator<Item = SegResult<Batch>>,
        V: SampleSource + ?Sized,
    {
        let mut state = self.init_state(model)?;
        let mut batches = batches.into_iter();
        log::info!(
            "开始训练: total_steps {}, batch_size {}, base_lr {}, 验证集 {} 个样本",
            self.cfg.total_steps,
            self.cfg.batch_size,
            self.cfg.base_lr,
            val.len()
        );

        for iteration in 0..self.cfg.total_steps {
            state.iteration = iteration;
            let batch = batches
                .next()
                .ok_or(SegError::SourceExhausted { iteration })??;
            self.step(&mut state, &batch)?;

            if self.cfg.should_evaluate(iteration) {
                let report = self.validate(&state.model, val)?;
                self.checkpoint_if_improved(&mut state, report.mean_dice)?;
            }
        }

        log::info!("训练结束, 最佳 Dice {:.6}", state.best_dice);
        Ok(state)
    }
}
