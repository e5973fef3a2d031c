//! 在列表数据集上训练分割模型, 并在验证集 Dice 提升时保存检查点.

use anyhow::{bail, Context, Result};
use clap::Parser;
use liver_seg::prelude::*;
use std::fs;
use std::path::PathBuf;
use utils::loader::{list_dataset, resolve_data_dir};

#[derive(Parser, Debug)]
#[command(name = "liver-train", about = "训练 CT 肝脏分割模型")]
struct Args {
    /// 数据集根目录, 缺省时见 `LIVER_SEG_DATA_DIR` 或 `$HOME/dataset/chaos`.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 训练列表, 相对路径按数据集根目录解析.
    #[arg(long, default_value = "dataset/lists/train_img_seg.txt")]
    train_list: PathBuf,

    /// 验证列表.
    #[arg(long, default_value = "dataset/lists/val_img_seg.txt")]
    val_list: PathBuf,

    /// JSON 训练配置. 命令行显式给出的参数覆盖其中的同名项.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_parser = utils::parse_size)]
    input_size: Option<Idx2d>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    num_steps: Option<usize>,

    /// 训练末段的评估间隔, 缺省由批大小推导.
    #[arg(long)]
    save_steps: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    #[arg(long)]
    power: Option<f64>,

    #[arg(long)]
    momentum: Option<f64>,

    #[arg(long)]
    weight_decay: Option<f64>,

    /// 打开学习率预热.
    #[arg(long)]
    warmup: bool,

    #[arg(long)]
    classes_num: Option<usize>,

    #[arg(long)]
    ignore_index: Option<u8>,

    /// 检查点目录.
    #[arg(long)]
    ckpt_dir: Option<PathBuf>,

    /// 从已有检查点恢复权重 (可部分匹配).
    #[arg(long)]
    restore_from: Option<PathBuf>,

    /// 把标签中的非 0 值视为肝脏.
    #[arg(long)]
    binarize: bool,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

impl Args {
    fn train_config(&self) -> Result<TrainConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("读取配置 {}", path.display()))?;
                serde_json::from_str::<TrainConfig>(&text)
                    .with_context(|| format!("解析配置 {}", path.display()))?
            }
            None => TrainConfig::default(),
        };
        if let Some(bs) = self.batch_size {
            cfg = cfg.with_batch_size(bs);
        }
        if let Some(v) = self.input_size {
            cfg.input_size = v;
        }
        if let Some(v) = self.num_steps {
            cfg.total_steps = v;
        }
        if self.save_steps.is_some() {
            cfg.save_steps = self.save_steps;
        }
        if let Some(v) = self.lr {
            cfg.base_lr = v;
        }
        if let Some(v) = self.power {
            cfg.power = v;
        }
        if let Some(v) = self.momentum {
            cfg.momentum = v;
        }
        if let Some(v) = self.weight_decay {
            cfg.weight_decay = v;
        }
        if self.warmup && cfg.warmup.is_none() {
            cfg.warmup = Some(Warmup::default());
        }
        if let Some(v) = self.classes_num {
            cfg.num_classes = v;
        }
        if let Some(v) = self.ignore_index {
            cfg.ignore_label = v;
        }
        if let Some(v) = &self.ckpt_dir {
            cfg.ckpt_dir = v.clone();
        }
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logger(args.log_level)?;

    let Some(root) = resolve_data_dir(args.data_dir.clone()) else {
        bail!("无法确定数据集目录, 请使用 --data-dir");
    };
    let cfg = args.train_config()?;
    log::debug!("训练配置: {cfg:?}");

    let train = list_dataset(&root, &args.train_list, cfg.input_size, cfg.ignore_label)?
        .with_binarize(args.binarize);
    let val = list_dataset(&root, &args.val_list, cfg.input_size, cfg.ignore_label)?
        .with_binarize(args.binarize);
    log::info!("训练集 {} 个样本, 验证集 {} 个样本", train.len(), val.len());

    let mut model = TinySegNet::new(TinySegNetConfig {
        num_classes: cfg.num_classes,
        ..TinySegNetConfig::default()
    })?;
    if let Some(path) = &args.restore_from {
        let report = load_weights(&mut model, path)
            .with_context(|| format!("恢复权重 {}", path.display()))?;
        log::info!("从 {} 恢复 {} 个参数", path.display(), report.loaded.len());
    }

    let batches = TrainBatches::new(&train, cfg.batch_size, cfg.total_steps)?;
    let trainer = Trainer::new(cfg)?;
    let state = trainer.run(model, batches, &val)?;

    utils::sep();
    println!("最佳 Dice: {:.6}", state.best_dice);
    match &state.last_checkpoint {
        Some(path) => println!("检查点: {}", path.display()),
        None => println!("未保存检查点"),
    }
    Ok(())
}
