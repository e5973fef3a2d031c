//! 用给定权重在验证列表上评估 mean IoU 与 Dice.

use anyhow::{Context, Result};
use clap::Parser;
use liver_seg::infer::save_prediction;
use liver_seg::prelude::*;
use std::path::PathBuf;
use utils::loader::list_dataset;

#[derive(Parser, Debug)]
#[command(name = "liver-eval", about = "在验证集上评估肝脏分割模型")]
struct Args {
    /// 模型权重文件.
    #[arg(long)]
    weight: PathBuf,

    #[arg(long, default_value = "../data")]
    data_root: PathBuf,

    #[arg(long, default_value = "dataset/lists/val_img_seg.txt")]
    list_file: PathBuf,

    #[arg(long, default_value_t = NUM_CLASSES)]
    classes_num: usize,

    #[arg(long, default_value_t = IGNORE_LABEL)]
    ignore_index: u8,

    #[arg(long, default_value = "512,512", value_parser = utils::parse_size)]
    input_size: Idx2d,

    /// 工作线程数, 缺省为可用核心数.
    #[arg(long)]
    threads: Option<usize>,

    /// 逐样本导出预测掩码的目录.
    #[arg(long)]
    save_path: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logger(args.log_level)?;

    let mut model = TinySegNet::new(TinySegNetConfig {
        num_classes: args.classes_num,
        ..TinySegNetConfig::default()
    })?;
    let report = load_weights(&mut model, &args.weight)
        .with_context(|| format!("加载权重 {}", args.weight.display()))?;
    log::info!("加载 {} 个参数", report.loaded.len());

    let ds = list_dataset(&args.data_root, &args.list_file, args.input_size, args.ignore_index)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads.unwrap_or_else(utils::cpus))
        .build()?;
    let result = pool.install(|| {
        evaluate_par(
            &model,
            &ds,
            args.input_size,
            args.classes_num,
            args.ignore_index,
        )
    })?;

    let (h, w) = args.input_size;
    utils::sep();
    println!(
        "[val with {h}x{w}] mean_IU:{:.6} Dice:{:.6}",
        result.mean_iou, result.mean_dice
    );
    for (class, (iou, dice)) in result.iou.iter().zip(result.dice.iter()).enumerate() {
        println!("  class {class}: IoU {iou:.6} Dice {dice:.6}");
    }
    utils::sep();

    if let Some(dir) = &args.save_path {
        for sample in ds.samples() {
            let sample = sample?;
            let out = save_prediction(
                &model,
                sample.image.view(),
                args.input_size,
                args.classes_num,
                dir.join(&sample.name),
            )?;
            log::debug!("保存 {}", out.display());
        }
        log::info!("预测掩码已导出到 {}", dir.display());
    }
    Ok(())
}
