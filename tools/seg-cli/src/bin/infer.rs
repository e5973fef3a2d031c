//! 对测试目录批量推理, 输出掩码、叠加图与统计文件.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use liver_seg::prelude::*;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Device {
    Cuda,
    Cpu,
}

#[derive(Parser, Debug)]
#[command(name = "liver-infer", about = "肝脏分割批量推理")]
struct Args {
    /// 训练好的权重文件.
    #[arg(long = "model_path")]
    model_path: PathBuf,

    /// 待推理图像所在目录, 递归查找.
    #[arg(long = "test_dir")]
    test_dir: PathBuf,

    #[arg(long = "output_dir", default_value = "./results")]
    output_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Device::Cuda)]
    device: Device,

    /// 同时保存叠加可视化.
    #[arg(long = "save_overlay")]
    save_overlay: bool,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logger(args.log_level)?;

    if !args.model_path.is_file() {
        log::error!("模型文件不存在: {}", args.model_path.display());
        bail!("模型文件不存在: {}", args.model_path.display());
    }
    if !args.test_dir.is_dir() {
        log::error!("测试目录不存在: {}", args.test_dir.display());
        bail!("测试目录不存在: {}", args.test_dir.display());
    }
    if args.device == Device::Cuda {
        log::warn!("没有可用的 GPU 后端, 使用 CPU 推理");
    }

    let mut model = TinySegNet::new(TinySegNetConfig::default())?;
    load_weights(&mut model, &args.model_path)
        .with_context(|| format!("加载模型 {}", args.model_path.display()))?;
    log::info!("模型加载完成: {}", args.model_path.display());

    let summary = predict_directory(
        &model,
        &args.test_dir,
        &args.output_dir,
        INPUT_SIZE,
        args.save_overlay,
    )?;

    utils::sep();
    println!(
        "共 {} 张, 成功 {}, 失败 {}",
        summary.total_images, summary.processed_images, summary.failed_images
    );
    for f in &summary.failed_files {
        println!("  失败: {f}");
    }
    Ok(())
}
