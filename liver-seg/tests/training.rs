//! 基于磁盘数据集的端到端训练.

use image::{GrayImage, Luma};
use liver_seg::prelude::*;
use std::fs;
use std::path::Path;

const SIZE: u32 = 8;

/// 上半部分是亮的 "肝脏", 下半部分是暗背景. `rows` 控制图像高度, 用于测试补边.
fn write_pair(root: &Path, name: &str, rows: u32) {
    let img = GrayImage::from_fn(SIZE, rows, |x, y| {
        Luma([if y < rows / 2 { 200 + x as u8 } else { 30 }])
    });
    let seg = GrayImage::from_fn(SIZE, rows, |_, y| Luma([u8::from(y < rows / 2)]));
    img.save(root.join("img").join(format!("{name}.png"))).unwrap();
    seg.save(root.join("seg").join(format!("{name}.png"))).unwrap();
}

fn write_list(root: &Path, file: &str, names: &[&str]) {
    let body: String = names
        .iter()
        .map(|n| format!("img/{n}.png seg/{n}.png\n"))
        .collect();
    fs::write(root.join(file), body).unwrap();
}

#[test]
fn test_train_and_checkpoint() {
    let _ = simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init();

    let data = tempfile::tempdir().unwrap();
    let ckpt_dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(data.path().join("img")).unwrap();
    fs::create_dir_all(data.path().join("seg")).unwrap();
    for name in ["a", "b", "c"] {
        write_pair(data.path(), name, SIZE);
    }
    write_pair(data.path(), "short", 6);
    write_list(data.path(), "train.txt", &["a", "b", "c"]);
    write_list(data.path(), "val.txt", &["a", "short"]);

    let crop = (SIZE as usize, SIZE as usize);
    let train = ListDataset::open(data.path(), data.path().join("train.txt"), crop, IGNORE_LABEL)
        .unwrap();
    let val = ListDataset::open(data.path(), data.path().join("val.txt"), crop, IGNORE_LABEL)
        .unwrap();
    let short = val.load(1).unwrap();
    assert_eq!(short.original_size, (6, 8));
    assert_eq!(short.label[[7, 0]], IGNORE_LABEL);

    let cfg = TrainConfig {
        base_lr: 1e-4,
        total_steps: 6,
        input_size: crop,
        log_interval: 2,
        ckpt_dir: ckpt_dir.path().to_owned(),
        ..TrainConfig::default()
    }
    .with_batch_size(2);
    let trainer = Trainer::new(cfg).unwrap();
    let batches = TrainBatches::new(&train, 2, 6).unwrap();
    assert_eq!(batches.len(), 6);

    let model = TinySegNet::new(TinySegNetConfig::default()).unwrap();
    let state = trainer.run(model, batches, &val).unwrap();
    assert_eq!(state.iteration, 5);
    assert!(state.loss.is_finite());

    // 最后一步总会评估, 而任何预测在两类中至少一类上 Dice 为正.
    assert!(state.best_dice > 0.0);
    let path = state.last_checkpoint.clone().unwrap();
    assert!(path.is_file());

    let ckpt = Checkpoint::load(&path).unwrap();
    assert_eq!(ckpt.iteration, 5);
    assert_eq!(ckpt.dice, state.best_dice);
    assert_eq!(&ckpt.params, state.model.params());

    // 加载回新模型后, 评估结果一致.
    let mut fresh = TinySegNet::new(TinySegNetConfig::default()).unwrap();
    let report = load_weights(&mut fresh, &path).unwrap();
    assert_eq!(report.loaded.len(), 2);
    assert!(report.missing.is_empty());
    let before = trainer.validate(&state.model, &val).unwrap();
    let after = trainer.validate(&fresh, &val).unwrap();
    assert_eq!(before, after);
    assert_eq!(after.mean_dice, state.best_dice);
}

#[test]
fn test_bad_sample_aborts_training() {
    let data = tempfile::tempdir().unwrap();
    fs::create_dir_all(data.path().join("img")).unwrap();
    fs::create_dir_all(data.path().join("seg")).unwrap();
    write_pair(data.path(), "a", SIZE);
    write_list(data.path(), "train.txt", &["a", "missing"]);

    let crop = (SIZE as usize, SIZE as usize);
    let train = ListDataset::open(data.path(), data.path().join("train.txt"), crop, IGNORE_LABEL)
        .unwrap();
    let cfg = TrainConfig {
        total_steps: 4,
        input_size: crop,
        ckpt_dir: data.path().join("ckpt"),
        ..TrainConfig::default()
    }
    .with_batch_size(1);
    let trainer = Trainer::new(cfg).unwrap();
    let batches = TrainBatches::new(&train, 1, 4).unwrap();
    let model = TinySegNet::new(TinySegNetConfig::default()).unwrap();
    let val: Vec<Sample> = Vec::new();
    assert!(matches!(
        trainer.run(model, batches, &val),
        Err(SegError::NotFound(_))
    ));
    assert!(!data.path().join("ckpt").exists());
}
