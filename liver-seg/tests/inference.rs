//! 目录批量推理的部分失败容忍.

use image::{Rgb, RgbImage};
use liver_seg::infer::{find_images, STATS_FILE};
use liver_seg::prelude::*;
use std::fs;

fn model() -> TinySegNet {
    TinySegNet::new(TinySegNetConfig::default()).unwrap()
}

#[test]
fn test_partial_failure_is_tolerated() {
    let test_dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    fs::create_dir_all(test_dir.path().join("case1")).unwrap();

    for i in 0..4 {
        let img = RgbImage::from_fn(12, 10, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 90]));
        img.save(test_dir.path().join(format!("slice_{i}.png"))).unwrap();
    }
    RgbImage::from_pixel(9, 7, Rgb([5, 5, 5]))
        .save(test_dir.path().join("case1/deep.JPG"))
        .unwrap();
    // 扩展名像图像, 内容不是.
    fs::write(test_dir.path().join("broken.png"), b"not an image").unwrap();
    fs::write(test_dir.path().join("notes.txt"), b"ignored").unwrap();

    let found = find_images(test_dir.path()).unwrap();
    assert_eq!(found.len(), 6);

    let summary = predict_directory(&model(), test_dir.path(), out.path(), (16, 16), true).unwrap();
    assert_eq!(summary.total_images, 6);
    assert_eq!(summary.processed_images, 5);
    assert_eq!(summary.failed_images, 1);
    assert_eq!(summary.failed_files.len(), 1);
    assert!(summary.failed_files[0].ends_with("broken.png"));

    // 掩码尺寸还原到原图.
    let mask = image::open(out.path().join("slice_0_mask.png")).unwrap().to_luma8();
    assert_eq!(mask.dimensions(), (12, 10));
    assert!(mask.pixels().all(|p| p[0] == 0 || p[0] == 255));
    let deep = image::open(out.path().join("case1/deep_mask.png")).unwrap();
    assert_eq!((deep.width(), deep.height()), (9, 7));
    assert!(out.path().join("overlays/case1/deep_overlay.png").is_file());

    let stats: InferenceSummary =
        serde_json::from_str(&fs::read_to_string(out.path().join(STATS_FILE)).unwrap()).unwrap();
    assert_eq!(stats, summary);
}

#[test]
fn test_empty_directory_still_writes_summary() {
    let test_dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let summary = predict_directory(&model(), test_dir.path(), out.path(), (16, 16), false).unwrap();
    assert_eq!(summary.total_images, 0);
    assert!(out.path().join(STATS_FILE).is_file());
    assert!(!out.path().join("overlays").exists());
}

#[test]
fn test_missing_directory_is_fatal() {
    let out = tempfile::tempdir().unwrap();
    let missing = out.path().join("nope");
    assert!(matches!(
        predict_directory(&model(), &missing, out.path(), (16, 16), false),
        Err(SegError::NotFound(_))
    ));
    assert!(!out.path().join(STATS_FILE).exists());
}
