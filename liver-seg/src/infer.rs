//! 目录批量推理.
//!
//! 逐个处理测试目录下的图像, 输出分割掩码与可选的叠加可视化. 单张图像失败只记录并计数,
//! 不会中断整个目录; 最后总会写出 `inference_stats.json`.

use crate::consts::class::is_liver;
use crate::consts::gray::{BLACK, WHITE};
use crate::consts::OVERLAY_ALPHA;
use crate::data::image_io::{to_bgr_tensor, to_gray_image};
use crate::model::SegModel;
use crate::predict::{argmax_classes, predict_multiscale};
use crate::resize::resize_nearest;
use crate::{Idx2d, SegError, SegResult};
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use itertools::Itertools;
use ndarray::{Array2, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 识别为图像的扩展名 (不区分大小写).
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

/// 统计文件名.
pub const STATS_FILE: &str = "inference_stats.json";

/// 叠加图子目录.
pub const OVERLAY_DIR: &str = "overlays";

/// 批量推理统计.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceSummary {
    /// 找到的图像数.
    pub total_images: usize,

    /// 成功处理的图像数.
    pub processed_images: usize,

    /// 失败的图像数.
    pub failed_images: usize,

    /// 失败的图像路径.
    pub failed_files: Vec<String>,

    /// 输出目录.
    pub output_dir: String,
}

impl InferenceSummary {
    /// 以缩进 JSON 写入 `writer` 并刷新. 任何写入错误都会返回.
    pub fn write_to<W: Write>(&self, writer: W) -> SegResult<()> {
        let mut writer = BufWriter::new(writer);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .map_or(false, |e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// 递归查找 `dir` 下所有图像文件, 按路径排序. 目录不存在时返回 [`SegError::NotFound`].
pub fn find_images<P: AsRef<Path>>(dir: P) -> SegResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(SegError::NotFound(dir.to_owned()));
    }
    let images: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                log::warn!("跳过无法访问的目录项: {err}");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && has_image_extension(e.path()))
        .map(|e| e.into_path())
        .sorted()
        .collect();
    log::info!("在 {} 中找到 {} 张图像", dir.display(), images.len());
    Ok(images)
}

/// 缩放到网络输入尺寸并转为 BGR 去均值张量 `3 x H x W`.
pub fn preprocess_image(img: &RgbImage, input_size: Idx2d) -> SegResult<ndarray::Array3<f32>> {
    let (h, w) = input_size;
    if h == 0 || w == 0 {
        return Err(SegError::config("input_size 不能为 0"));
    }
    let (iw, ih) = img.dimensions();
    if (ih as usize, iw as usize) == input_size {
        return Ok(to_bgr_tensor(img));
    }
    let resized = imageops::resize(img, w as u32, h as u32, FilterType::Triangle);
    Ok(to_bgr_tensor(&resized))
}

/// 预测单张图像的类别图, 以最近邻方式还原到原图尺寸.
pub fn predict_mask<M: SegModel>(
    model: &M,
    img: &RgbImage,
    input_size: Idx2d,
) -> SegResult<Array2<u8>> {
    let tensor = preprocess_image(img, input_size)?;
    let probs = predict_multiscale(model, tensor.view(), input_size, &[1.0], model.num_classes())?;
    let classes = argmax_classes(probs.view());
    let (w, h) = img.dimensions();
    resize_nearest(classes.view(), (h as usize, w as usize))
}

/// 类别图 -> 可视化掩码: 肝脏为白色, 其余为黑色.
pub fn mask_to_image(mask: ArrayView2<u8>) -> GrayImage {
    to_gray_image(mask.mapv(|c| if is_liver(c) { WHITE } else { BLACK }).view())
}

/// 原图与红色肝脏掩码按 `OVERLAY_ALPHA : 1 - OVERLAY_ALPHA` 混合.
pub fn create_overlay(original: &RgbImage, mask: ArrayView2<u8>) -> SegResult<RgbImage> {
    let (w, h) = original.dimensions();
    if mask.dim() != (h as usize, w as usize) {
        return Err(SegError::shape(
            "叠加掩码",
            &[h as usize, w as usize],
            mask.shape(),
        ));
    }
    let blend = |orig: u8, overlay: u8| -> u8 {
        let v = OVERLAY_ALPHA * orig as f32 + (1.0 - OVERLAY_ALPHA) * overlay as f32;
        v.round().clamp(0.0, 255.0) as u8
    };
    Ok(RgbImage::from_fn(w, h, |x, y| {
        let Rgb([r, g, b]) = *original.get_pixel(x, y);
        let red = if is_liver(mask[[y as usize, x as usize]]) { WHITE } else { BLACK };
        Rgb([blend(r, red), blend(g, BLACK), blend(b, BLACK)])
    }))
}

/// 单尺度预测已预处理的张量, 以 `{path}.png` 保存 0/255 掩码.
///
/// 用于对测试集逐张导出结果, 不做尺寸还原.
pub fn save_prediction<M: SegModel, P: AsRef<Path>>(
    model: &M,
    image: ArrayView3<f32>,
    input_size: Idx2d,
    num_classes: usize,
    path: P,
) -> SegResult<PathBuf> {
    let probs = predict_multiscale(model, image, input_size, &[1.0], num_classes)?;
    let classes = argmax_classes(probs.view());
    let mut out = path.as_ref().as_os_str().to_owned();
    out.push(".png");
    let out = PathBuf::from(out);
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    mask_to_image(classes.view()).save(&out)?;
    Ok(out)
}

fn with_suffix(rel: &Path, suffix: &str) -> PathBuf {
    let mut name = rel.with_extension("").into_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn process_one<M: SegModel>(
    model: &M,
    path: &Path,
    rel: &Path,
    output_dir: &Path,
    overlay_dir: Option<&Path>,
    input_size: Idx2d,
) -> SegResult<()> {
    let img = image::open(path)?.to_rgb8();
    let mask = predict_mask(model, &img, input_size)?;

    let mask_path = output_dir.join(with_suffix(rel, "_mask.png"));
    if let Some(parent) = mask_path.parent() {
        fs::create_dir_all(parent)?;
    }
    mask_to_image(mask.view()).save(&mask_path)?;

    if let Some(dir) = overlay_dir {
        let overlay_path = dir.join(with_suffix(rel, "_overlay.png"));
        if let Some(parent) = overlay_path.parent() {
            fs::create_dir_all(parent)?;
        }
        create_overlay(&img, mask.view())?.save(&overlay_path)?;
    }
    Ok(())
}

/// 对 `test_dir` 下所有图像推理, 结果写入 `output_dir`.
///
/// 掩码保存为 `{相对路径}_mask.png`, 叠加图保存为 `overlays/{相对路径}_overlay.png`.
/// 单张图像的任何错误只会被记录, 不会中断; 只有测试目录不存在或输出目录/统计文件
/// 无法写入时返回错误. 即使没有找到任何图像也会写出统计文件.
pub fn predict_directory<M: SegModel, P: AsRef<Path>, Q: AsRef<Path>>(
    model: &M,
    test_dir: P,
    output_dir: Q,
    input_size: Idx2d,
    save_overlay: bool,
) -> SegResult<InferenceSummary> {
    let (test_dir, output_dir) = (test_dir.as_ref(), output_dir.as_ref());
    let images = find_images(test_dir)?;
    fs::create_dir_all(output_dir)?;
    let overlay_dir = save_overlay.then(|| output_dir.join(OVERLAY_DIR));
    if let Some(dir) = overlay_dir.as_ref() {
        fs::create_dir_all(dir)?;
    }
    if images.is_empty() {
        log::warn!("在 {} 中未找到图像文件", test_dir.display());
    }

    let mut summary = InferenceSummary {
        total_images: images.len(),
        output_dir: output_dir.display().to_string(),
        ..InferenceSummary::default()
    };
    for (index, path) in images.iter().enumerate() {
        log::debug!("推理进度 {}/{}: {}", index + 1, images.len(), path.display());
        let rel = path.strip_prefix(test_dir).unwrap_or(path);
        match process_one(model, path, rel, output_dir, overlay_dir.as_deref(), input_size) {
            Ok(()) => summary.processed_images += 1,
            Err(e) => {
                log::error!("处理图像失败 {}: {e}", path.display());
                summary.failed_images += 1;
                summary.failed_files.push(path.display().to_string());
            }
        }
    }

    summary.write_to(File::create(output_dir.join(STATS_FILE))?)?;
    log::info!(
        "推理完成! 成功: {}, 失败: {}",
        summary.processed_images,
        summary.failed_images
    );
    log::info!("结果保存在: {}", output_dir.display());
    Ok(summary)
}
