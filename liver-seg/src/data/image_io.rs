//! 图像与 ndarray 之间的转换.

use crate::consts::IMG_MEAN;
use crate::{Idx2d, SegError, SegResult};
use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, Array3, ArrayView2};
use std::path::Path;

/// RGB 图像 -> `3 x H x W` 张量, 通道按 BGR 排列并减去 [`IMG_MEAN`].
pub fn to_bgr_tensor(img: &RgbImage) -> Array3<f32> {
    let (w, h) = img.dimensions();
    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        let px = img.get_pixel(x as u32, y as u32);
        px[2 - c] as f32 - IMG_MEAN[c]
    })
}

fn ensure_file(path: &Path) -> SegResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(SegError::NotFound(path.to_owned()))
    }
}

/// 以彩色模式读取图像, 返回 BGR 张量与原始尺寸 (高, 宽).
pub fn read_bgr<P: AsRef<Path>>(path: P) -> SegResult<(Array3<f32>, Idx2d)> {
    let path = path.as_ref();
    ensure_file(path)?;
    let img = image::open(path)?.to_rgb8();
    let tensor = to_bgr_tensor(&img);
    let size = (tensor.dim().1, tensor.dim().2);
    Ok((tensor, size))
}

/// 以单通道模式读取标签图.
pub fn read_label<P: AsRef<Path>>(path: P) -> SegResult<Array2<u8>> {
    let path = path.as_ref();
    ensure_file(path)?;
    let img = image::open(path)?.to_luma8();
    let (w, h) = img.dimensions();
    Ok(Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        img.get_pixel(x as u32, y as u32)[0]
    }))
}

/// 单通道数组 -> 灰度图.
pub fn to_gray_image(arr: ArrayView2<u8>) -> GrayImage {
    let (height, width) = arr.dim();
    let mut buf = GrayImage::new(width as u32, height as u32);
    for ((h, w), &pix) in arr.indexed_iter() {
        buf.put_pixel(w as u32, h as u32, Luma([pix]));
    }
    buf
}

/// 以灰度 PNG (或由扩展名决定的格式) 保存单通道数组.
pub fn save_gray<P: AsRef<Path>>(arr: ArrayView2<u8>, path: P) -> SegResult<()> {
    to_gray_image(arr).save(path)?;
    Ok(())
}
