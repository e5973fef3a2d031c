use super::image_io::{read_bgr, read_label};
use super::{out_of_range, Sample, SampleSource};
use crate::consts::class::LIVER;
use crate::{Idx2d, SegError, SegResult};
use ndarray::{s, Array2, Array3};
use std::path::{Path, PathBuf};

/// 列表文件描述的数据集.
///
/// 列表文件每个非空行为 `图像相对路径 标签相对路径`, 相对于数据集根目录.
/// 读取的样本会补边到 `crop_size`: 图像补 0 (即均值), 标签补忽略值.
#[derive(Clone, Debug)]
pub struct ListDataset {
    root: PathBuf,
    items: Vec<(PathBuf, PathBuf)>,
    crop_size: Idx2d,
    ignore_label: u8,
    binarize: bool,
}

impl ListDataset {
    /// 打开数据集. 只解析列表文件, 图像在 [`SampleSource::load`] 时才读取.
    ///
    /// 根目录或列表文件不存在时返回 [`SegError::NotFound`]; 列表行格式错误时返回
    /// [`SegError::Config`].
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        root: P,
        list_path: Q,
        crop_size: Idx2d,
        ignore_label: u8,
    ) -> SegResult<Self> {
        let root = root.as_ref().to_owned();
        if !root.is_dir() {
            return Err(SegError::NotFound(root));
        }
        let list_path = list_path.as_ref();
        if !list_path.is_file() {
            return Err(SegError::NotFound(list_path.to_owned()));
        }
        if crop_size.0 == 0 || crop_size.1 == 0 {
            return Err(SegError::config("crop_size 不能为 0"));
        }

        let mut items = Vec::new();
        for (lineno, line) in std::fs::read_to_string(list_path)?.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [] => continue,
                [image, label] => items.push((PathBuf::from(image), PathBuf::from(label))),
                _ => {
                    return Err(SegError::config(format!(
                        "{} 第 {} 行格式错误: `{line}`",
                        list_path.display(),
                        lineno + 1
                    )))
                }
            }
        }
        log::debug!("从 {} 读取了 {} 个样本条目", list_path.display(), items.len());

        Ok(Self {
            root,
            items,
            crop_size,
            ignore_label,
            binarize: false,
        })
    }

    /// 是否把所有非零且非忽略的标签值视为肝脏.
    #[inline]
    pub fn with_binarize(mut self, binarize: bool) -> Self {
        self.binarize = binarize;
        self
    }

    /// 数据集根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 补边目标尺寸.
    #[inline]
    pub fn crop_size(&self) -> Idx2d {
        self.crop_size
    }

    fn pad(&self, image: Array3<f32>, label: Array2<u8>) -> (Array3<f32>, Array2<u8>) {
        let (h, w) = label.dim();
        if (h, w) == self.crop_size {
            return (image, label);
        }
        let (ch, cw) = self.crop_size;
        let mut padded_image = Array3::zeros((image.dim().0, ch, cw));
        padded_image.slice_mut(s![.., ..h, ..w]).assign(&image);
        let mut padded_label = Array2::from_elem((ch, cw), self.ignore_label);
        padded_label.slice_mut(s![..h, ..w]).assign(&label);
        (padded_image, padded_label)
    }
}

impl SampleSource for ListDataset {
    #[inline]
    fn len(&self) -> usize {
        self.items.len()
    }

    fn load(&self, index: usize) -> SegResult<Sample> {
        let (image_path, label_path) = self
            .items
            .get(index)
            .ok_or_else(|| out_of_range(index, self.items.len()))?;
        let (image, size) = read_bgr(self.root.join(image_path))?;
        let mut label = read_label(self.root.join(label_path))?;
        if label.dim() != size {
            return Err(SegError::shape(
                "标签",
                &[size.0, size.1],
                label.shape(),
            ));
        }
        if size.0 > self.crop_size.0 || size.1 > self.crop_size.1 {
            return Err(SegError::shape(
                "样本 (超过 crop_size)",
                &[self.crop_size.0, self.crop_size.1],
                &[size.0, size.1],
            ));
        }
        if self.binarize {
            let ignore = self.ignore_label;
            label.mapv_inplace(|v| if v != 0 && v != ignore { LIVER } else { v });
        }

        let name = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| image_path.display().to_string());
        let (image, label) = self.pad(image, label);
        Sample::new(image, label, size, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::image_io::save_gray;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("img")).unwrap();
        fs::create_dir_all(dir.path().join("seg")).unwrap();
        let img = Array2::from_shape_fn((3, 4), |(y, x)| (y * 4 + x) as u8 * 10);
        let seg = ndarray::arr2(&[[0u8, 0, 255, 255], [0, 255, 255, 0], [0, 0, 0, 0]]);
        save_gray(img.view(), dir.path().join("img/a.png")).unwrap();
        save_gray(seg.view(), dir.path().join("seg/a.png")).unwrap();
        let list = dir.path().join("list.txt");
        fs::write(&list, "img/a.png seg/a.png\n\n").unwrap();
        (dir, list)
    }

    #[test]
    fn test_pad_and_binarize() {
        let (dir, list) = fixture();
        let ds = ListDataset::open(dir.path(), &list, (4, 6), 255).unwrap();
        assert_eq!(ds.len(), 1);

        let raw = ds.load(0).unwrap();
        assert_eq!(raw.name, "a");
        assert_eq!(raw.original_size, (3, 4));
        assert_eq!(raw.image.dim(), (3, 4, 6));
        assert_eq!(raw.label[[0, 2]], 255);
        // 补边区域.
        assert_eq!(raw.label[[3, 5]], 255);
        assert_eq!(raw.image[[0, 3, 5]], 0.0);

        // 忽略值同时也是 "非零", 二值化不能改动它.
        let ds = ds.with_binarize(true);
        assert_eq!(ds.load(0).unwrap().label[[0, 2]], 255);
    }

    #[test]
    fn test_too_large() {
        let (dir, list) = fixture();
        let ds = ListDataset::open(dir.path(), &list, (2, 2), 255).unwrap();
        assert!(matches!(ds.load(0), Err(SegError::ShapeMismatch { .. })));
        assert!(ds.load(1).is_err());
    }

    #[test]
    fn test_bad_list() {
        let (dir, _) = fixture();
        let list = dir.path().join("bad.txt");
        fs::write(&list, "only_one_field\n").unwrap();
        assert!(matches!(
            ListDataset::open(dir.path(), &list, (4, 4), 255),
            Err(SegError::Config(_))
        ));
        assert!(matches!(
            ListDataset::open(dir.path(), dir.path().join("nope.txt"), (4, 4), 255),
            Err(SegError::NotFound(_))
        ));
    }
}
