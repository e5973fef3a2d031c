//! 对 `liver-seg::data` 的更一层封装. 提供更直接的数据集定位与加载.

use liver_seg::data::ListDataset;
use liver_seg::{Idx2d, SegResult};
use std::env;
use std::path::{Path, PathBuf};

/// 数据集根目录环境变量.
pub const DATA_DIR_ENV: &str = "LIVER_SEG_DATA_DIR";

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 获取数据集根目录.
///
/// 1. 若环境变量 `$LIVER_SEG_DATA_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/chaos`. 无法确定主目录时返回 `None`.
pub fn data_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var(DATA_DIR_ENV) {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => home_dataset_dir_with(["chaos"]),
    }
}

/// 命令行显式给出的目录优先, 其次见 [`data_dir_from_env_or_home`].
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(data_dir_from_env_or_home)
}

/// 打开列表数据集. `list` 为相对路径且在当前目录下不存在时, 相对 `root` 解析.
pub fn list_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    root: P,
    list: Q,
    crop_size: Idx2d,
    ignore_label: u8,
) -> SegResult<ListDataset> {
    let (root, list) = (root.as_ref(), list.as_ref());
    let list = if list.is_relative() && !list.exists() {
        root.join(list)
    } else {
        list.to_owned()
    };
    log::info!("加载数据集 {} (列表 {})", root.display(), list.display());
    ListDataset::open(root, list, crop_size, ignore_label)
}
