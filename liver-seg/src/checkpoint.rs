//! 检查点读写.
//!
//! 检查点为 `bincode` 编码的 [`Checkpoint`], 文件名 `{tag}_{iteration}_{dice}.bin`.
//! 检查点创建后不再修改, 也不会自动清理旧文件.

use crate::model::{LoadReport, ParamSet, SegModel};
use crate::{SegError, SegResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 检查点扩展名.
pub const EXTENSION: &str = "bin";

/// 模型参数快照, 附带保存时的迭代序号与验证 Dice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 数据集名称.
    pub tag: String,

    /// 保存时的迭代序号.
    pub iteration: usize,

    /// 保存时的验证 Dice.
    pub dice: f64,

    /// 模型参数.
    pub params: ParamSet,
}

impl Checkpoint {
    /// 对模型参数做快照.
    pub fn capture<M: SegModel, S: Into<String>>(
        model: &M,
        tag: S,
        iteration: usize,
        dice: f64,
    ) -> Self {
        Self {
            tag: tag.into(),
            iteration,
            dice,
            params: model.params().clone(),
        }
    }

    /// 文件名.
    #[inline]
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.{EXTENSION}", self.tag, self.iteration, self.dice)
    }

    /// 写入目录 `dir` (不存在时创建), 返回文件路径.
    pub fn save_to<P: AsRef<Path>>(&self, dir: P) -> SegResult<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        self.write_to(File::create(&path)?)?;
        Ok(path)
    }

    /// 编码到 `writer` 并刷新. 任何写入错误 (包括最后一次刷新) 都会返回.
    pub fn write_to<W: Write>(&self, writer: W) -> SegResult<()> {
        let mut writer = BufWriter::new(writer);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// 读取检查点文件. 文件不存在时返回 [`SegError::NotFound`].
    pub fn load<P: AsRef<Path>>(path: P) -> SegResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SegError::NotFound(path.to_owned()));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// 从检查点文件加载模型权重. 只覆盖名称重叠的参数, 见 [`ParamSet::load_overlapping`].
pub fn load_weights<M: SegModel, P: AsRef<Path>>(model: &mut M, path: P) -> SegResult<LoadReport> {
    let path = path.as_ref();
    let ckpt = Checkpoint::load(path)?;
    let report = model.params_mut().load_overlapping(&ckpt.params)?;
    log::info!(
        "从 {} 加载 {} 个参数 (检查点 iteration {} Dice {:.6})",
        path.display(),
        report.loaded.len(),
        ckpt.iteration,
        ckpt.dice
    );
    if !report.missing.is_empty() {
        log::warn!("检查点中缺少参数, 保持初始值: {:?}", report.missing);
    }
    if !report.unexpected.is_empty() {
        log::warn!("忽略检查点中多余的参数: {:?}", report.unexpected);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_file_name() {
        let ckpt = Checkpoint {
            tag: "ChaosCT".into(),
            iteration: 39999,
            dice: 0.5,
            params: ParamSet::new(),
        };
        assert_eq!(ckpt.file_name(), "ChaosCT_39999_0.5.bin");
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = ParamSet::new();
        params.insert("w", arr1(&[1.0f32, -2.0]).into_dyn());
        let ckpt = Checkpoint {
            tag: "t".into(),
            iteration: 3,
            dice: 0.25,
            params,
        };
        let path = ckpt.save_to(dir.path().join("nested")).unwrap();
        assert!(path.ends_with("t_3_0.25.bin"));
        assert_eq!(Checkpoint::load(&path).unwrap(), ckpt);

        assert!(matches!(
            Checkpoint::load(dir.path().join("missing.bin")),
            Err(SegError::NotFound(_))
        ));
    }

    /// 每次写入都失败的输出端.
    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "磁盘已满"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_error_surfaces() {
        let mut params = ParamSet::new();
        params.insert("w", arr1(&[0.5f32; 16]).into_dyn());
        let ckpt = Checkpoint {
            tag: "t".into(),
            iteration: 1,
            dice: 0.5,
            params,
        };
        // 数据量小于缓冲区, 错误只会在刷新时出现.
        assert!(matches!(ckpt.write_to(FullDisk), Err(SegError::Io(_))));

        let mut buf = Vec::new();
        ckpt.write_to(&mut buf).unwrap();
        assert_eq!(bincode::deserialize::<Checkpoint>(&buf).unwrap(), ckpt);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.bin");
        fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(SegError::Serialize(_))
        ));
    }
}
