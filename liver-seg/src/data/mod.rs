//! 数据源.
//!
//! 核心流程只要求数据源能按索引产出 [`Sample`]. 训练时由 [`TrainBatches`]
//! 把数据源循环展开为固定步数的批次序列; 验证时按顺序逐个读取, 不打乱.

use crate::{SegError, SegResult};

pub mod image_io;

mod batches;
mod list;
mod sample;

pub use batches::TrainBatches;
pub use list::ListDataset;
pub use sample::{Batch, Sample};

/// 可按索引重复读取的样本源.
pub trait SampleSource {
    /// 样本个数.
    fn len(&self) -> usize;

    /// 是否为空.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 读取第 `index` 个样本. `index >= len()` 时返回错误.
    fn load(&self, index: usize) -> SegResult<Sample>;

    /// 按顺序迭代全部样本.
    #[inline]
    fn samples(&self) -> SourceIter<'_, Self> {
        SourceIter {
            source: self,
            next: 0,
        }
    }
}

impl SampleSource for Vec<Sample> {
    #[inline]
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn load(&self, index: usize) -> SegResult<Sample> {
        self.as_slice()
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, self.as_slice().len()))
    }
}

pub(crate) fn out_of_range(index: usize, len: usize) -> SegError {
    SegError::config(format!("样本索引 {index} 越界 (共 {len} 个)"))
}

/// [`SampleSource::samples`] 返回的迭代器.
pub struct SourceIter<'a, S: ?Sized> {
    source: &'a S,
    next: usize,
}

impl<'a, S: SampleSource + ?Sized> Iterator for SourceIter<'a, S> {
    type Item = SegResult<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.source.len() {
            return None;
        }
        let item = self.source.load(self.next);
        self.next += 1;
        Some(item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.source.len().saturating_sub(self.next);
        (rest, Some(rest))
    }
}

impl<'a, S: SampleSource + ?Sized> ExactSizeIterator for SourceIter<'a, S> {}
