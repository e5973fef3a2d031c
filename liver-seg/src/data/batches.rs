use super::{Batch, SampleSource};
use crate::{SegError, SegResult};

/// 训练批次序列.
///
/// 把数据源循环展开为恰好 `total_steps * batch_size` 个样本, 每 `batch_size`
/// 个堆叠为一个批次 (不足一批的尾部直接丢弃, 实际上按构造不会出现).
/// 数据源应事先打乱; 本迭代器不改变顺序.
pub struct TrainBatches<'a, S: SampleSource + ?Sized> {
    source: &'a S,
    batch_size: usize,
    total_steps: usize,
    cursor: usize,
    emitted: usize,
}

impl<'a, S: SampleSource + ?Sized> TrainBatches<'a, S> {
    /// 创建批次序列. `batch_size == 0` 时返回 [`SegError::Config`].
    ///
    /// 空数据源不会报错, 但迭代器立刻结束, 由训练循环报告数据源耗尽.
    pub fn new(source: &'a S, batch_size: usize, total_steps: usize) -> SegResult<Self> {
        if batch_size == 0 {
            return Err(SegError::config("batch_size 必须大于 0"));
        }
        Ok(Self {
            source,
            batch_size,
            total_steps,
            cursor: 0,
            emitted: 0,
        })
    }

    /// 批大小.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<'a, S: SampleSource + ?Sized> Iterator for TrainBatches<'a, S> {
    type Item = SegResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.source.len();
        if self.emitted >= self.total_steps || len == 0 {
            return None;
        }
        self.emitted += 1;

        let mut samples = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            let index = self.cursor % len;
            self.cursor += 1;
            match self.source.load(index) {
                Ok(s) => samples.push(s),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Batch::stack(&samples))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = if self.source.is_empty() {
            0
        } else {
            self.total_steps - self.emitted
        };
        (rest, Some(rest))
    }
}

impl<'a, S: SampleSource + ?Sized> ExactSizeIterator for TrainBatches<'a, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sample;
    use ndarray::{Array2, Array3};

    fn source(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                Sample::new(
                    Array3::from_elem((3, 2, 2), i as f32),
                    Array2::zeros((2, 2)),
                    (2, 2),
                    format!("s{i}"),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_cycles_to_exact_length() {
        let src = source(3);
        let batches: Vec<_> = TrainBatches::new(&src, 2, 4)
            .unwrap()
            .map(|b| b.unwrap())
            .collect();
        assert_eq!(batches.len(), 4);
        let names: Vec<_> = batches.iter().flat_map(|b| b.names.clone()).collect();
        assert_eq!(names, ["s0", "s1", "s2", "s0", "s1", "s2", "s0", "s1"]);
    }

    #[test]
    fn test_len_and_empty() {
        let src = source(1);
        let it = TrainBatches::new(&src, 1, 5).unwrap();
        assert_eq!(it.len(), 5);

        let empty: Vec<Sample> = Vec::new();
        let mut it = TrainBatches::new(&empty, 1, 5).unwrap();
        assert_eq!(it.len(), 0);
        assert!(it.next().is_none());

        assert!(TrainBatches::new(&src, 0, 5).is_err());
    }
}
