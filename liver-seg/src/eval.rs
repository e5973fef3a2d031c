//! 验证集评估.
//!
//! 每个样本: 单尺度预测 -> argmax -> 按原始尺寸裁剪 -> 滤除忽略像素 -> 累加混淆矩阵.
//! 全部样本处理完后由累计矩阵计算 IoU 与 Dice. 任何损坏的样本都会终止评估.

use crate::data::Sample;
use crate::metric::{confusion_matrix, ConfusionMatrix};
use crate::model::SegModel;
use crate::predict::{argmax_classes, predict_multiscale};
use crate::{Idx2d, SegError, SegResult};
use ndarray::{s, Array1};

/// 一次评估的结果.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalReport {
    /// IoU 均值.
    pub mean_iou: f64,

    /// 各类别 IoU.
    pub iou: Array1<f64>,

    /// Dice 均值.
    pub mean_dice: f64,

    /// 各类别 Dice.
    pub dice: Array1<f64>,

    /// 累计混淆矩阵.
    pub confusion: ConfusionMatrix,

    /// 参与评估的样本数.
    pub samples: usize,
}

impl EvalReport {
    /// 由累计混淆矩阵计算指标.
    pub fn from_confusion(confusion: ConfusionMatrix, samples: usize) -> Self {
        let scores = confusion.scores();
        Self {
            mean_iou: scores.mean_iou,
            iou: scores.iou,
            mean_dice: scores.mean_dice,
            dice: scores.dice,
            confusion,
            samples,
        }
    }
}

/// 计算单个样本的混淆矩阵.
///
/// 预测图与标签都裁剪到 `sample.original_size`, 之后只统计标签不为 `ignore_label` 的像素.
pub fn sample_confusion<M: SegModel>(
    model: &M,
    sample: &Sample,
    input_size: Idx2d,
    num_classes: usize,
    ignore_label: u8,
) -> SegResult<ConfusionMatrix> {
    sample.check()?;
    let probs = predict_multiscale(model, sample.image.view(), input_size, &[1.0], num_classes)?;
    let pred = argmax_classes(probs.view());

    let (oh, ow) = sample.original_size;
    if oh > pred.nrows() || ow > pred.ncols() {
        return Err(SegError::shape(
            "预测图 (不小于原始尺寸)",
            &[oh, ow],
            pred.shape(),
        ));
    }
    let gt = sample.label.slice(s![..oh, ..ow]);
    let pred = pred.slice(s![..oh, ..ow]);

    let (gt, pred): (Vec<u8>, Vec<u8>) = gt
        .iter()
        .zip(pred.iter())
        .filter(|(g, _)| **g != ignore_label)
        .map(|(g, p)| (*g, *p))
        .unzip();
    confusion_matrix(&gt, &pred, num_classes)
}

/// 依次评估所有样本.
///
/// `samples` 中出现的第一个错误 (读取失败或样本损坏) 会直接返回.
pub fn evaluate<M, I>(
    model: &M,
    samples: I,
    input_size: Idx2d,
    num_classes: usize,
    ignore_label: u8,
) -> SegResult<EvalReport>
where
    M: SegModel,
    I: IntoIterator<Item = SegResult<Sample>>,
{
    let mut total = ConfusionMatrix::new(num_classes)?;
    let mut count = 0;
    for sample in samples {
        let sample = sample?;
        log::debug!("评估样本 #{count}: {}", sample.name);
        let cm = sample_confusion(model, &sample, input_size, num_classes, ignore_label)?;
        total.merge(&cm)?;
        count += 1;
    }
    let report = EvalReport::from_confusion(total, count);
    log::debug!(
        "评估 {count} 个样本: mean_IU:{:.6} Dice:{:.6}",
        report.mean_iou,
        report.mean_dice
    );
    Ok(report)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use crate::data::SampleSource;
        use rayon::prelude::*;

        /// [`evaluate`] 的并行版本.
        ///
        /// 每个工作线程持有独立的混淆矩阵, 最后按加法归约. 结果与串行版本相同.
        pub fn evaluate_par<M, S>(
            model: &M,
            source: &S,
            input_size: Idx2d,
            num_classes: usize,
            ignore_label: u8,
        ) -> SegResult<EvalReport>
        where
            M: SegModel + Sync,
            S: SampleSource + Sync + ?Sized,
        {
            let empty = ConfusionMatrix::new(num_classes)?;
            let total = (0..source.len())
                .into_par_iter()
                .map(|index| {
                    let sample = source.load(index)?;
                    sample_confusion(model, &sample, input_size, num_classes, ignore_label)
                })
                .try_reduce(|| empty.clone(), |mut a, b| {
                    a.merge(&b)?;
                    Ok(a)
                })?;
            let report = EvalReport::from_confusion(total, source.len());
            log::debug!(
                "并行评估 {} 个样本: mean_IU:{:.6} Dice:{:.6}",
                report.samples,
                report.mean_iou,
                report.mean_dice
            );
            Ok(report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::IGNORE_LABEL;
    use crate::model::{Mode, ModelOutput, ParamSet};
    use ndarray::{Array2, Array3, Array4, ArrayView4};

    /// 以第 0 通道的正负号作为前景判据.
    struct SignModel {
        params: ParamSet,
    }

    impl SegModel for SignModel {
        type Cache = ();

        fn num_classes(&self) -> usize {
            2
        }

        fn forward(
            &self,
            images: ArrayView4<f32>,
            _mode: Mode,
        ) -> SegResult<(ModelOutput, Option<()>)> {
            let (n, _, h, w) = images.dim();
            let out = Array4::from_shape_fn((n, 2, h, w), |(b, c, y, x)| {
                let v = images[[b, 0, y, x]];
                if c == 1 { v } else { -v }
            });
            Ok((ModelOutput::single(out), None))
        }

        fn backward(&self, _: &(), _: ArrayView4<f32>) -> SegResult<ParamSet> {
            Ok(ParamSet::new())
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }
    }

    fn model() -> SignModel {
        SignModel {
            params: ParamSet::new(),
        }
    }

    /// 图像正负号与 `pred` 相同, 标签为 `gt`.
    fn sample(pred: &[[u8; 4]; 4], gt: &[[u8; 4]; 4], size: Idx2d) -> Sample {
        let image = Array3::from_shape_fn((3, 4, 4), |(_, y, x)| {
            if pred[y][x] == 1 { 1.0 } else { -1.0 }
        });
        let label = Array2::from_shape_fn((4, 4), |(y, x)| gt[y][x]);
        Sample::new(image, label, size, "s").unwrap()
    }

    #[test]
    fn test_crop_and_ignore() {
        let pred = [[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0], [1, 1, 1, 1]];
        let gt = [
            [1, 0, 0, 0],
            [1, 255, 0, 0],
            [0, 0, 0, 0],
            [0, 0, 0, 0],
        ];
        // 第 3 行是补边区域, 被裁掉.
        let s = sample(&pred, &gt, (3, 4));
        let cm = sample_confusion(&model(), &s, (4, 4), 2, IGNORE_LABEL).unwrap();
        assert_eq!(cm.total(), 11.0);
        assert_eq!(cm.view(), ndarray::arr2(&[[8.0, 1.0], [0.0, 2.0]]));
    }

    #[test]
    fn test_perfect() {
        let m = [[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]];
        let samples = vec![Ok(sample(&m, &m, (4, 4))), Ok(sample(&m, &m, (4, 4)))];
        let report = evaluate(&model(), samples, (4, 4), 2, IGNORE_LABEL).unwrap();
        assert_eq!(report.samples, 2);
        assert_eq!(report.mean_iou, 1.0);
        assert_eq!(report.mean_dice, 1.0);
    }

    #[test]
    fn test_errors_abort() {
        let m = [[0; 4]; 4];
        let mut bad = sample(&m, &m, (4, 4));
        bad.image[[0, 0, 0]] = f32::INFINITY;
        let samples = vec![Ok(sample(&m, &m, (4, 4))), Ok(bad)];
        assert!(matches!(
            evaluate(&model(), samples, (4, 4), 2, IGNORE_LABEL),
            Err(SegError::NonFinite(_))
        ));

        let samples = vec![Err(SegError::NotFound("x.png".into()))];
        assert!(evaluate(&model(), samples, (4, 4), 2, IGNORE_LABEL).is_err());

        // 标签值越界.
        let gt = [[3; 4]; 4];
        let samples = vec![Ok(sample(&m, &gt, (4, 4)))];
        assert!(matches!(
            evaluate(&model(), samples, (4, 4), 2, IGNORE_LABEL),
            Err(SegError::LabelOutOfRange { label: 3, .. })
        ));
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_parallel_matches_serial() {
        let a = [[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0], [1, 1, 1, 1]];
        let b = [[1, 0, 0, 0], [1, 1, 0, 0], [0, 255, 0, 0], [0, 1, 0, 1]];
        let source: Vec<Sample> = (0..7)
            .map(|i| if i % 2 == 0 { sample(&a, &b, (4, 4)) } else { sample(&b, &a, (3, 3)) })
            .collect();

        let serial = evaluate(
            &model(),
            source.iter().cloned().map(Ok),
            (4, 4),
            2,
            IGNORE_LABEL,
        )
        .unwrap();
        let parallel = evaluate_par(&model(), &source, (4, 4), 2, IGNORE_LABEL).unwrap();
        assert_eq!(serial, parallel);
    }
}
