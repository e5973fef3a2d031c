//! 🩺欢迎光临🫀
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, SegError, SegResult};

pub use crate::consts::class::{is_liver, BACKGROUND, LIVER};
pub use crate::consts::{DATASET_TAG, IGNORE_LABEL, IMG_MEAN, INPUT_SIZE, NUM_CLASSES};

pub use crate::model::{LoadReport, Mode, ModelOutput, ParamSet, SegModel};
pub use crate::nn::{TinySegNet, TinySegNetConfig};

pub use crate::loss::Criterion;
pub use crate::optim::Sgd;
pub use crate::schedule::{LrPolicy, Warmup};

pub use crate::metric::{confusion_matrix, ConfusionMatrix, SegScores};
pub use crate::predict::{argmax_classes, predict_multiscale, predict_whole};

pub use crate::eval::{evaluate, EvalReport};

#[cfg(feature = "rayon")]
pub use crate::eval::evaluate_par;

pub use crate::checkpoint::{load_weights, Checkpoint};
pub use crate::data::{Batch, ListDataset, Sample, SampleSource, TrainBatches};
pub use crate::train::{TrainConfig, Trainer, TrainingState};

pub use crate::infer::{predict_directory, InferenceSummary};
