//! Per-task training losses.
//!
//! Dense targets mark missing pixels with an all-zero channel vector; those
//! pixels are excluded both from the sum and from the normalizing count.

use std::str::FromStr;

use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};

use crate::error::{DataError, LossError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Semantic,
    SegmentSemantic,
    Depth,
    DepthZbuffer,
    Keypoints2d,
    EdgeTexture,
    Normal,
}

/// How a task's prediction is compared with its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Negative log-likelihood over class labels.
    Labels,
    /// Masked L1.
    Regression,
    /// Masked `1 - cos`.
    Normal,
}

impl TaskType {
    pub fn name(self) -> &'static str {
        match self {
            TaskType::Semantic => "semantic",
            TaskType::SegmentSemantic => "segment_semantic",
            TaskType::Depth => "depth",
            TaskType::DepthZbuffer => "depth_zbuffer",
            TaskType::Keypoints2d => "keypoints2d",
            TaskType::EdgeTexture => "edge_texture",
            TaskType::Normal => "normal",
        }
    }

    pub fn loss_kind(self) -> LossKind {
        match self {
            TaskType::Semantic | TaskType::SegmentSemantic => LossKind::Labels,
            TaskType::Depth
            | TaskType::DepthZbuffer
            | TaskType::Keypoints2d
            | TaskType::EdgeTexture => LossKind::Regression,
            TaskType::Normal => LossKind::Normal,
        }
    }
}

impl FromStr for TaskType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "semantic" => TaskType::Semantic,
            "segment_semantic" => TaskType::SegmentSemantic,
            "depth" => TaskType::Depth,
            "depth_zbuffer" => TaskType::DepthZbuffer,
            "keypoints2d" => TaskType::Keypoints2d,
            "edge_texture" => TaskType::EdgeTexture,
            "normal" => TaskType::Normal,
            _ => return Err(DataError::UnknownTask(s.to_string())),
        })
    }
}

/// The benchmark a segmentation target comes from. Only the ignore index
/// depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelSet {
    #[default]
    NyuV2,
    Cityscapes,
    Taskonomy,
}

impl LabelSet {
    pub fn ignore_index(self) -> i64 {
        match self {
            LabelSet::Taskonomy => 255,
            LabelSet::NyuV2 | LabelSet::Cityscapes => -1,
        }
    }
}

pub enum TaskTarget<B: Backend> {
    /// N x H x W class indices.
    Labels(Tensor<B, 3, Int>),
    /// N x C x H x W values, all-zero channels marking missing pixels.
    Dense(Tensor<B, 4>),
}

/// N x 1 x H x W mask, `1.0` where the target's channel sum is non-zero.
pub fn valid_pixel_mask<B: Backend>(target: Tensor<B, 4>) -> Tensor<B, 4> {
    target
        .sum_dim(1)
        .equal_elem(0.0)
        .float()
        .neg()
        .add_scalar(1.0)
}

fn valid_count<B: Backend, const D: usize>(mask: Tensor<B, D>) -> Result<f64, LossError> {
    let count = mask.sum().into_scalar().elem::<f64>();
    if count > 0.0 {
        Ok(count)
    } else {
        Err(LossError::EmptyMask)
    }
}

/// Mean negative log-likelihood of `target` under `log_probs` (N x C),
/// skipping entries equal to `ignore_index`. Any other target must lie in
/// `[0, C)`.
pub fn nll_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    target: Tensor<B, 1, Int>,
    ignore_index: i64,
) -> Result<Tensor<B, 1>, LossError> {
    let [n] = target.shape().dims;
    let [_, classes] = log_probs.shape().dims;

    let out_of_range = target
        .clone()
        .into_data()
        .convert::<i64>()
        .value
        .into_iter()
        .find(|t| *t != ignore_index && !(0..classes as i64).contains(t));
    if let Some(target) = out_of_range {
        return Err(LossError::TargetOutOfRange { target, classes });
    }

    let ignored = target.clone().equal_elem(ignore_index);
    let valid = ignored.clone().float().neg().add_scalar(1.0);
    let count = valid_count(valid.clone())?;

    let index = target.mask_fill(ignored, 0).reshape([n, 1]);
    let picked = log_probs.gather(1, index).reshape([n]);

    Ok(picked.mul(valid).sum().neg().div_scalar(count))
}

/// [`nll_loss`] over every pixel of an N x C x H x W log-probability map.
pub fn segmentation_loss<B: Backend>(
    log_probs: Tensor<B, 4>,
    target: Tensor<B, 3, Int>,
    ignore_index: i64,
) -> Result<Tensor<B, 1>, LossError> {
    let [n, c, h, w] = log_probs.shape().dims;
    let log_probs = log_probs
        // N x C x H x W -> N x H x C x W
        .swap_dims(1, 2)
        // N x H x C x W -> N x H x W x C
        .swap_dims(2, 3)
        .reshape([n * h * w, c]);
    nll_loss(log_probs, target.reshape([n * h * w]), ignore_index)
}

/// Sum of absolute errors over valid pixels divided by the valid pixel count.
pub fn l1_loss<B: Backend>(
    pred: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> Result<Tensor<B, 1>, LossError> {
    let mask = valid_pixel_mask(target.clone());
    let count = valid_count(mask.clone())?;
    Ok(pred.sub(target).abs().mul(mask).sum().div_scalar(count))
}

/// `1 - mean(pred . target)` over valid pixels, for unit normal maps.
pub fn normal_loss<B: Backend>(
    pred: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> Result<Tensor<B, 1>, LossError> {
    let mask = valid_pixel_mask(target.clone());
    let count = valid_count(mask.clone())?;
    Ok(pred
        .mul(target)
        .mul(mask)
        .sum()
        .div_scalar(count)
        .neg()
        .add_scalar(1.0))
}

/// Loss of one task head.
pub fn model_fit<B: Backend>(
    pred: Tensor<B, 4>,
    target: TaskTarget<B>,
    task: TaskType,
    label_set: LabelSet,
) -> Result<Tensor<B, 1>, LossError> {
    match (task.loss_kind(), target) {
        (LossKind::Labels, TaskTarget::Labels(target)) => {
            segmentation_loss(pred, target, label_set.ignore_index())
        }
        (LossKind::Regression, TaskTarget::Dense(target)) => l1_loss(pred, target),
        (LossKind::Normal, TaskTarget::Dense(target)) => normal_loss(pred, target),
        (kind, _) => Err(LossError::TargetMismatch {
            task: task.name(),
            expected: match kind {
                LossKind::Labels => "label",
                LossKind::Regression | LossKind::Normal => "dense",
            },
        }),
    }
}
