//! Evaluation metrics, computed on the host outside of the autodiff graph.

use burn::tensor::{backend::Backend, Int, Tensor};
use itertools::Itertools;

use crate::error::MetricError;

/// Angular thresholds, in degrees, reported by [`normal_error`].
pub const ANGLE_THRESHOLDS: [f64; 3] = [11.25, 22.5, 30.0];

/// Streaming confusion matrix over `num_classes` labels. Rows index targets,
/// columns predictions. Targets outside `[0, num_classes)` are skipped.
#[derive(Debug, Clone)]
pub struct ConfMatrix {
    num_classes: usize,
    mat: Option<Vec<u64>>,
}

impl ConfMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            mat: None,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Row-major counts, `None` until the first update.
    pub fn matrix(&self) -> Option<&[u64]> {
        self.mat.as_deref()
    }

    pub fn update<B: Backend, const D: usize>(
        &mut self,
        pred: Tensor<B, D, Int>,
        target: Tensor<B, D, Int>,
    ) -> Result<(), MetricError> {
        let pred_dims = pred.shape().dims;
        let target_dims = target.shape().dims;
        if pred_dims != target_dims {
            return Err(MetricError::ShapeMismatch {
                expected: target_dims.to_vec(),
                found: pred_dims.to_vec(),
            });
        }
        let pred = pred.into_data().convert::<i64>().value;
        let target = target.into_data().convert::<i64>().value;
        self.update_indices(&pred, &target)
    }

    /// Adds the counts of one batch. Nothing is recorded if the batch holds
    /// an out-of-range prediction for a valid target.
    pub fn update_indices(&mut self, pred: &[i64], target: &[i64]) -> Result<(), MetricError> {
        if pred.len() != target.len() {
            return Err(MetricError::LengthMismatch {
                pred: pred.len(),
                target: target.len(),
            });
        }

        let n = self.num_classes as i64;
        let mut counts = vec![0u64; self.num_classes * self.num_classes];
        for (&p, &t) in pred.iter().zip(target) {
            if t < 0 || t >= n {
                continue;
            }
            if p < 0 || p >= n {
                return Err(MetricError::PredictionOutOfRange(p));
            }
            counts[(t * n + p) as usize] += 1;
        }
        log::debug!(
            "confusion matrix update: {} of {} entries counted",
            counts.iter().sum::<u64>(),
            target.len()
        );

        let mat = self
            .mat
            .get_or_insert_with(|| vec![0; self.num_classes * self.num_classes]);
        mat.iter_mut().zip(counts).for_each(|(m, c)| *m += c);
        Ok(())
    }

    /// Intersection over union of every class; `None` where the class never
    /// appears in either targets or predictions.
    pub fn class_iou(&self) -> Result<Vec<Option<f64>>, MetricError> {
        let mat = self.mat.as_ref().ok_or(MetricError::NotUpdated)?;
        let n = self.num_classes;
        let at = |t: usize, p: usize| mat[t * n + p] as f64;

        Ok((0..n)
            .map(|k| {
                let row: f64 = (0..n).map(|p| at(k, p)).sum();
                let col: f64 = (0..n).map(|t| at(t, k)).sum();
                let union = row + col - at(k, k);
                (union > 0.0).then(|| at(k, k) / union)
            })
            .collect())
    }

    /// `(mean IoU, pixel accuracy)` of everything accumulated so far. Classes
    /// absent from both targets and predictions do not enter the mean.
    pub fn get_metrics(&self) -> Result<(f64, f64), MetricError> {
        let mat = self.mat.as_ref().ok_or(MetricError::NotUpdated)?;
        let n = self.num_classes;

        let total = mat.iter().sum::<u64>() as f64;
        if total == 0.0 {
            return Err(MetricError::EmptyMask);
        }
        let correct = (0..n).map(|k| mat[k * n + k]).sum::<u64>() as f64;

        let ious = self.class_iou()?.into_iter().flatten().collect_vec();
        let mean_iou = ious.iter().sum::<f64>() / ious.len() as f64;

        Ok((mean_iou, correct / total))
    }
}

/// Dense map copied to the host, N x C x H x W.
struct HostMap {
    values: Vec<f32>,
    dims: [usize; 4],
}

impl HostMap {
    fn new<B: Backend>(tensor: Tensor<B, 4>) -> Self {
        let dims = tensor.shape().dims;
        Self {
            values: tensor.into_data().convert::<f32>().value,
            dims,
        }
    }

    #[inline]
    fn at(&self, n: usize, c: usize, y: usize, x: usize) -> f32 {
        let [_, channels, h, w] = self.dims;
        self.values[((n * channels + c) * h + y) * w + x]
    }

    fn channels(&self, n: usize, y: usize, x: usize) -> impl Iterator<Item = f32> + '_ {
        (0..self.dims[1]).map(move |c| self.at(n, c, y, x))
    }
}

/// Pixels `(n, y, x)` whose target channels are not all zero and, when given,
/// whose first mask channel equals 1.
fn valid_pixels(
    pred: &HostMap,
    target: &HostMap,
    mask: Option<&HostMap>,
) -> Result<Vec<(usize, usize, usize)>, MetricError> {
    if pred.dims != target.dims {
        return Err(MetricError::ShapeMismatch {
            expected: target.dims.to_vec(),
            found: pred.dims.to_vec(),
        });
    }
    let [batch, _, h, w] = target.dims;
    if let Some(mask) = mask {
        let [mn, _, mh, mw] = mask.dims;
        if (mn, mh, mw) != (batch, h, w) {
            return Err(MetricError::ShapeMismatch {
                expected: vec![batch, 1, h, w],
                found: mask.dims.to_vec(),
            });
        }
    }

    let pixels = (0..batch)
        .cartesian_product(0..h)
        .cartesian_product(0..w)
        .map(|((n, y), x)| (n, y, x))
        .filter(|&(n, y, x)| target.channels(n, y, x).sum::<f32>() != 0.0)
        .filter(|&(n, y, x)| mask.map_or(true, |m| m.at(n, 0, y, x) == 1.0))
        .collect_vec();

    if pixels.is_empty() {
        Err(MetricError::EmptyMask)
    } else {
        Ok(pixels)
    }
}

/// Mean absolute and mean relative depth error over valid pixels.
///
/// `mask` optionally restricts the evaluation further (N x 1 x H x W, pixels
/// equal to 1 are kept).
pub fn depth_error<B: Backend>(
    pred: Tensor<B, 4>,
    target: Tensor<B, 4>,
    mask: Option<Tensor<B, 4>>,
) -> Result<(f64, f64), MetricError> {
    let pred = HostMap::new(pred);
    let target = HostMap::new(target);
    let mask = mask.map(HostMap::new);
    let pixels = valid_pixels(&pred, &target, mask.as_ref())?;

    let (mut abs_err, mut rel_err) = (0.0f64, 0.0f64);
    for &(n, y, x) in &pixels {
        for (p, t) in pred.channels(n, y, x).zip(target.channels(n, y, x)) {
            let err = (p as f64 - t as f64).abs();
            abs_err += err;
            rel_err += err / t as f64;
        }
    }

    let count = pixels.len() as f64;
    Ok((abs_err / count, rel_err / count))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalErrors {
    /// Mean angular error in degrees.
    pub mean: f64,
    /// Median angular error in degrees; the lower middle value for even counts.
    pub median: f64,
    pub within_11_25: f64,
    pub within_22_5: f64,
    pub within_30: f64,
}

/// Angular error between predicted and target unit normals (C = 3).
///
/// `mask` optionally restricts the evaluation further; only its first
/// channel is read.
pub fn normal_error<B: Backend>(
    pred: Tensor<B, 4>,
    target: Tensor<B, 4>,
    mask: Option<Tensor<B, 4>>,
) -> Result<NormalErrors, MetricError> {
    let pred = HostMap::new(pred);
    let target = HostMap::new(target);
    let mask = mask.map(HostMap::new);
    let pixels = valid_pixels(&pred, &target, mask.as_ref())?;

    let errors = pixels
        .iter()
        .map(|&(n, y, x)| {
            let dot: f64 = pred
                .channels(n, y, x)
                .zip(target.channels(n, y, x))
                .map(|(p, t)| p as f64 * t as f64)
                .sum();
            dot.clamp(-1.0, 1.0).acos().to_degrees()
        })
        .sorted_by(|a, b| a.total_cmp(b))
        .collect_vec();

    let count = errors.len() as f64;
    let within = |threshold: f64| errors.iter().filter(|e| **e < threshold).count() as f64 / count;
    let [t1, t2, t3] = ANGLE_THRESHOLDS;

    Ok(NormalErrors {
        mean: errors.iter().sum::<f64>() / count,
        median: errors[(errors.len() - 1) / 2],
        within_11_25: within(t1),
        within_22_5: within(t2),
        within_30: within(t3),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Data, Shape};

    type B = burn::backend::NdArray;

    fn dense(values: Vec<f32>, shape: [usize; 4]) -> Tensor<B, 4> {
        Tensor::from_floats(Data::new(values, Shape::new(shape)), &Default::default())
    }

    #[test]
    fn perfect_prediction() {
        let mut conf = ConfMatrix::new(3);
        conf.update_indices(&[0, 1, 2, 2], &[0, 1, 2, 2]).unwrap();
        assert_eq!(conf.get_metrics().unwrap(), (1.0, 1.0));
    }

    #[test]
    fn known_matrix() {
        let mut conf = ConfMatrix::new(2);
        conf.update_indices(&[0, 1, 1, 1], &[0, 0, 1, 1]).unwrap();
        assert_eq!(conf.matrix().unwrap(), &[1, 1, 0, 2]);

        let (miou, acc) = conf.get_metrics().unwrap();
        // class 0: 1 / 2, class 1: 2 / 3
        assert!((miou - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        assert!((acc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn invalid_targets_are_skipped() {
        let mut conf = ConfMatrix::new(2);
        conf.update_indices(&[0, 1, 7], &[0, -1, 255]).unwrap();
        assert_eq!(conf.matrix().unwrap(), &[1, 0, 0, 0]);
    }

    #[test]
    fn bad_prediction_leaves_matrix_untouched() {
        let mut conf = ConfMatrix::new(2);
        conf.update_indices(&[0], &[0]).unwrap();
        assert_eq!(
            conf.update_indices(&[0, 5], &[1, 1]),
            Err(MetricError::PredictionOutOfRange(5))
        );
        assert_eq!(conf.matrix().unwrap(), &[1, 0, 0, 0]);
    }

    #[test]
    fn metrics_before_update() {
        let conf = ConfMatrix::new(4);
        assert!(conf.matrix().is_none());
        assert_eq!(conf.get_metrics(), Err(MetricError::NotUpdated));
    }

    #[test]
    fn absent_classes_leave_the_mean() {
        let mut conf = ConfMatrix::new(5);
        conf.update_indices(&[0, 1], &[0, 1]).unwrap();
        assert_eq!(conf.class_iou().unwrap()[4], None);
        assert_eq!(conf.get_metrics().unwrap().0, 1.0);
    }

    #[test]
    fn update_from_tensors() {
        let device = Default::default();
        let pred = Tensor::<B, 3, Int>::from_ints([[[0, 1], [1, 1]]], &device);
        let target = Tensor::<B, 3, Int>::from_ints([[[0, 1], [-1, 0]]], &device);
        let mut conf = ConfMatrix::new(2);
        conf.update(pred, target).unwrap();
        assert_eq!(conf.matrix().unwrap(), &[1, 1, 0, 1]);

        let short = Tensor::<B, 3, Int>::zeros([1, 1, 2], &device);
        let long = Tensor::<B, 3, Int>::zeros([1, 2, 2], &device);
        assert!(matches!(
            conf.update(short, long),
            Err(MetricError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn depth_error_over_valid_pixels() {
        let target = dense(vec![2.0, 0.0, 4.0, 1.0], [1, 1, 2, 2]);
        let pred = dense(vec![1.0, 9.0, 4.0, 2.0], [1, 1, 2, 2]);
        let (abs, rel) = depth_error(pred, target, None).unwrap();
        assert!((abs - 2.0 / 3.0).abs() < 1e-9);
        assert!((rel - (0.5 + 0.0 + 1.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn depth_error_with_mask() {
        let target = dense(vec![2.0, 0.0, 4.0, 1.0], [1, 1, 2, 2]);
        let pred = dense(vec![1.0, 9.0, 4.0, 2.0], [1, 1, 2, 2]);
        let mask = dense(vec![1.0, 1.0, 1.0, 0.0], [1, 1, 2, 2]);
        let (abs, rel) = depth_error(pred, target, Some(mask)).unwrap();
        assert!((abs - 0.5).abs() < 1e-9);
        assert!((rel - 0.25).abs() < 1e-9);
    }

    #[test]
    fn depth_error_empty_mask() {
        let target = dense(vec![0.0; 4], [1, 1, 2, 2]);
        let pred = dense(vec![1.0; 4], [1, 1, 2, 2]);
        assert_eq!(depth_error(pred, target, None), Err(MetricError::EmptyMask));
    }

    #[test]
    fn normal_error_angles() {
        // 3 pixels: same direction, 90 degrees apart, missing target
        let target = dense(
            vec![
                1.0, 1.0, 0.0, // x
                0.0, 0.0, 0.0, // y
                0.0, 0.0, 0.0, // z
            ],
            [1, 3, 1, 3],
        );
        let pred = dense(
            vec![
                1.0, 0.0, 1.0, //
                0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, //
            ],
            [1, 3, 1, 3],
        );
        let errors = normal_error(pred, target, None).unwrap();
        assert!((errors.mean - 45.0).abs() < 1e-6);
        assert!(errors.median.abs() < 1e-6);
        assert_eq!(errors.within_11_25, 0.5);
        assert_eq!(errors.within_22_5, 0.5);
        assert_eq!(errors.within_30, 0.5);
    }

    #[test]
    fn normal_error_reads_first_mask_channel() {
        let target = dense(vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0], [1, 3, 1, 2]);
        let pred = dense(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0], [1, 3, 1, 2]);
        let mask = dense(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0], [1, 3, 1, 2]);
        let errors = normal_error(pred, target, Some(mask)).unwrap();
        assert_eq!(errors.mean, 0.0);
        assert_eq!(errors.within_11_25, 1.0);
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let target = dense(vec![1.0; 4], [1, 1, 2, 2]);
        let mask = dense(vec![1.0; 2], [1, 1, 1, 2]);
        assert!(matches!(
            depth_error(target.clone(), target, Some(mask)),
            Err(MetricError::ShapeMismatch { .. })
        ));
    }
}
