use burn::tensor::{Data, Shape, Tensor};
use multi_task_utils::{
    error::{LossError, MetricError},
    loss::{model_fit, LabelSet, TaskTarget, TaskType},
    metrics::{normal_error, ConfMatrix},
};
use rand::{rngs::StdRng, Rng, SeedableRng};

type B = burn::backend::NdArray;

fn random_labels(rng: &mut StdRng, len: usize, num_classes: i64) -> Vec<i64> {
    // include some out-of-range targets
    (0..len).map(|_| rng.gen_range(-1..num_classes)).collect()
}

#[test]
fn accumulation_is_associative() {
    let mut rng = StdRng::seed_from_u64(42);
    let n = 6;
    let (pred_a, target_a) = (
        random_labels(&mut rng, 200, n).into_iter().map(|p| p.max(0)).collect::<Vec<_>>(),
        random_labels(&mut rng, 200, n),
    );
    let (pred_b, target_b) = (
        random_labels(&mut rng, 150, n).into_iter().map(|p| p.max(0)).collect::<Vec<_>>(),
        random_labels(&mut rng, 150, n),
    );

    let mut split = ConfMatrix::new(n as usize);
    split.update_indices(&pred_a, &target_a).unwrap();
    split.update_indices(&pred_b, &target_b).unwrap();

    let mut joined = ConfMatrix::new(n as usize);
    let pred = [pred_a, pred_b].concat();
    let target = [target_a, target_b].concat();
    joined.update_indices(&pred, &target).unwrap();

    assert_eq!(split.matrix(), joined.matrix());
    assert_eq!(split.get_metrics(), joined.get_metrics());
}

#[test]
fn metrics_stay_in_unit_interval() {
    let mut rng = StdRng::seed_from_u64(7);
    for num_classes in [2, 5, 21] {
        let mut conf = ConfMatrix::new(num_classes);
        for _ in 0..5 {
            let pred: Vec<i64> = (0..100)
                .map(|_| rng.gen_range(0..num_classes as i64))
                .collect();
            let target = random_labels(&mut rng, 100, num_classes as i64);
            conf.update_indices(&pred, &target).unwrap();

            let (miou, acc) = conf.get_metrics().unwrap();
            assert!((0.0..=1.0).contains(&miou));
            assert!((0.0..=1.0).contains(&acc));
        }
    }
}

#[test]
fn get_metrics_does_not_reset() {
    let mut conf = ConfMatrix::new(3);
    conf.update_indices(&[0, 1, 2], &[0, 2, 2]).unwrap();
    let first = conf.get_metrics().unwrap();
    assert_eq!(conf.get_metrics().unwrap(), first);
    assert_eq!(conf.matrix().unwrap().iter().sum::<u64>(), 3);
}

#[test]
fn angular_thresholds_are_monotonic() {
    let mut rng = StdRng::seed_from_u64(3);
    let (n, h, w) = (2, 4, 5);
    let mut unit = || {
        let v: [f32; 3] = [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 1.0];
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.map(|x| x / norm)
    };

    // planar N x 3 x H x W
    let mut planar = |_| {
        let pixels: Vec<[f32; 3]> = (0..n * h * w).map(|_| unit()).collect();
        let mut values = vec![0.0; n * 3 * h * w];
        for (i, px) in pixels.iter().enumerate() {
            let (b, rest) = (i / (h * w), i % (h * w));
            for c in 0..3 {
                values[(b * 3 + c) * h * w + rest] = px[c];
            }
        }
        Tensor::<B, 4>::from_floats(Data::new(values, Shape::new([n, 3, h, w])), &Default::default())
    };
    let pred = planar(0);
    let target = planar(1);

    let errors = normal_error(pred, target, None).unwrap();
    assert!(errors.within_11_25 <= errors.within_22_5);
    assert!(errors.within_22_5 <= errors.within_30);
    assert!((0.0..=180.0).contains(&errors.mean));
}

#[test]
fn all_invalid_batches_do_not_produce_nan() {
    let zeros = Tensor::<B, 4>::zeros([2, 3, 4, 4], &Default::default());
    let ones = Tensor::<B, 4>::ones([2, 3, 4, 4], &Default::default());

    for task in [TaskType::Depth, TaskType::Normal] {
        let result = model_fit(
            ones.clone(),
            TaskTarget::Dense(zeros.clone()),
            task,
            LabelSet::NyuV2,
        );
        assert_eq!(result.err(), Some(LossError::EmptyMask));
    }
    assert_eq!(
        normal_error(ones, zeros, None).err(),
        Some(MetricError::EmptyMask)
    );
}
