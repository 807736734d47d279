mod common;

use common::{uniform_segment, FixedModel};
use multippo::prelude::*;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn train_batch(agents: usize) -> TrainingBatch {
    let config = PpoConfig::default()
        .with_num_agents(agents)
        .with_discount(0.99, 0.95);
    let post = Postprocessor::new(&config);
    let model = FixedModel::new(agents, 2, 0.0);
    let segment = uniform_segment(
        agents,
        &[1.0, 0.0, -1.0, 0.5, 2.0],
        &[false, false, false, false, true],
        0.25,
    );
    post.process(&model, &segment).unwrap()
}

fn loss_for(agents: usize) -> LossOutput {
    let config = PpoConfig::default()
        .with_num_agents(agents)
        .with_entropy_coeff(0.01);
    let mut model = FixedModel::new(agents, 2, 0.75);
    model.logit = 0.3;
    let batch = train_batch(agents);
    let output = model.forward(&ModelInput::from_batch(&batch)).unwrap();
    let family = ActionDistKind::multi_categorical(vec![2; agents]);
    let coeffs = LossCoefficients {
        kl_coeff: 0.2,
        entropy_coeff: config.entropy_coeff,
    };
    ppo_surrogate_loss(&config, &family, &batch, &output, coeffs, false).unwrap()
}

#[test]
fn test_identical_agents_triple_the_loss() {
    let single = loss_for(1);
    let triple = loss_for(3);

    assert_eq!(triple.agent_losses.len(), 3);
    assert_eq!(triple.total_loss, 3.0 * single.total_loss);
    assert!((triple.stats.policy_loss - single.stats.policy_loss).abs() < 1e-12);
    assert!((triple.stats.vf_loss - single.stats.vf_loss).abs() < 1e-12);
    assert!((triple.stats.entropy - single.stats.entropy).abs() < 1e-12);
    assert!((triple.stats.kl - 3.0 * single.stats.kl).abs() < 1e-12);
    assert!((triple.stats.vf_explained_var - single.stats.vf_explained_var).abs() < 1e-12);
}

#[test]
fn test_agent_losses_sum_to_total() {
    let out = loss_for(3);
    let sum: f64 = out.agent_losses.iter().map(|l| l.total_loss).sum();
    assert_eq!(out.total_loss, sum);
    assert_eq!(out.stats.total_loss, out.total_loss);
}

/// Policy loss of a single agent whose action-0 logit moved from 0 to `logit`
fn policy_loss(logit: f32, advantage: f32, clip: f64) -> f64 {
    let config = PpoConfig {
        clip_param: clip,
        ..PpoConfig::default().with_num_agents(1)
    };
    let segment = TrajectorySegment::new(
        Array2::zeros((1, 1)),
        Array2::zeros((1, 1)),
        Array2::zeros((1, 2)),
        Array2::from_elem((1, 1), 0.5f32.ln()),
        Array2::zeros((1, 1)),
        Array1::zeros(1),
        vec![true],
    );
    let mut batch = Postprocessor::new(&config)
        .process(&FixedModel::new(1, 2, 0.0), &segment)
        .unwrap();
    batch.advantages[[0, 0]] = advantage;

    let output = ModelOutput {
        dist_inputs: Array2::from_shape_vec((1, 2), vec![logit, 0.0]).unwrap(),
        state_out: Vec::new(),
        values: Array2::zeros((1, 1)),
    };
    let coeffs = LossCoefficients {
        kl_coeff: 0.0,
        entropy_coeff: 0.0,
    };
    let family = ActionDistKind::multi_categorical(vec![2]);
    ppo_surrogate_loss(&config, &family, &batch, &output, coeffs, false)
        .unwrap()
        .stats
        .policy_loss
}

#[test]
fn test_positive_advantage_objective_is_monotone_then_flat() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
        let clip = rng.gen_range(0.05..0.5);
        let advantage = rng.gen_range(0.1f32..5.0);
        let a = rng.gen_range(-3.0f32..3.0);
        let b = rng.gen_range(-3.0f32..3.0);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };

        // Objective is minus the loss
        let obj_lo = -policy_loss(lo, advantage, clip);
        let obj_hi = -policy_loss(hi, advantage, clip);
        assert!(obj_hi >= obj_lo - 1e-6, "objective decreased: {obj_lo} -> {obj_hi}");
        assert!(obj_hi <= f64::from(advantage) * (1.0 + clip) + 1e-6);
    }
}

#[test]
fn test_objective_flat_beyond_clip() {
    // Ratio 2p with p = sigmoid(logit); both logits put the ratio above 1.2
    let a = policy_loss(1.5, 2.0, 0.2);
    let b = policy_loss(3.0, 2.0, 0.2);
    assert!((a - b).abs() < 1e-6);
    assert!((a + 2.4).abs() < 1e-6);
}

#[test]
fn test_random_batches_report_finite_stats() {
    let mut rng = StdRng::seed_from_u64(42);
    let agents = 3;
    let n = 16;
    let config = PpoConfig::default();
    let family = ActionDistKind::multi_categorical(vec![4; agents]);

    for _ in 0..20 {
        let segment = TrajectorySegment::new(
            Array2::zeros((n, 2)),
            Array2::from_shape_fn((n, agents), |_| rng.gen_range(0..4) as f32),
            Array2::from_shape_fn((n, 4 * agents), |_| rng.gen_range(-2.0..2.0)),
            Array2::from_shape_fn((n, agents), |_| rng.gen_range(-3.0..0.0)),
            Array2::from_shape_fn((n, agents), |_| rng.gen_range(-1.0..1.0)),
            Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0)),
            (0..n).map(|t| t == n - 1).collect(),
        );
        let batch = Postprocessor::new(&config)
            .process(&FixedModel::new(agents, 4, 0.0), &segment)
            .unwrap();
        let output = ModelOutput {
            dist_inputs: Array2::from_shape_fn((n, 4 * agents), |_| rng.gen_range(-2.0..2.0)),
            state_out: Vec::new(),
            values: Array2::from_shape_fn((n, agents), |_| rng.gen_range(-1.0..1.0)),
        };
        let coeffs = LossCoefficients {
            kl_coeff: 0.2,
            entropy_coeff: 0.01,
        };
        let out = ppo_surrogate_loss(&config, &family, &batch, &output, coeffs, false).unwrap();
        assert!(out.total_loss.is_finite());
        assert!(out.stats.kl >= -1e-6);
        assert!(out.stats.vf_explained_var >= -1.0);
        assert!(out.stats.entropy <= (4.0f64).ln() + 1e-6);
    }
}
