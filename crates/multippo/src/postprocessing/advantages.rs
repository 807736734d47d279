//! Advantage estimation for a single agent's reward stream.

use ndarray::{Array1, ArrayView1};

/// Advantages and value targets of one agent
#[derive(Clone, Debug, PartialEq)]
pub struct Advantages {
    pub advantages: Array1<f32>,
    pub value_targets: Array1<f32>,
}

/// Discounted cumulative sum: `y[t] = x[t] + gamma * y[t + 1]`
pub fn discount_cumsum(x: ArrayView1<'_, f64>, gamma: f64) -> Array1<f64> {
    let mut out = Array1::zeros(x.len());
    let mut running = 0.0;
    for t in (0..x.len()).rev() {
        running = x[t] + gamma * running;
        out[t] = running;
    }
    out
}

/// Compute advantages and value targets
///
/// # Arguments
/// * `rewards` - Rewards [T]
/// * `vf_preds` - Value predictions [T] (ignored when `use_critic` is false)
/// * `last_r` - Bootstrap value for the step after the last one
/// * `gamma` - Discount factor
/// * `lambda` - GAE lambda
/// * `use_gae` - GAE when true, discounted returns otherwise
/// * `use_critic` - Whether `vf_preds` serve as the baseline
///
/// # Returns
/// With GAE: `delta[t] = r[t] + gamma * V[t+1] - V[t]` with `V[T] = last_r`,
/// advantages are the `gamma * lambda` discounted sum of deltas and
/// value targets are `advantages + V`.
/// Without GAE: value targets are the discounted returns bootstrapped from
/// `last_r`, advantages are returns minus `V` (or the returns themselves
/// without a critic).
pub fn compute_advantages(
    rewards: ArrayView1<'_, f32>,
    vf_preds: ArrayView1<'_, f32>,
    last_r: f32,
    gamma: f64,
    lambda: f64,
    use_gae: bool,
    use_critic: bool,
) -> Advantages {
    let steps = rewards.len();
    let values: Array1<f64> = if use_critic {
        debug_assert_eq!(vf_preds.len(), steps);
        vf_preds.mapv(f64::from)
    } else {
        Array1::zeros(steps)
    };

    let (advantages, value_targets) = if use_gae {
        let mut deltas = Array1::zeros(steps);
        for t in 0..steps {
            let next_value = if t + 1 < steps {
                values[t + 1]
            } else {
                f64::from(last_r)
            };
            deltas[t] = f64::from(rewards[t]) + gamma * next_value - values[t];
        }
        let advantages = discount_cumsum(deltas.view(), gamma * lambda);
        let value_targets = &advantages + &values;
        (advantages, value_targets)
    } else {
        let mut rewards_plus_v = Array1::zeros(steps + 1);
        for t in 0..steps {
            rewards_plus_v[t] = f64::from(rewards[t]);
        }
        rewards_plus_v[steps] = f64::from(last_r);
        let mut returns = discount_cumsum(rewards_plus_v.view(), gamma);
        returns = returns.slice_move(ndarray::s![..steps]);

        let advantages = if use_critic {
            &returns - &values
        } else {
            returns.clone()
        };
        (advantages, returns)
    };

    Advantages {
        advantages: advantages.mapv(|x| x as f32),
        value_targets: value_targets.mapv(|x| x as f32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_discount_cumsum() {
        let out = discount_cumsum(array![1.0, 1.0, 1.0].view(), 0.5);
        assert_eq!(out.to_vec(), vec![1.75, 1.5, 1.0]);
    }

    #[test]
    fn test_gae_basic() {
        let rewards = array![1.0f32, 1.0, 1.0];
        let values = array![0.5f32, 0.5, 0.5];
        let out = compute_advantages(rewards.view(), values.view(), 0.0, 0.99, 0.95, true, true);

        // Last step: delta = 1.0 + 0 - 0.5
        assert!((out.advantages[2] - 0.5).abs() < 1e-6);
        assert!((out.value_targets[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_gae_with_lambda_zero_is_td_residual() {
        let rewards = array![1.0f32, 2.0];
        let values = array![0.5f32, 1.0];
        let out = compute_advantages(rewards.view(), values.view(), 3.0, 0.99, 0.0, true, true);

        // t=1: delta = 2.0 + 0.99 * 3.0 - 1.0
        assert!((out.advantages[1] - 3.97).abs() < 1e-5);
        // t=0: delta = 1.0 + 0.99 * 1.0 - 0.5
        assert!((out.advantages[0] - 1.49).abs() < 1e-6);
    }

    #[test]
    fn test_returns_without_gae() {
        let rewards = array![1.0f32, 0.0, 2.0];
        let values = array![0.3f32, 0.2, 0.1];
        let out = compute_advantages(rewards.view(), values.view(), 4.0, 0.5, 0.95, false, true);

        // Discounted rewards plus discounted bootstrap
        let expected: [f32; 3] = [1.0 + 0.25 * 2.0 + 0.125 * 4.0, 0.5 * 2.0 + 0.25 * 4.0, 2.0 + 0.5 * 4.0];
        for t in 0..3 {
            assert!((out.value_targets[t] - expected[t]).abs() < 1e-6);
            assert!((out.advantages[t] - (expected[t] - values[t])).abs() < 1e-6);
        }
    }

    #[test]
    fn test_no_critic_ignores_value_predictions() {
        let rewards = array![1.0f32, 1.0];
        let noisy = array![9.0f32, -9.0];
        let zeros = array![0.0f32, 0.0];
        let a = compute_advantages(rewards.view(), noisy.view(), 0.0, 0.9, 1.0, false, false);
        let b = compute_advantages(rewards.view(), zeros.view(), 0.0, 0.9, 1.0, false, false);
        assert_eq!(a, b);
        assert!((a.value_targets[0] - 1.9).abs() < 1e-6);
        assert_eq!(a.advantages, a.value_targets);
    }
}
