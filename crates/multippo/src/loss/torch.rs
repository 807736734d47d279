//! Differentiable rendition of the multi-agent surrogate loss over `tch` tensors.
//!
//! Mirrors [`super::ppo_surrogate_loss`] term for term. The total loss keeps
//! its graph back to the model outputs; the diagnostics are detached.

use super::{LossCoefficients, LossStats, MeanReducer};
use crate::batch::TrainingBatch;
use crate::config::PpoConfig;
use crate::policy::torch::{to_array2, to_tensor, TensorOutput};
use crate::policy::{ActionDistKind, DistributionFamily};
use crate::utils::explained_variance;
use crate::{MultiPpoError, Result};
use tch::{Kind, Tensor};

/// Loss tensor plus detached diagnostics
pub struct TensorLossOutput {
    /// Sum of the per-agent losses, differentiable
    pub total_loss: Tensor,
    /// Per-agent losses [A]
    pub agent_losses: Tensor,
    pub stats: LossStats,
}

/// Clipped surrogate objective per element
pub fn ppo_surrogate(advantages: &Tensor, logp: &Tensor, old_logp: &Tensor, clip: f64) -> Tensor {
    let ratio = (logp - old_logp).exp();
    let surr1 = &ratio * advantages;
    let surr2 = ratio.clamp(1.0 - clip, 1.0 + clip) * advantages;
    surr1.min_other(&surr2)
}

/// Clipped squared value error per element
pub fn ppo_value_error(
    values: &Tensor,
    old_values: &Tensor,
    targets: &Tensor,
    clip: f64,
) -> Tensor {
    let values_clipped = old_values + (values - old_values).clamp(-clip, clip);
    let loss1 = (values - targets).pow_tensor_scalar(2);
    let loss2 = (&values_clipped - targets).pow_tensor_scalar(2);
    loss1.max_other(&loss2)
}

/// Mean over valid rows of a [N, A] tensor, giving [A]
struct TensorReducer {
    weights: Option<Tensor>,
    num_valid: f64,
}

impl TensorReducer {
    fn new(reducer: &MeanReducer, like: &Tensor) -> Self {
        let weights = reducer.mask().map(|mask| {
            let w: Vec<f32> = mask.iter().map(|&v| if v { 1.0 } else { 0.0 }).collect();
            Tensor::from_slice(&w).to_device(like.device()).unsqueeze(-1)
        });
        Self {
            weights,
            num_valid: reducer.num_valid() as f64,
        }
    }

    fn mean(&self, x: &Tensor) -> Tensor {
        match &self.weights {
            None => x.mean_dim(Some(&[0i64][..]), false, Kind::Float),
            Some(w) => (x * w).sum_dim_intlist(Some(&[0i64][..]), false, Kind::Float) / self.num_valid,
        }
    }

    /// Mean over valid rows and agents as a detached scalar
    fn scalar(&self, x: &Tensor) -> f64 {
        self.mean(x).mean(Kind::Float).double_value(&[])
    }
}

fn check_dims(what: &str, t: &Tensor, rows: usize, cols: usize) -> Result<()> {
    let size = t.size();
    if size != [rows as i64, cols as i64] {
        let actual: Vec<usize> = size.iter().map(|&d| d as usize).collect();
        return Err(MultiPpoError::shape(what, &[rows, cols], &actual));
    }
    Ok(())
}

/// Evaluate the summed per-agent PPO loss on the model's tensor outputs.
///
/// Padded steps are masked out whenever the model returns recurrent state.
pub fn ppo_surrogate_loss(
    config: &PpoConfig,
    family: &ActionDistKind,
    batch: &TrainingBatch,
    output: &TensorOutput,
    coeffs: LossCoefficients,
    time_major: bool,
) -> Result<TensorLossOutput> {
    let num_agents = config.num_agents;
    batch.validate(num_agents)?;
    let n = batch.len();

    if family.num_sub_actions() != num_agents {
        return Err(MultiPpoError::agents(
            "distribution sub-actions",
            num_agents,
            family.num_sub_actions(),
        ));
    }
    check_dims("dist_inputs", &output.dist_inputs, n, family.input_dim())?;
    check_dims("values", &output.values, n, num_agents)?;

    let reducer = if output.state_out.is_empty() {
        MeanReducer::unmasked(n)
    } else {
        let seq_lens = batch
            .seq_lens
            .as_deref()
            .ok_or_else(|| MultiPpoError::shape("seq_lens", &[n], &[0]))?;
        MeanReducer::from_seq_lens(seq_lens, n, time_major)?
    };
    if reducer.num_valid() == 0 {
        return Err(MultiPpoError::DegenerateBatch(
            "no valid steps in batch".into(),
        ));
    }
    let reducer = TensorReducer::new(&reducer, &output.values);

    let device = output.values.device();
    let column = |a: &ndarray::Array2<f32>| to_tensor(a.view(), device);

    let curr = family.construct_tensor(&output.dist_inputs)?;
    let prev = family.construct_tensor(&column(&batch.action_dist_inputs))?;
    let action_kl = prev.kl(&curr)?;
    let logp = curr.logp(&column(&batch.actions))?;
    let entropy = curr.entropy();

    let advantages = column(&batch.advantages);
    let surrogate = ppo_surrogate(
        &advantages,
        &logp,
        &column(&batch.action_logp),
        config.clip_param,
    );
    let mut per_step =
        -&surrogate + &action_kl * coeffs.kl_coeff - &entropy * coeffs.entropy_coeff;

    let vf_loss = if config.use_gae {
        let vf = ppo_value_error(
            &output.values,
            &column(&batch.vf_preds),
            &column(&batch.value_targets),
            config.vf_clip_param,
        );
        per_step = per_step + &vf * config.vf_loss_coeff;
        reducer.scalar(&vf)
    } else {
        0.0
    };

    let agent_losses = reducer.mean(&per_step);
    let total_loss = agent_losses.sum(Kind::Float);
    let kl_sum = action_kl.sum_dim_intlist(Some(&[-1i64][..]), true, Kind::Float);

    let stats = LossStats {
        total_loss: total_loss.double_value(&[]),
        policy_loss: reducer.scalar(&(-&surrogate)),
        vf_loss,
        entropy: reducer.scalar(&entropy),
        kl: reducer.scalar(&kl_sum),
        vf_explained_var: explained_variance(&batch.value_targets, &to_array2(&output.values)?),
    };

    tracing::trace!(
        total_loss = stats.total_loss,
        kl = stats.kl,
        "Evaluated tensor surrogate loss"
    );

    Ok(TensorLossOutput {
        total_loss,
        agent_losses,
        stats,
    })
}
