//! Clipped surrogate loss aggregated over the agents sharing a policy.
//!
//! Every agent contributes its own PPO objective built from its column of
//! the training batch. The total loss is the sum of the per-agent losses;
//! the reported diagnostics are their unweighted means.

mod mask;
#[cfg(feature = "torch")]
pub mod torch;

pub use mask::{sequence_mask, MeanReducer};

use crate::batch::TrainingBatch;
use crate::config::PpoConfig;
use crate::policy::{ActionDistribution, DistributionFamily, ModelOutput};
use crate::utils::explained_variance;
use crate::{MultiPpoError, Result};
use ndarray::ArrayView1;
use serde::Serialize;

/// Coefficients that change between training steps
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossCoefficients {
    pub kl_coeff: f64,
    pub entropy_coeff: f64,
}

/// Loss terms of a single agent
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentLoss {
    pub total_loss: f64,
    pub mean_policy_loss: f64,
    pub mean_vf_loss: f64,
    pub mean_entropy: f64,
}

/// Diagnostics reported alongside the loss
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LossStats {
    /// Sum of the per-agent losses
    pub total_loss: f64,
    pub policy_loss: f64,
    pub vf_loss: f64,
    pub entropy: f64,
    /// Mean KL between the sampling and the current distribution
    pub kl: f64,
    pub vf_explained_var: f64,
}

/// Result of a loss evaluation
#[derive(Clone, Debug)]
pub struct LossOutput {
    pub total_loss: f64,
    pub agent_losses: Vec<AgentLoss>,
    pub stats: LossStats,
}

/// Evaluate the multi-agent PPO loss on `batch`.
///
/// `output` is the model's forward pass over the batch observations. When
/// the model returns recurrent state, padded steps beyond each sequence
/// length are excluded from every mean.
pub fn ppo_surrogate_loss<F: DistributionFamily>(
    config: &PpoConfig,
    family: &F,
    batch: &TrainingBatch,
    output: &ModelOutput,
    coeffs: LossCoefficients,
    time_major: bool,
) -> Result<LossOutput> {
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
    if output.dist_inputs.nrows() != n {
        return Err(MultiPpoError::shape(
            "dist_inputs",
            &[n, family.input_dim()],
            output.dist_inputs.shape(),
        ));
    }
    if output.values.dim() != (n, num_agents) {
        return Err(MultiPpoError::shape(
            "values",
            &[n, num_agents],
            output.values.shape(),
        ));
    }

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

    let curr = family.construct(output.dist_inputs.view())?;
    let prev = family.construct(batch.action_dist_inputs.view())?;
    let action_kl = prev.kl(&curr)?;
    let logp = curr.logp(batch.actions.view())?;
    let entropy = curr.entropy();

    let mean_kl = reducer.mean(
        action_kl
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|&k| f64::from(k)).sum::<f64>()),
    );

    let agent_losses = (0..num_agents)
        .map(|i| {
            agent_loss(
                config,
                coeffs,
                &reducer,
                AgentColumns {
                    logp: logp.column(i),
                    old_logp: batch.action_logp.column(i),
                    advantages: batch.advantages.column(i),
                    values: output.values.column(i),
                    old_values: batch.vf_preds.column(i),
                    value_targets: batch.value_targets.column(i),
                    entropy: entropy.column(i),
                    kl: action_kl.column(i),
                },
            )
        })
        .collect::<Vec<_>>();

    let total_loss: f64 = agent_losses.iter().map(|l| l.total_loss).sum();
    let agents = num_agents as f64;
    let stats = LossStats {
        total_loss,
        policy_loss: agent_losses.iter().map(|l| l.mean_policy_loss).sum::<f64>() / agents,
        vf_loss: agent_losses.iter().map(|l| l.mean_vf_loss).sum::<f64>() / agents,
        entropy: agent_losses.iter().map(|l| l.mean_entropy).sum::<f64>() / agents,
        kl: mean_kl,
        vf_explained_var: explained_variance(&batch.value_targets, &output.values),
    };

    tracing::trace!(
        total_loss,
        kl = mean_kl,
        valid = reducer.num_valid(),
        "Evaluated surrogate loss"
    );

    Ok(LossOutput {
        total_loss,
        agent_losses,
        stats,
    })
}

/// Columns of one agent, each [N]
struct AgentColumns<'a> {
    logp: ArrayView1<'a, f32>,
    old_logp: ArrayView1<'a, f32>,
    advantages: ArrayView1<'a, f32>,
    values: ArrayView1<'a, f32>,
    old_values: ArrayView1<'a, f32>,
    value_targets: ArrayView1<'a, f32>,
    entropy: ArrayView1<'a, f32>,
    kl: ArrayView1<'a, f32>,
}

fn agent_loss(
    config: &PpoConfig,
    coeffs: LossCoefficients,
    reducer: &MeanReducer,
    cols: AgentColumns<'_>,
) -> AgentLoss {
    let n = cols.logp.len();
    let clip = config.clip_param;

    let surrogate: Vec<f64> = (0..n)
        .map(|t| {
            let adv = f64::from(cols.advantages[t]);
            let ratio = (f64::from(cols.logp[t]) - f64::from(cols.old_logp[t])).exp();
            (adv * ratio).min(adv * ratio.clamp(1.0 - clip, 1.0 + clip))
        })
        .collect();

    let vf_loss: Option<Vec<f64>> = config.use_gae.then(|| {
        (0..n)
            .map(|t| {
                let v = f64::from(cols.values[t]);
                let v_old = f64::from(cols.old_values[t]);
                let target = f64::from(cols.value_targets[t]);
                let v_clipped =
                    v_old + (v - v_old).clamp(-config.vf_clip_param, config.vf_clip_param);
                (v - target).powi(2).max((v_clipped - target).powi(2))
            })
            .collect()
    });

    let entropy = cols.entropy.iter().map(|&e| f64::from(e));
    let per_step = (0..n).map(|t| {
        let mut loss = -surrogate[t] + coeffs.kl_coeff * f64::from(cols.kl[t])
            - coeffs.entropy_coeff * f64::from(cols.entropy[t]);
        if let Some(vf) = &vf_loss {
            loss += config.vf_loss_coeff * vf[t];
        }
        loss
    });

    AgentLoss {
        total_loss: reducer.mean(per_step),
        mean_policy_loss: reducer.mean(surrogate.iter().map(|s| -s)),
        mean_vf_loss: vf_loss.as_ref().map_or(0.0, |vf| reducer.mean(vf.iter().copied())),
        mean_entropy: reducer.mean(entropy),
    }
}
