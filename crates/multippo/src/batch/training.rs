//! Postprocessed batches consumed by the loss.

use super::{check_agent_columns, check_rows, StepInfo, TrajectorySegment};
use crate::{MultiPpoError, Result};
use ndarray::{concatenate, stack, Array1, Array2, ArrayView2, Axis};

/// One agent's view of a segment after advantage estimation
#[derive(Clone, Debug)]
pub struct AgentBatch {
    /// Agent slot
    pub agent: usize,
    /// Decomposed reward (or the shared reward on fallback)
    pub rewards: Array1<f32>,
    /// This agent's sub-action
    pub actions: Array1<f32>,
    /// This agent's value predictions
    pub vf_preds: Array1<f32>,
    /// Advantage estimates
    pub advantages: Array1<f32>,
    /// Value-function regression targets
    pub value_targets: Array1<f32>,
}

/// Training data with per-agent columns stacked on a trailing axis.
///
/// Column `i` of `rewards`, `vf_preds`, `advantages` and `value_targets`
/// always belongs to agent `i`.
#[derive(Clone, Debug)]
pub struct TrainingBatch {
    /// Observations [N, obs_dim]
    pub obs: Array2<f32>,
    /// Next observations [N, obs_dim]
    pub next_obs: Option<Array2<f32>>,
    /// Sub-actions [N, A]
    pub actions: Array2<f32>,
    /// Sampling-time distribution parameters [N, P]
    pub action_dist_inputs: Array2<f32>,
    /// Sampling-time log-probabilities [N, A]
    pub action_logp: Array2<f32>,
    /// Episode-done flags [N]
    pub dones: Vec<bool>,
    /// Per-step infos
    pub infos: Vec<StepInfo>,
    /// Recurrent state inputs, each [N, state_dim]
    pub state_in: Vec<Array2<f32>>,
    /// Recurrent state outputs, each [N, state_dim]
    pub state_out: Vec<Array2<f32>>,
    /// Sequence lengths for recurrent models
    pub seq_lens: Option<Vec<usize>>,
    /// Per-agent rewards [N, A]
    pub rewards: Array2<f32>,
    /// Per-agent value predictions [N, A]
    pub vf_preds: Array2<f32>,
    /// Per-agent advantages [N, A]
    pub advantages: Array2<f32>,
    /// Per-agent value targets [N, A]
    pub value_targets: Array2<f32>,
}

impl TrainingBatch {
    /// Stack per-agent batches onto the shared columns of `segment`.
    ///
    /// `agents[i]` must be the batch of agent `i`.
    pub fn from_agent_batches(segment: &TrajectorySegment, agents: &[AgentBatch]) -> Result<Self> {
        if agents.is_empty() {
            return Err(MultiPpoError::agents("agent batches", 1, 0));
        }
        for (slot, batch) in agents.iter().enumerate() {
            if batch.agent != slot {
                return Err(MultiPpoError::InvalidConfig(format!(
                    "agent batch for agent {} placed in slot {slot}",
                    batch.agent
                )));
            }
        }

        let column = |f: fn(&AgentBatch) -> &Array1<f32>| -> Result<Array2<f32>> {
            let views: Vec<_> = agents.iter().map(|b| f(b).view()).collect();
            stack(Axis(1), &views).map_err(|_| {
                MultiPpoError::shape(
                    "agent batch columns",
                    &[segment.len()],
                    &views.iter().map(|v| v.len()).collect::<Vec<_>>(),
                )
            })
        };

        Ok(Self {
            obs: segment.obs.clone(),
            next_obs: segment.next_obs.clone(),
            actions: segment.actions.clone(),
            action_dist_inputs: segment.action_dist_inputs.clone(),
            action_logp: segment.action_logp.clone(),
            dones: segment.dones.clone(),
            infos: segment.infos.clone(),
            state_in: segment.state_in.clone(),
            state_out: segment.state_out.clone(),
            seq_lens: segment.seq_lens.clone(),
            rewards: column(|b| &b.rewards)?,
            vf_preds: column(|b| &b.vf_preds)?,
            advantages: column(|b| &b.advantages)?,
            value_targets: column(|b| &b.value_targets)?,
        })
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.obs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.obs.nrows() == 0
    }

    /// Width of the trailing agent axis
    pub fn num_agents(&self) -> usize {
        self.advantages.ncols()
    }

    /// Check every column against `num_agents` and the row count
    pub fn validate(&self, num_agents: usize) -> Result<()> {
        let n = self.len();
        if n == 0 {
            return Err(MultiPpoError::DegenerateBatch("batch has no rows".into()));
        }
        check_agent_columns("actions", &self.actions, n, num_agents)?;
        check_agent_columns("action_logp", &self.action_logp, n, num_agents)?;
        check_agent_columns("rewards", &self.rewards, n, num_agents)?;
        check_agent_columns("vf_preds", &self.vf_preds, n, num_agents)?;
        check_agent_columns("advantages", &self.advantages, n, num_agents)?;
        check_agent_columns("value_targets", &self.value_targets, n, num_agents)?;
        check_rows("action_dist_inputs", &self.action_dist_inputs, n)?;
        for (i, state) in self.state_in.iter().enumerate() {
            check_rows(&format!("state_in_{i}"), state, n)?;
        }
        for (i, state) in self.state_out.iter().enumerate() {
            check_rows(&format!("state_out_{i}"), state, n)?;
        }
        Ok(())
    }

    /// Concatenate batches along the time axis
    pub fn concat(batches: &[TrainingBatch]) -> Result<Self> {
        let first = batches
            .first()
            .ok_or_else(|| MultiPpoError::DegenerateBatch("nothing to concatenate".into()))?;
        if batches.len() == 1 {
            return Ok(first.clone());
        }

        let num_states = first.state_in.len();
        let num_states_out = first.state_out.len();
        if batches
            .iter()
            .any(|b| b.state_in.len() != num_states || b.state_out.len() != num_states_out)
        {
            return Err(MultiPpoError::InvalidConfig(
                "batches carry different numbers of state tensors".into(),
            ));
        }

        let cat = |what: &str, f: fn(&TrainingBatch) -> &Array2<f32>| -> Result<Array2<f32>> {
            let views: Vec<ArrayView2<f32>> = batches.iter().map(|b| f(b).view()).collect();
            concatenate(Axis(0), &views).map_err(|_| {
                MultiPpoError::shape(
                    what,
                    &[first.len(), f(first).ncols()],
                    &views.iter().map(|v| v.ncols()).collect::<Vec<_>>(),
                )
            })
        };

        let next_obs = if batches.iter().all(|b| b.next_obs.is_some()) {
            Some(cat("next_obs", |b| b.next_obs.as_ref().unwrap_or(&b.obs))?)
        } else {
            None
        };

        let seq_lens = match batches.iter().filter(|b| b.seq_lens.is_some()).count() {
            0 => None,
            n if n == batches.len() => Some(
                batches
                    .iter()
                    .flat_map(|b| b.seq_lens.iter().flatten().copied())
                    .collect(),
            ),
            _ => {
                return Err(MultiPpoError::InvalidConfig(
                    "cannot mix batches with and without seq_lens".into(),
                ))
            }
        };

        let cat_states = |what: &str, f: fn(&TrainingBatch) -> &[Array2<f32>]| {
            (0..f(first).len())
                .map(|i| {
                    let views: Vec<ArrayView2<f32>> =
                        batches.iter().map(|b| f(b)[i].view()).collect();
                    concatenate(Axis(0), &views).map_err(|_| {
                        MultiPpoError::shape(
                            format!("{what}_{i}"),
                            &[f(first)[i].ncols()],
                            &views.iter().map(|v| v.ncols()).collect::<Vec<_>>(),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()
        };
        let state_in = cat_states("state_in", |b| b.state_in.as_slice())?;
        let state_out = cat_states("state_out", |b| b.state_out.as_slice())?;

        Ok(Self {
            obs: cat("obs", |b| &b.obs)?,
            next_obs,
            actions: cat("actions", |b| &b.actions)?,
            action_dist_inputs: cat("action_dist_inputs", |b| &b.action_dist_inputs)?,
            action_logp: cat("action_logp", |b| &b.action_logp)?,
            dones: batches.iter().flat_map(|b| b.dones.iter().copied()).collect(),
            infos: batches.iter().flat_map(|b| b.infos.iter().cloned()).collect(),
            state_in,
            state_out,
            seq_lens,
            rewards: cat("rewards", |b| &b.rewards)?,
            vf_preds: cat("vf_preds", |b| &b.vf_preds)?,
            advantages: cat("advantages", |b| &b.advantages)?,
            value_targets: cat("value_targets", |b| &b.value_targets)?,
        })
    }
}
