//! Raw trajectory segment produced by a rollout worker.

use super::{check_agent_columns, check_rows, StepInfo};
use crate::{MultiPpoError, Result};
use ndarray::{Array1, Array2};

/// Ordered timesteps of one rollout worker.
///
/// Every column has `T` rows. Per-agent columns (`actions`, `action_logp`,
/// `vf_preds`) have one slot per co-located agent.
#[derive(Clone, Debug)]
pub struct TrajectorySegment {
    /// Observations [T, obs_dim]
    pub obs: Array2<f32>,
    /// Observations following each step [T, obs_dim], used for bootstrapping
    pub next_obs: Option<Array2<f32>>,
    /// One scalar sub-action per agent [T, A]
    pub actions: Array2<f32>,
    /// Distribution parameters the actions were sampled from [T, P]
    pub action_dist_inputs: Array2<f32>,
    /// Log-probability of each agent's sub-action [T, A]
    pub action_logp: Array2<f32>,
    /// Value predictions at sampling time [T, A]
    pub vf_preds: Array2<f32>,
    /// Shared reward [T]
    pub rewards: Array1<f32>,
    /// Episode-done flags [T]
    pub dones: Vec<bool>,
    /// Per-step info side-channel (may be empty)
    pub infos: Vec<StepInfo>,
    /// Recurrent state inputs, each [T, state_dim] (empty for feed-forward models)
    pub state_in: Vec<Array2<f32>>,
    /// Recurrent state after each step, each [T, state_dim]; pairs with `next_obs`
    pub state_out: Vec<Array2<f32>>,
    /// Sequence lengths for recurrent models
    pub seq_lens: Option<Vec<usize>>,
}

impl TrajectorySegment {
    /// Create a segment without infos or recurrent state
    pub fn new(
        obs: Array2<f32>,
        actions: Array2<f32>,
        action_dist_inputs: Array2<f32>,
        action_logp: Array2<f32>,
        vf_preds: Array2<f32>,
        rewards: Array1<f32>,
        dones: Vec<bool>,
    ) -> Self {
        Self {
            obs,
            next_obs: None,
            actions,
            action_dist_inputs,
            action_logp,
            vf_preds,
            rewards,
            dones,
            infos: Vec::new(),
            state_in: Vec::new(),
            state_out: Vec::new(),
            seq_lens: None,
        }
    }

    /// Attach per-step infos
    pub fn with_infos(mut self, infos: Vec<StepInfo>) -> Self {
        self.infos = infos;
        self
    }

    /// Attach next observations
    pub fn with_next_obs(mut self, next_obs: Array2<f32>) -> Self {
        self.next_obs = Some(next_obs);
        self
    }

    /// Attach recurrent state inputs and sequence lengths
    pub fn with_state(mut self, state_in: Vec<Array2<f32>>, seq_lens: Vec<usize>) -> Self {
        self.state_in = state_in;
        self.seq_lens = Some(seq_lens);
        self
    }

    /// Attach the recurrent state produced by each step
    pub fn with_state_out(mut self, state_out: Vec<Array2<f32>>) -> Self {
        self.state_out = state_out;
        self
    }

    /// Number of timesteps
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// Whether the segment ends at a true episode boundary
    pub fn is_terminated(&self) -> bool {
        self.dones.last().copied().unwrap_or(false)
    }

    /// Check column lengths and per-agent widths
    pub fn validate(&self, num_agents: usize) -> Result<()> {
        let t = self.len();
        if t == 0 {
            return Err(MultiPpoError::EmptySegment);
        }
        check_rows("obs", &self.obs, t)?;
        if let Some(next_obs) = &self.next_obs {
            if next_obs.dim() != self.obs.dim() {
                let (rows, cols) = self.obs.dim();
                let (n_rows, n_cols) = next_obs.dim();
                return Err(MultiPpoError::shape(
                    "next_obs",
                    &[rows, cols],
                    &[n_rows, n_cols],
                ));
            }
        }
        check_agent_columns("actions", &self.actions, t, num_agents)?;
        check_agent_columns("action_logp", &self.action_logp, t, num_agents)?;
        check_agent_columns("vf_preds", &self.vf_preds, t, num_agents)?;
        check_rows("action_dist_inputs", &self.action_dist_inputs, t)?;
        if self.dones.len() != t {
            return Err(MultiPpoError::shape("dones", &[t], &[self.dones.len()]));
        }
        for (i, state) in self.state_in.iter().enumerate() {
            check_rows(&format!("state_in_{i}"), state, t)?;
        }
        if !self.state_out.is_empty() {
            if self.state_out.len() != self.state_in.len() {
                return Err(MultiPpoError::shape(
                    "state_out tensors",
                    &[self.state_in.len()],
                    &[self.state_out.len()],
                ));
            }
            for (i, (out, inp)) in self.state_out.iter().zip(&self.state_in).enumerate() {
                if out.dim() != inp.dim() {
                    let (rows, cols) = inp.dim();
                    let (o_rows, o_cols) = out.dim();
                    return Err(MultiPpoError::shape(
                        format!("state_out_{i}"),
                        &[rows, cols],
                        &[o_rows, o_cols],
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(t: usize, agents: usize) -> TrajectorySegment {
        TrajectorySegment::new(
            Array2::zeros((t, 4)),
            Array2::zeros((t, agents)),
            Array2::zeros((t, agents * 2)),
            Array2::zeros((t, agents)),
            Array2::zeros((t, agents)),
            Array1::zeros(t),
            vec![false; t],
        )
    }

    #[test]
    fn test_valid_segment() {
        let seg = segment(5, 3);
        assert_eq!(seg.len(), 5);
        assert!(!seg.is_terminated());
        seg.validate(3).unwrap();
    }

    #[test]
    fn test_agent_width_mismatch_is_detected() {
        let seg = segment(5, 2);
        let err = seg.validate(3).unwrap_err();
        assert!(matches!(
            err,
            MultiPpoError::AgentCountMismatch {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_length_mismatch_is_detected() {
        let mut seg = segment(5, 3);
        seg.dones.pop();
        assert!(matches!(
            seg.validate(3),
            Err(MultiPpoError::ShapeMismatch { .. })
        ));

        let mut seg = segment(5, 3);
        seg.obs = Array2::zeros((4, 4));
        assert!(seg.validate(3).is_err());
    }

    #[test]
    fn test_state_out_must_mirror_state_in() {
        let seg = segment(2, 3).with_state(vec![Array2::zeros((2, 4))], vec![2]);
        seg.clone()
            .with_state_out(vec![Array2::ones((2, 4))])
            .validate(3)
            .unwrap();
        assert!(seg
            .clone()
            .with_state_out(vec![Array2::ones((2, 3))])
            .validate(3)
            .is_err());
        assert!(seg
            .with_state_out(vec![Array2::ones((2, 4)), Array2::ones((2, 4))])
            .validate(3)
            .is_err());
    }

    #[test]
    fn test_empty_segment() {
        assert!(matches!(
            segment(0, 3).validate(3),
            Err(MultiPpoError::EmptySegment)
        ));
    }
}
