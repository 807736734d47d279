//! Per-agent advantage estimation over a trajectory segment.

use super::compute_advantages;
use crate::batch::{decode_agent_rewards, AgentBatch, TrainingBatch, TrajectorySegment};
use crate::config::PpoConfig;
use crate::policy::{InputIndex, Model};
use crate::{MultiPpoError, Result};
use ndarray::Array1;
use std::sync::atomic::{AtomicU64, Ordering};

/// Turns raw segments into training batches with per-agent advantages.
///
/// Each agent gets its own advantage stream computed from its own reward
/// and value column. The bootstrap value comes from a single forward pass
/// shared by every agent.
#[derive(Debug)]
pub struct Postprocessor {
    num_agents: usize,
    gamma: f64,
    lambda: f64,
    use_gae: bool,
    use_critic: bool,
    fallbacks: AtomicU64,
}

impl Postprocessor {
    pub fn new(config: &PpoConfig) -> Self {
        Self {
            num_agents: config.num_agents,
            gamma: config.gamma,
            lambda: config.lambda,
            use_gae: config.use_gae,
            use_critic: config.use_critic,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Number of segments that used the shared reward for every agent
    pub fn reward_fallbacks(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Compute advantages and value targets for every agent of `segment`.
    pub fn process<M: Model + ?Sized>(
        &self,
        model: &M,
        segment: &TrajectorySegment,
    ) -> Result<TrainingBatch> {
        segment.validate(self.num_agents)?;
        let steps = segment.len();

        let rewards = match decode_agent_rewards(&segment.infos, self.num_agents, steps) {
            Ok(rewards) => rewards,
            Err(reason) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    %reason,
                    steps,
                    "Per-agent rewards unavailable, using shared reward"
                );
                vec![segment.rewards.clone(); self.num_agents]
            }
        };

        let last_r = self.bootstrap_values(model, segment)?;

        let agents = rewards
            .into_iter()
            .enumerate()
            .map(|(agent, agent_rewards)| {
                let vf_preds = segment.vf_preds.column(agent).to_owned();
                let out = compute_advantages(
                    agent_rewards.view(),
                    vf_preds.view(),
                    last_r[agent],
                    self.gamma,
                    self.lambda,
                    self.use_gae,
                    self.use_critic,
                );
                AgentBatch {
                    agent,
                    rewards: agent_rewards,
                    actions: segment.actions.column(agent).to_owned(),
                    vf_preds,
                    advantages: out.advantages,
                    value_targets: out.value_targets,
                }
            })
            .collect::<Vec<_>>();

        tracing::trace!(
            steps,
            agents = self.num_agents,
            terminated = segment.is_terminated(),
            "Postprocessed segment"
        );
        TrainingBatch::from_agent_batches(segment, &agents)
    }

    /// Value of the state after the final step for every agent.
    ///
    /// Zero when the segment ends an episode, in which case the model is not
    /// queried. A truncated segment is always bootstrapped from the model.
    fn bootstrap_values<M: Model + ?Sized>(
        &self,
        model: &M,
        segment: &TrajectorySegment,
    ) -> Result<Array1<f32>> {
        if segment.is_terminated() {
            return Ok(Array1::zeros(self.num_agents));
        }

        let input = model.input_dict(segment, InputIndex::Last)?;
        let output = model.forward(&input)?;
        if output.values.dim() != (1, self.num_agents) {
            return Err(MultiPpoError::shape(
                "bootstrap values",
                &[1, self.num_agents],
                output.values.shape(),
            ));
        }
        Ok(output.values.row(0).to_owned())
    }
}
