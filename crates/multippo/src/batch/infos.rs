//! Per-agent reward decomposition carried in step infos.
//!
//! The rollout producer attaches `{"rewards": {"0": r0, "1": r1, ...}}` (or a
//! plain array `{"rewards": [r0, r1, ...]}`) to every step. When any step is
//! missing or malformed the whole segment falls back to the shared reward.

use ndarray::Array1;
use serde::Deserialize;
use std::collections::HashMap;

/// Free-form per-step info produced by the environment
pub type StepInfo = serde_json::Value;

#[derive(Deserialize)]
struct RewardInfo {
    rewards: AgentRewards,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AgentRewards {
    Indexed(Vec<f32>),
    Keyed(HashMap<String, f32>),
}

impl AgentRewards {
    fn get(&self, agent: usize) -> Option<f32> {
        match self {
            AgentRewards::Indexed(values) => values.get(agent).copied(),
            AgentRewards::Keyed(map) => map.get(&agent.to_string()).copied(),
        }
    }
}

/// Why a segment could not be decomposed into per-agent rewards
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RewardFallback {
    #[error("segment carries no step infos")]
    Missing,

    #[error("expected {expected} step infos, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("step {step}: {reason}")]
    Malformed { step: usize, reason: String },

    #[error("step {step}: no reward for agent {agent}")]
    MissingAgent { step: usize, agent: usize },
}

/// Decode per-agent reward sequences of length `len` from step infos.
///
/// Returns one array per agent in `0..num_agents`.
pub fn decode_agent_rewards(
    infos: &[StepInfo],
    num_agents: usize,
    len: usize,
) -> Result<Vec<Array1<f32>>, RewardFallback> {
    if infos.is_empty() {
        return Err(RewardFallback::Missing);
    }
    if infos.len() != len {
        return Err(RewardFallback::Length {
            expected: len,
            actual: infos.len(),
        });
    }

    let mut per_agent = vec![Array1::<f32>::zeros(len); num_agents];
    for (step, info) in infos.iter().enumerate() {
        let decoded =
            RewardInfo::deserialize(info).map_err(|e| RewardFallback::Malformed {
                step,
                reason: e.to_string(),
            })?;
        for (agent, column) in per_agent.iter_mut().enumerate() {
            column[step] = decoded
                .rewards
                .get(agent)
                .ok_or(RewardFallback::MissingAgent { step, agent })?;
        }
    }
    Ok(per_agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyed_rewards() {
        let infos = vec![
            json!({"rewards": {"0": 1.0, "1": 2.0, "2": 3.0}}),
            json!({"rewards": {"0": -1.0, "1": 0.0, "2": 0.5}, "dones": {"0": false}}),
        ];
        let rewards = decode_agent_rewards(&infos, 3, 2).unwrap();
        assert_eq!(rewards.len(), 3);
        assert_eq!(rewards[0].to_vec(), vec![1.0, -1.0]);
        assert_eq!(rewards[1].to_vec(), vec![2.0, 0.0]);
        assert_eq!(rewards[2].to_vec(), vec![3.0, 0.5]);
    }

    #[test]
    fn test_indexed_rewards() {
        let infos = vec![json!({"rewards": [0.1, 0.2]})];
        let rewards = decode_agent_rewards(&infos, 2, 1).unwrap();
        assert_eq!(rewards[1].to_vec(), vec![0.2]);
    }

    #[test]
    fn test_fallback_reasons() {
        assert_eq!(decode_agent_rewards(&[], 3, 4), Err(RewardFallback::Missing));

        let infos = vec![json!({"rewards": [1.0, 1.0, 1.0]})];
        assert_eq!(
            decode_agent_rewards(&infos, 3, 2),
            Err(RewardFallback::Length {
                expected: 2,
                actual: 1
            })
        );

        let infos = vec![json!({"rewards": {"0": 1.0, "1": 1.0}})];
        assert_eq!(
            decode_agent_rewards(&infos, 3, 1),
            Err(RewardFallback::MissingAgent { step: 0, agent: 2 })
        );

        let infos = vec![json!({"episode_return": 3.0})];
        assert!(matches!(
            decode_agent_rewards(&infos, 3, 1),
            Err(RewardFallback::Malformed { step: 0, .. })
        ));

        let infos = vec![json!(0.0)];
        assert!(matches!(
            decode_agent_rewards(&infos, 3, 1),
            Err(RewardFallback::Malformed { .. })
        ));
    }
}
