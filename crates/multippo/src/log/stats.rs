//! Typed statistics of one training step.

use crate::loss::LossStats;
use serde::Serialize;
use std::collections::HashMap;

/// Loss diagnostics together with the coefficients the loss was computed with
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepStats {
    /// KL coefficient used by this step, before adaptation
    pub cur_kl_coeff: f64,
    pub cur_lr: f64,
    pub entropy_coeff: f64,
    /// Segments that fell back to the shared reward so far
    pub reward_fallbacks: u64,
    #[serde(flatten)]
    pub loss: LossStats,
}

impl StepStats {
    /// Flat name to value view, keyed like the serialized record
    pub fn to_map(&self) -> HashMap<String, f64> {
        let l = &self.loss;
        [
            ("cur_kl_coeff", self.cur_kl_coeff),
            ("cur_lr", self.cur_lr),
            ("entropy_coeff", self.entropy_coeff),
            ("reward_fallbacks", self.reward_fallbacks as f64),
            ("total_loss", l.total_loss),
            ("policy_loss", l.policy_loss),
            ("vf_loss", l.vf_loss),
            ("vf_explained_var", l.vf_explained_var),
            ("kl", l.kl),
            ("entropy", l.entropy),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_matches_serialized_keys() {
        let stats = StepStats {
            cur_kl_coeff: 0.2,
            reward_fallbacks: 3,
            loss: LossStats {
                kl: 0.05,
                ..LossStats::default()
            },
            ..StepStats::default()
        };
        let map = stats.to_map();
        let json = serde_json::to_value(&stats).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(map.len(), object.len());
        for (key, value) in &map {
            assert_eq!(object[key].as_f64(), Some(*value), "{key}");
        }
        assert_eq!(map["reward_fallbacks"], 3.0);
        assert_eq!(map["kl"], 0.05);
    }
}
