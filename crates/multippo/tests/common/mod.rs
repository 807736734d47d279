#![allow(dead_code)]

use multippo::prelude::*;
use ndarray::{Array1, Array2};
use std::cell::Cell;

/// Model returning fixed logits and a fixed value for every agent
pub struct FixedModel {
    pub agents: usize,
    pub choices: usize,
    pub logit: f32,
    pub value: f32,
    pub calls: Cell<usize>,
}

impl FixedModel {
    pub fn new(agents: usize, choices: usize, value: f32) -> Self {
        Self {
            agents,
            choices,
            logit: 0.0,
            value,
            calls: Cell::new(0),
        }
    }
}

impl Model for FixedModel {
    fn forward(&self, input: &ModelInput<'_>) -> Result<ModelOutput> {
        self.calls.set(self.calls.get() + 1);
        let n = input.obs.nrows();
        Ok(ModelOutput {
            dist_inputs: Array2::from_shape_fn((n, self.agents * self.choices), |(_, j)| {
                if j % self.choices == 0 {
                    self.logit
                } else {
                    0.0
                }
            }),
            state_out: Vec::new(),
            values: Array2::from_elem((n, self.agents), self.value),
        })
    }
}

/// Segment with identical per-agent columns
pub fn uniform_segment(
    agents: usize,
    rewards: &[f32],
    dones: &[bool],
    vf_pred: f32,
) -> TrajectorySegment {
    let t = rewards.len();
    TrajectorySegment::new(
        Array2::zeros((t, 4)),
        Array2::zeros((t, agents)),
        Array2::zeros((t, agents * 2)),
        Array2::from_elem((t, agents), 0.5f32.ln()),
        Array2::from_elem((t, agents), vf_pred),
        Array1::from_vec(rewards.to_vec()),
        dones.to_vec(),
    )
}

/// Reference GAE in f64
pub fn reference_gae(rewards: &[f64], values: &[f64], last_r: f64, gamma: f64, lambda: f64) -> Vec<f64> {
    let mut adv = vec![0.0; rewards.len()];
    let mut running = 0.0;
    for t in (0..rewards.len()).rev() {
        let next = if t + 1 < rewards.len() { values[t + 1] } else { last_r };
        let delta = rewards[t] + gamma * next - values[t];
        running = delta + gamma * lambda * running;
        adv[t] = running;
    }
    adv
}
