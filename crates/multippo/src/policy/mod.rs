//! Policy-side contracts and the multi-agent PPO policy instance.
//!
//! Provides:
//! - `Model` - External network contract (logits, values, recurrent state)
//! - `ActionDistKind` - Built-in multi-categorical and diagonal Gaussian families
//! - `MultiAgentPpoPolicy` - Postprocessing, loss and KL adaptation bound together
//! - `torch::TorchModel` - Tensor network contract for the differentiable loss (`torch` feature)

mod distribution;
mod multi_agent;
#[cfg(feature = "torch")]
pub mod torch;

pub use distribution::{ActionDistKind, ActionDistribution, Distribution, DistributionFamily};
pub use multi_agent::{MultiAgentPpoPolicy, TrainStep};
#[cfg(feature = "torch")]
pub use multi_agent::TensorTrainStep;

use crate::batch::{TrainingBatch, TrajectorySegment};
use crate::{MultiPpoError, Result};
use ndarray::{s, Array2, ArrayView2};

/// Which row of a segment to build a model input from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputIndex {
    /// State after the final step: `next_obs` with `state_out` when the
    /// segment carries them, else the final `obs` with its `state_in`
    Last,
    /// A specific step
    At(usize),
}

/// Inputs to a single forward pass
#[derive(Clone, Debug)]
pub struct ModelInput<'a> {
    /// Observations [N, obs_dim]
    pub obs: ArrayView2<'a, f32>,
    /// Recurrent state inputs, each [N, state_dim]
    pub state_in: Vec<ArrayView2<'a, f32>>,
    /// Sequence lengths for recurrent models
    pub seq_lens: Option<&'a [usize]>,
    /// Whether the pass is part of a training step
    pub is_training: bool,
}

impl<'a> ModelInput<'a> {
    /// Full training input for a postprocessed batch
    pub fn from_batch(batch: &'a TrainingBatch) -> Self {
        Self {
            obs: batch.obs.view(),
            state_in: batch.state_in.iter().map(|s| s.view()).collect(),
            seq_lens: batch.seq_lens.as_deref(),
            is_training: true,
        }
    }
}

/// Outputs of a forward pass
#[derive(Clone, Debug)]
pub struct ModelOutput {
    /// Distribution parameters [N, P]
    pub dist_inputs: Array2<f32>,
    /// Recurrent state outputs
    pub state_out: Vec<Array2<f32>>,
    /// One value estimate per agent [N, A]
    pub values: Array2<f32>,
}

/// A network producing distribution inputs and per-agent value estimates
pub trait Model {
    /// Forward pass
    fn forward(&self, input: &ModelInput<'_>) -> Result<ModelOutput>;

    /// Whether recurrent inputs are laid out time-major
    fn is_time_major(&self) -> bool {
        false
    }

    /// Build a single-row input from one step of a segment
    fn input_dict<'a>(
        &self,
        segment: &'a TrajectorySegment,
        index: InputIndex,
    ) -> Result<ModelInput<'a>> {
        if segment.is_empty() {
            return Err(MultiPpoError::EmptySegment);
        }
        let last = segment.len() - 1;
        let (obs, states, row) = match index {
            InputIndex::Last => match &segment.next_obs {
                Some(next_obs)
                    if segment.state_in.is_empty()
                        || segment.state_out.len() == segment.state_in.len() =>
                {
                    (next_obs, &segment.state_out, last)
                }
                _ => (&segment.obs, &segment.state_in, last),
            },
            InputIndex::At(t) if t <= last => (&segment.obs, &segment.state_in, t),
            InputIndex::At(t) => {
                return Err(MultiPpoError::shape("input index", &[last], &[t]));
            }
        };
        Ok(ModelInput {
            obs: obs.slice(s![row..row + 1, ..]),
            state_in: states
                .iter()
                .map(|state| state.slice(s![row..row + 1, ..]))
                .collect(),
            seq_lens: None,
            is_training: false,
        })
    }
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn forward(&self, input: &ModelInput<'_>) -> Result<ModelOutput> {
        (**self).forward(input)
    }

    fn is_time_major(&self) -> bool {
        (**self).is_time_major()
    }

    fn input_dict<'a>(
        &self,
        segment: &'a TrajectorySegment,
        index: InputIndex,
    ) -> Result<ModelInput<'a>> {
        (**self).input_dict(segment, index)
    }
}
