//! # multippo
//!
//! PPO training-step core for a policy shared by several co-located agents.
//!
//! ## Overview
//!
//! multippo provides:
//! - Trajectory postprocessing with per-agent GAE (`postprocessing`)
//! - The clipped surrogate loss aggregated across agents (`loss`)
//! - An adaptive KL-penalty coefficient (`kl`)
//! - A policy instance tying the three together (`policy`)
//!
//! The model, the sampler and the optimizer are external collaborators and are
//! only consumed through the [`policy::Model`] and
//! [`policy::DistributionFamily`] traits.
//!
//! ## Features
//!
//! - `default` - ndarray implementation of every component
//! - `torch` - `tch` networks trained end to end through
//!   `MultiAgentPpoPolicy::learn_on_batch_tensor` (requires libtorch)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use multippo::prelude::*;
//!
//! let config = PpoConfig::default();
//! let family = ActionDistKind::multi_categorical(vec![5; config.num_agents]);
//! let mut policy = MultiAgentPpoPolicy::new(config, model, family)?;
//!
//! let batch = policy.postprocess_trajectory(&segment)?;
//! let step = policy.learn_on_batch(&batch)?;
//! tracing::info!(loss = step.loss.total_loss, kl_coeff = step.kl_coeff, "Trained");
//! ```

pub mod batch;
pub mod config;
pub mod kl;
pub mod log;
pub mod loss;
pub mod policy;
pub mod postprocessing;
pub mod schedule;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::batch::{StepInfo, TrainingBatch, TrajectorySegment};
    pub use crate::config::PpoConfig;
    pub use crate::kl::KlController;
    pub use crate::log::{ConsoleReporter, JsonLinesReporter, StatsReporter, StepStats};
    pub use crate::loss::{
        ppo_surrogate_loss, AgentLoss, LossCoefficients, LossOutput, LossStats,
    };
    pub use crate::policy::{
        ActionDistKind, ActionDistribution, Distribution, DistributionFamily, InputIndex, Model,
        ModelInput, ModelOutput, MultiAgentPpoPolicy, TrainStep,
    };
    #[cfg(feature = "torch")]
    pub use crate::policy::{
        torch::{forward_ndarray, TensorDistribution, TensorInput, TensorOutput, TorchModel},
        TensorTrainStep,
    };
    pub use crate::postprocessing::{compute_advantages, Postprocessor};
    pub use crate::schedule::Schedule;
    pub use crate::{MultiPpoError, Result};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum MultiPpoError {
    #[error("Shape mismatch in {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Agent count mismatch in {what}: expected {expected} agents, got {actual}")]
    AgentCountMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Degenerate batch: {0}")]
    DegenerateBatch(String),

    #[error("Trajectory segment is empty")]
    EmptySegment,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "torch")]
    #[error("Tensor error: {0}")]
    Tensor(#[from] tch::TchError),
}

impl MultiPpoError {
    pub(crate) fn shape(what: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub(crate) fn agents(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::AgentCountMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

pub type Result<T> = core::result::Result<T, MultiPpoError>;
