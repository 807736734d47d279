//! Policy configuration.

use crate::{MultiPpoError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the multi-agent PPO policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Number of co-located agents sharing the policy
    pub num_agents: usize,

    // Advantage estimation
    /// Discount factor
    pub gamma: f64,
    /// GAE lambda (trace decay)
    pub lambda: f64,
    /// Use generalized advantage estimation instead of discounted returns
    pub use_gae: bool,
    /// Use the value function as a baseline
    pub use_critic: bool,

    // Surrogate loss
    /// PPO clipping parameter (epsilon)
    pub clip_param: f64,
    /// Value function clipping parameter
    pub vf_clip_param: f64,
    /// Value function loss coefficient
    pub vf_loss_coeff: f64,
    /// Entropy coefficient
    pub entropy_coeff: f64,
    /// Piecewise-linear entropy coefficient schedule as `(timestep, value)` pairs
    pub entropy_coeff_schedule: Option<Vec<(u64, f64)>>,

    // KL penalty
    /// Initial KL penalty coefficient
    pub kl_coeff: f64,
    /// Target KL divergence
    pub kl_target: f64,

    // Optimization
    /// Learning rate
    pub lr: f64,
    /// Piecewise-linear learning-rate schedule as `(timestep, value)` pairs
    pub lr_schedule: Option<Vec<(u64, f64)>>,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            num_agents: 3,

            gamma: 0.99,
            lambda: 1.0,
            use_gae: true,
            use_critic: true,

            clip_param: 0.3,
            vf_clip_param: 10.0,
            vf_loss_coeff: 1.0,
            entropy_coeff: 0.0,
            entropy_coeff_schedule: None,

            kl_coeff: 0.2,
            kl_target: 0.01,

            lr: 5e-5,
            lr_schedule: None,
        }
    }
}

impl PpoConfig {
    /// Parse a configuration from JSON. Missing keys take their default value.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded policy config");
        Ok(config)
    }

    /// Set the number of co-located agents
    pub fn with_num_agents(mut self, num_agents: usize) -> Self {
        self.num_agents = num_agents;
        self
    }

    /// Set discount factor and GAE lambda
    pub fn with_discount(mut self, gamma: f64, lambda: f64) -> Self {
        self.gamma = gamma;
        self.lambda = lambda;
        self
    }

    /// Toggle GAE
    pub fn with_gae(mut self, use_gae: bool) -> Self {
        self.use_gae = use_gae;
        self
    }

    /// Toggle the value-function baseline
    pub fn with_critic(mut self, use_critic: bool) -> Self {
        self.use_critic = use_critic;
        self
    }

    /// Set initial KL coefficient and KL target
    pub fn with_kl(mut self, kl_coeff: f64, kl_target: f64) -> Self {
        self.kl_coeff = kl_coeff;
        self.kl_target = kl_target;
        self
    }

    /// Set entropy coefficient
    pub fn with_entropy_coeff(mut self, entropy_coeff: f64) -> Self {
        self.entropy_coeff = entropy_coeff;
        self
    }

    /// Set learning rate
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.num_agents == 0 {
            return Err(invalid("num_agents must be at least 1"));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(invalid(format!("gamma must be in (0, 1], got {}", self.gamma)));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(invalid(format!("lambda must be in [0, 1], got {}", self.lambda)));
        }
        if self.clip_param < 0.0 || self.vf_clip_param < 0.0 {
            return Err(invalid("clip parameters must be non-negative"));
        }
        if self.kl_coeff < 0.0 || self.kl_target < 0.0 {
            return Err(invalid("kl_coeff and kl_target must be non-negative"));
        }
        for (name, schedule) in [
            ("entropy_coeff_schedule", &self.entropy_coeff_schedule),
            ("lr_schedule", &self.lr_schedule),
        ] {
            if let Some(points) = schedule {
                if points.is_empty() {
                    return Err(invalid(format!("{name} must not be empty")));
                }
                if points.windows(2).any(|w| w[0].0 >= w[1].0) {
                    return Err(invalid(format!(
                        "{name} timesteps must be strictly increasing"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> MultiPpoError {
    MultiPpoError::InvalidConfig(msg.into())
}
