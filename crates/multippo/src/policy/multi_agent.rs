//! PPO policy shared by several co-located agents.

use super::{DistributionFamily, Model, ModelInput};
use crate::batch::{TrainingBatch, TrajectorySegment};
use crate::config::PpoConfig;
use crate::kl::KlController;
use crate::log::{StatsReporter, StepStats};
use crate::loss::{ppo_surrogate_loss, LossCoefficients, LossOutput, LossStats};
use crate::postprocessing::Postprocessor;
use crate::schedule::Schedule;
use crate::{MultiPpoError, Result};
#[cfg(feature = "torch")]
use super::torch::{TensorInput, TorchModel};
#[cfg(feature = "torch")]
use super::ActionDistKind;
#[cfg(feature = "torch")]
use crate::loss::torch::TensorLossOutput;
#[cfg(feature = "torch")]
use tch::nn;

/// Outcome of one training step
#[derive(Clone, Debug)]
pub struct TrainStep {
    pub loss: LossOutput,
    pub stats: StepStats,
    /// KL coefficient to be used by the next step
    pub kl_coeff: f64,
}

impl TrainStep {
    /// Hand the step's statistics to `reporter`
    pub fn report(&self, reporter: &dyn StatsReporter, step: u64) {
        reporter.report(step, &self.stats);
    }
}

/// Outcome of one optimizer step on the differentiable loss
#[cfg(feature = "torch")]
pub struct TensorTrainStep {
    pub loss: TensorLossOutput,
    pub stats: StepStats,
    /// KL coefficient to be used by the next step
    pub kl_coeff: f64,
}

#[cfg(feature = "torch")]
impl TensorTrainStep {
    /// Hand the step's statistics to `reporter`
    pub fn report(&self, reporter: &dyn StatsReporter, step: u64) {
        reporter.report(step, &self.stats);
    }
}

/// Multi-agent PPO policy.
///
/// Owns the model, the distribution family, the adaptive KL coefficient and
/// the coefficient schedules. The optimizer is external: `learn_on_batch`
/// returns the loss and the current learning rate is exposed through
/// [`MultiAgentPpoPolicy::cur_lr`].
pub struct MultiAgentPpoPolicy<M, F> {
    config: PpoConfig,
    model: M,
    family: F,
    postprocessor: Postprocessor,
    kl: KlController,
    entropy_schedule: Schedule,
    lr_schedule: Schedule,
    entropy_coeff: f64,
    cur_lr: f64,
    global_timestep: u64,
}

impl<M: Model, F: DistributionFamily> MultiAgentPpoPolicy<M, F> {
    pub fn new(config: PpoConfig, model: M, family: F) -> Result<Self> {
        config.validate()?;
        if family.num_sub_actions() != config.num_agents {
            return Err(MultiPpoError::agents(
                "distribution sub-actions",
                config.num_agents,
                family.num_sub_actions(),
            ));
        }

        let entropy_schedule = Schedule::from_config(
            config.entropy_coeff,
            config.entropy_coeff_schedule.as_deref(),
        );
        let lr_schedule = Schedule::from_config(config.lr, config.lr_schedule.as_deref());

        tracing::info!(
            num_agents = config.num_agents,
            gamma = config.gamma,
            lambda = config.lambda,
            use_gae = config.use_gae,
            kl_coeff = config.kl_coeff,
            kl_target = config.kl_target,
            "Created multi-agent PPO policy"
        );

        Ok(Self {
            postprocessor: Postprocessor::new(&config),
            kl: KlController::new(config.kl_coeff, config.kl_target),
            entropy_coeff: entropy_schedule.value(0),
            cur_lr: lr_schedule.value(0),
            entropy_schedule,
            lr_schedule,
            global_timestep: 0,
            config,
            model,
            family,
        })
    }

    /// Per-agent advantage estimation for one rollout segment
    pub fn postprocess_trajectory(&self, segment: &TrajectorySegment) -> Result<TrainingBatch> {
        self.postprocessor.process(&self.model, segment)
    }

    /// Run the model over `batch` and evaluate the surrogate loss
    pub fn loss(&self, batch: &TrainingBatch) -> Result<LossOutput> {
        let output = self.model.forward(&ModelInput::from_batch(batch))?;
        ppo_surrogate_loss(
            &self.config,
            &self.family,
            batch,
            &output,
            self.coefficients(),
            self.model.is_time_major(),
        )
    }

    /// Coefficients the next loss evaluation will use
    pub fn coefficients(&self) -> LossCoefficients {
        LossCoefficients {
            kl_coeff: self.kl.coeff(),
            entropy_coeff: self.entropy_coeff,
        }
    }

    /// Statistics of a loss evaluation, tagged with the current coefficients
    pub fn stats(&self, loss: &LossStats) -> StepStats {
        StepStats {
            cur_kl_coeff: self.kl.coeff(),
            cur_lr: self.cur_lr,
            entropy_coeff: self.entropy_coeff,
            reward_fallbacks: self.postprocessor.reward_fallbacks(),
            loss: loss.clone(),
        }
    }

    /// Adapt the KL coefficient to the KL measured on the last batch
    pub fn update_kl(&mut self, sampled_kl: f64) -> f64 {
        self.kl.update(sampled_kl)
    }

    /// Advance the coefficient schedules to `timestep`
    pub fn on_global_var_update(&mut self, timestep: u64) {
        self.global_timestep = timestep;
        self.entropy_coeff = self.entropy_schedule.value(timestep);
        self.cur_lr = self.lr_schedule.value(timestep);
        tracing::debug!(
            timestep,
            entropy_coeff = self.entropy_coeff,
            lr = self.cur_lr,
            "Updated schedules"
        );
    }

    /// Evaluate the loss, collect its statistics, then adapt the KL coefficient.
    ///
    /// The statistics report the coefficient the loss was computed with.
    pub fn learn_on_batch(&mut self, batch: &TrainingBatch) -> Result<TrainStep> {
        let loss = self.loss(batch)?;
        let stats = self.stats(&loss.stats);
        let kl_coeff = self.update_kl(loss.stats.kl);
        tracing::debug!(
            total_loss = loss.total_loss,
            kl = loss.stats.kl,
            kl_coeff,
            rows = batch.len(),
            "Learned on batch"
        );
        Ok(TrainStep {
            loss,
            stats,
            kl_coeff,
        })
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn kl_coeff(&self) -> f64 {
        self.kl.coeff()
    }

    pub fn entropy_coeff(&self) -> f64 {
        self.entropy_coeff
    }

    pub fn cur_lr(&self) -> f64 {
        self.cur_lr
    }

    pub fn global_timestep(&self) -> u64 {
        self.global_timestep
    }

    pub fn reward_fallbacks(&self) -> u64 {
        self.postprocessor.reward_fallbacks()
    }
}

#[cfg(feature = "torch")]
impl<M: Model + TorchModel> MultiAgentPpoPolicy<M, ActionDistKind> {
    /// Differentiable loss over the model's tensor forward pass
    pub fn tensor_loss(&self, batch: &TrainingBatch) -> Result<TensorLossOutput> {
        let input = TensorInput::from_batch(batch, self.model.device());
        let output = self.model.forward_t(&input)?;
        crate::loss::torch::ppo_surrogate_loss(
            &self.config,
            &self.family,
            batch,
            &output,
            self.coefficients(),
            self.model.is_time_major(),
        )
    }

    /// One optimizer step on the tensor loss at the scheduled learning rate,
    /// followed by KL adaptation.
    pub fn learn_on_batch_tensor(
        &mut self,
        batch: &TrainingBatch,
        optimizer: &mut nn::Optimizer,
    ) -> Result<TensorTrainStep> {
        let loss = self.tensor_loss(batch)?;
        let stats = self.stats(&loss.stats);

        optimizer.set_lr(self.cur_lr);
        optimizer.zero_grad();
        loss.total_loss.backward();
        optimizer.step();

        let kl_coeff = self.update_kl(loss.stats.kl);
        tracing::debug!(
            total_loss = loss.stats.total_loss,
            kl = loss.stats.kl,
            kl_coeff,
            lr = self.cur_lr,
            rows = batch.len(),
            "Optimized tensor loss"
        );
        Ok(TensorTrainStep {
            loss,
            stats,
            kl_coeff,
        })
    }
}
