//! `tch` rendition of the model and distribution contract.
//!
//! A [`TorchModel`] runs on tensors so the surrogate loss stays
//! differentiable with respect to its parameters. [`forward_ndarray`] lets
//! the same network serve the array-based [`Model`](super::Model) contract used for
//! bootstrapping during postprocessing.

use super::{ActionDistKind, DistributionFamily, ModelInput, ModelOutput};
use crate::batch::TrainingBatch;
use crate::{MultiPpoError, Result};
use ndarray::{Array2, ArrayView2};
use tch::{Device, Kind, Tensor};

const HALF_LOG_2PI: f64 = 0.918_938_533_204_672_7;

/// Inputs to a tensor forward pass
pub struct TensorInput<'a> {
    /// Observations [N, obs_dim]
    pub obs: Tensor,
    /// Recurrent state inputs, each [N, state_dim]
    pub state_in: Vec<Tensor>,
    pub seq_lens: Option<&'a [usize]>,
    pub is_training: bool,
}

impl<'a> TensorInput<'a> {
    /// Full training input for a postprocessed batch
    pub fn from_batch(batch: &'a TrainingBatch, device: Device) -> Self {
        Self {
            obs: to_tensor(batch.obs.view(), device),
            state_in: batch
                .state_in
                .iter()
                .map(|s| to_tensor(s.view(), device))
                .collect(),
            seq_lens: batch.seq_lens.as_deref(),
            is_training: true,
        }
    }

    fn from_model_input(input: &ModelInput<'a>, device: Device) -> Self {
        Self {
            obs: to_tensor(input.obs, device),
            state_in: input
                .state_in
                .iter()
                .map(|s| to_tensor(*s, device))
                .collect(),
            seq_lens: input.seq_lens,
            is_training: input.is_training,
        }
    }
}

/// Outputs of a tensor forward pass
pub struct TensorOutput {
    /// Distribution parameters [N, P]
    pub dist_inputs: Tensor,
    pub state_out: Vec<Tensor>,
    /// One value estimate per agent [N, A]
    pub values: Tensor,
}

/// A network over `tch` tensors
pub trait TorchModel {
    fn forward_t(&self, input: &TensorInput<'_>) -> Result<TensorOutput>;

    /// Device the parameters live on
    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// Run a [`TorchModel`] without gradient tracking and return arrays.
///
/// Meant as the body of [`Model::forward`](super::Model::forward) for tensor networks.
pub fn forward_ndarray<M: TorchModel + ?Sized>(
    model: &M,
    input: &ModelInput<'_>,
) -> Result<ModelOutput> {
    let input = TensorInput::from_model_input(input, model.device());
    let output = tch::no_grad(|| model.forward_t(&input))?;
    Ok(ModelOutput {
        dist_inputs: to_array2(&output.dist_inputs)?,
        state_out: output
            .state_out
            .iter()
            .map(to_array2)
            .collect::<Result<Vec<_>>>()?,
        values: to_array2(&output.values)?,
    })
}

/// Copy a row-major array into a float tensor on `device`
pub fn to_tensor(array: ArrayView2<'_, f32>, device: Device) -> Tensor {
    let (rows, cols) = array.dim();
    let data: Vec<f32> = array.iter().copied().collect();
    Tensor::from_slice(&data)
        .reshape([rows as i64, cols as i64])
        .to_device(device)
}

/// Detach a 2-D tensor into an array
pub fn to_array2(tensor: &Tensor) -> Result<Array2<f32>> {
    let size = tensor.size();
    let dims: Vec<usize> = size.iter().map(|&d| d as usize).collect();
    if dims.len() != 2 {
        return Err(MultiPpoError::shape("tensor rank", &[2], &[dims.len()]));
    }
    let flat = tensor
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .reshape([-1]);
    let data = Vec::<f32>::try_from(&flat)?;
    Array2::from_shape_vec((dims[0], dims[1]), data)
        .map_err(|_| MultiPpoError::shape("tensor data", &dims, &[0]))
}

/// Distribution over one sub-action per agent, every quantity [N, A]
pub enum TensorDistribution {
    /// Log-softmax of each agent's logits, each [N, input_lens[i]]
    MultiCategorical { log_probs: Vec<Tensor> },
    DiagGaussian { mean: Tensor, log_std: Tensor },
}

impl ActionDistKind {
    /// Build a tensor distribution from parameters [N, P]
    pub fn construct_tensor(&self, params: &Tensor) -> Result<TensorDistribution> {
        let size = params.size();
        if size.len() != 2 || size[1] != self.input_dim() as i64 {
            let actual: Vec<usize> = size.iter().map(|&d| d as usize).collect();
            return Err(MultiPpoError::shape(
                "distribution inputs",
                &[size.first().map_or(0, |&n| n as usize), self.input_dim()],
                &actual,
            ));
        }
        match self {
            ActionDistKind::MultiCategorical { input_lens } => {
                let mut offset = 0i64;
                let log_probs = input_lens
                    .iter()
                    .map(|&len| {
                        let logits = params.narrow(1, offset, len as i64);
                        offset += len as i64;
                        logits.log_softmax(-1, Kind::Float)
                    })
                    .collect();
                Ok(TensorDistribution::MultiCategorical { log_probs })
            }
            ActionDistKind::DiagGaussian { dims } => {
                let dims = *dims as i64;
                Ok(TensorDistribution::DiagGaussian {
                    mean: params.narrow(1, 0, dims),
                    log_std: params.narrow(1, dims, dims),
                })
            }
        }
    }
}

/// Floor `-inf` log-probabilities so masked choices weigh zero instead of NaN
fn finite(log_probs: &Tensor) -> Tensor {
    log_probs.clamp_min(f64::from(f32::MIN))
}

impl TensorDistribution {
    pub fn num_sub_actions(&self) -> usize {
        match self {
            TensorDistribution::MultiCategorical { log_probs } => log_probs.len(),
            TensorDistribution::DiagGaussian { mean, .. } => {
                mean.size().get(1).copied().unwrap_or(0) as usize
            }
        }
    }

    /// Log-probability of each sub-action in `actions` [N, A]
    pub fn logp(&self, actions: &Tensor) -> Result<Tensor> {
        let a = self.num_sub_actions() as i64;
        if actions.size().get(1).copied() != Some(a) {
            let actual: Vec<usize> = actions.size().iter().map(|&d| d as usize).collect();
            return Err(MultiPpoError::shape("actions", &[0, a as usize], &actual));
        }
        match self {
            TensorDistribution::MultiCategorical { log_probs } => {
                let columns: Vec<Tensor> = log_probs
                    .iter()
                    .enumerate()
                    .map(|(i, lp)| {
                        let index = actions.narrow(1, i as i64, 1).to_kind(Kind::Int64);
                        lp.gather(1, &index, false)
                    })
                    .collect();
                Ok(Tensor::cat(&columns, 1))
            }
            TensorDistribution::DiagGaussian { mean, log_std } => {
                let z = (actions - mean) / log_std.exp();
                Ok(z.pow_tensor_scalar(2) * -0.5 - log_std - HALF_LOG_2PI)
            }
        }
    }

    /// Entropy of each sub-distribution [N, A]
    pub fn entropy(&self) -> Tensor {
        match self {
            TensorDistribution::MultiCategorical { log_probs } => {
                let columns: Vec<Tensor> = log_probs
                    .iter()
                    .map(|lp| {
                        -(lp.exp() * finite(lp)).sum_dim_intlist(
                            Some(&[-1_i64][..]),
                            true,
                            Kind::Float,
                        )
                    })
                    .collect();
                Tensor::cat(&columns, 1)
            }
            TensorDistribution::DiagGaussian { log_std, .. } => log_std + (0.5 + HALF_LOG_2PI),
        }
    }

    /// KL(self || other) per sub-distribution [N, A]
    pub fn kl(&self, other: &Self) -> Result<Tensor> {
        match (self, other) {
            (
                TensorDistribution::MultiCategorical { log_probs: p },
                TensorDistribution::MultiCategorical { log_probs: q },
            ) => {
                if p.len() != q.len() {
                    return Err(MultiPpoError::agents("kl operands", p.len(), q.len()));
                }
                let columns: Vec<Tensor> = p
                    .iter()
                    .zip(q)
                    .map(|(lp, lq)| {
                        (lp.exp() * (finite(lp) - finite(lq))).sum_dim_intlist(
                            Some(&[-1_i64][..]),
                            true,
                            Kind::Float,
                        )
                    })
                    .collect();
                Ok(Tensor::cat(&columns, 1))
            }
            (
                TensorDistribution::DiagGaussian {
                    mean: m1,
                    log_std: ls1,
                },
                TensorDistribution::DiagGaussian {
                    mean: m2,
                    log_std: ls2,
                },
            ) => {
                let var1 = (ls1 * 2.0).exp();
                let var2 = (ls2 * 2.0).exp();
                let spread = (var1 + (m1 - m2).pow_tensor_scalar(2)) / (var2 * 2.0);
                Ok(ls2 - ls1 + spread - 0.5)
            }
            _ => Err(MultiPpoError::InvalidConfig(
                "KL between different distribution families".into(),
            )),
        }
    }
}
