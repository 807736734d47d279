//! Action distributions over one sub-action per agent.
//!
//! Every quantity is returned per sub-action, shaped `[N, A]`, so the loss
//! can pick agent `i`'s column.

use crate::{MultiPpoError, Result};
use ndarray::{s, Array2, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

const HALF_LOG_2PI: f32 = 0.918_938_5;

/// Operations the loss needs from a distribution
pub trait ActionDistribution {
    /// Number of sub-actions (agents)
    fn num_sub_actions(&self) -> usize;

    /// Log-probability of each sub-action [N, A]
    fn logp(&self, actions: ArrayView2<'_, f32>) -> Result<Array2<f32>>;

    /// Entropy of each sub-distribution [N, A]
    fn entropy(&self) -> Array2<f32>;

    /// KL(self || other) per sub-distribution [N, A]
    fn kl(&self, other: &Self) -> Result<Array2<f32>>;
}

/// Builds distributions from model outputs
pub trait DistributionFamily {
    type Dist: ActionDistribution;

    /// Build a distribution from parameters [N, P]
    fn construct(&self, params: ArrayView2<'_, f32>) -> Result<Self::Dist>;

    /// Number of sub-actions the family produces
    fn num_sub_actions(&self) -> usize;

    /// Width P of the parameter input
    fn input_dim(&self) -> usize;
}

/// Distribution families shipped with the crate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionDistKind {
    /// Independent categoricals, one per agent, over `input_lens[i]` choices
    MultiCategorical { input_lens: Vec<usize> },
    /// Independent Gaussians, one per agent; parameters are `[mean.., log_std..]`
    DiagGaussian { dims: usize },
}

impl ActionDistKind {
    pub fn multi_categorical(input_lens: Vec<usize>) -> Self {
        Self::MultiCategorical { input_lens }
    }

    pub fn diag_gaussian(dims: usize) -> Self {
        Self::DiagGaussian { dims }
    }
}

/// Concrete distribution built by [`ActionDistKind`]
#[derive(Clone, Debug)]
pub enum Distribution {
    /// Log-softmax of each agent's logits, each [N, input_lens[i]]
    MultiCategorical { log_probs: Vec<Array2<f32>> },
    /// Mean and log standard deviation, each [N, A]
    DiagGaussian {
        mean: Array2<f32>,
        log_std: Array2<f32>,
    },
}

impl DistributionFamily for ActionDistKind {
    type Dist = Distribution;

    fn construct(&self, params: ArrayView2<'_, f32>) -> Result<Distribution> {
        if params.ncols() != self.input_dim() {
            return Err(MultiPpoError::shape(
                "distribution inputs",
                &[params.nrows(), self.input_dim()],
                params.shape(),
            ));
        }
        match self {
            ActionDistKind::MultiCategorical { input_lens } => {
                let mut offset = 0;
                let log_probs = input_lens
                    .iter()
                    .map(|&len| {
                        let logits = params.slice(s![.., offset..offset + len]);
                        offset += len;
                        log_softmax(logits)
                    })
                    .collect();
                Ok(Distribution::MultiCategorical { log_probs })
            }
            ActionDistKind::DiagGaussian { dims } => Ok(Distribution::DiagGaussian {
                mean: params.slice(s![.., ..*dims]).to_owned(),
                log_std: params.slice(s![.., *dims..]).to_owned(),
            }),
        }
    }

    fn num_sub_actions(&self) -> usize {
        match self {
            ActionDistKind::MultiCategorical { input_lens } => input_lens.len(),
            ActionDistKind::DiagGaussian { dims } => *dims,
        }
    }

    fn input_dim(&self) -> usize {
        match self {
            ActionDistKind::MultiCategorical { input_lens } => input_lens.iter().sum(),
            ActionDistKind::DiagGaussian { dims } => 2 * dims,
        }
    }
}

fn log_softmax(logits: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        let log_sum = row.fold(0.0f32, |acc, &x| acc + (x - max).exp()).ln() + max;
        row.mapv_inplace(|x| x - log_sum);
    }
    out
}

/// `p * log p` from `log p`, zero for impossible choices
fn plogp(log_p: f32) -> f32 {
    if log_p == f32::NEG_INFINITY {
        0.0
    } else {
        log_p.exp() * log_p
    }
}

/// `p * (log p - log q)`, zero where `p` is zero
fn kl_term(log_p: f32, log_q: f32) -> f32 {
    if log_p == f32::NEG_INFINITY {
        0.0
    } else {
        log_p.exp() * (log_p - log_q)
    }
}

impl Distribution {
    fn rows(&self) -> usize {
        match self {
            Distribution::MultiCategorical { log_probs } => {
                log_probs.first().map(|lp| lp.nrows()).unwrap_or(0)
            }
            Distribution::DiagGaussian { mean, .. } => mean.nrows(),
        }
    }
}

impl ActionDistribution for Distribution {
    fn num_sub_actions(&self) -> usize {
        match self {
            Distribution::MultiCategorical { log_probs } => log_probs.len(),
            Distribution::DiagGaussian { mean, .. } => mean.ncols(),
        }
    }

    fn logp(&self, actions: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let expected = [self.rows(), self.num_sub_actions()];
        if actions.shape() != expected {
            return Err(MultiPpoError::shape("actions", &expected, actions.shape()));
        }
        match self {
            Distribution::MultiCategorical { log_probs } => {
                let mut out = Array2::zeros(actions.raw_dim());
                for (i, lp) in log_probs.iter().enumerate() {
                    for (n, &a) in actions.column(i).iter().enumerate() {
                        if a < 0.0 || a.fract() != 0.0 || a as usize >= lp.ncols() {
                            return Err(MultiPpoError::InvalidAction(format!(
                                "agent {i} step {n}: {a} is not one of {} choices",
                                lp.ncols()
                            )));
                        }
                        out[[n, i]] = lp[[n, a as usize]];
                    }
                }
                Ok(out)
            }
            Distribution::DiagGaussian { mean, log_std } => {
                let mut out = Array2::zeros(actions.raw_dim());
                Zip::from(&mut out)
                    .and(&actions)
                    .and(mean)
                    .and(log_std)
                    .for_each(|o, &a, &m, &ls| {
                        let z = (a - m) / ls.exp();
                        *o = -0.5 * z * z - ls - HALF_LOG_2PI;
                    });
                Ok(out)
            }
        }
    }

    fn entropy(&self) -> Array2<f32> {
        match self {
            Distribution::MultiCategorical { log_probs } => {
                let mut out = Array2::zeros((self.rows(), log_probs.len()));
                for (i, lp) in log_probs.iter().enumerate() {
                    for (n, row) in lp.axis_iter(Axis(0)).enumerate() {
                        out[[n, i]] = -row.fold(0.0f32, |acc, &l| acc + plogp(l));
                    }
                }
                out
            }
            Distribution::DiagGaussian { log_std, .. } => {
                log_std.mapv(|ls| ls + 0.5 + HALF_LOG_2PI)
            }
        }
    }

    fn kl(&self, other: &Self) -> Result<Array2<f32>> {
        if self.rows() != other.rows() || self.num_sub_actions() != other.num_sub_actions() {
            return Err(MultiPpoError::shape(
                "kl operands",
                &[self.rows(), self.num_sub_actions()],
                &[other.rows(), other.num_sub_actions()],
            ));
        }
        match (self, other) {
            (
                Distribution::MultiCategorical { log_probs: p },
                Distribution::MultiCategorical { log_probs: q },
            ) => {
                let mut out = Array2::zeros((self.rows(), p.len()));
                for (i, (lp, lq)) in p.iter().zip(q).enumerate() {
                    if lp.ncols() != lq.ncols() {
                        return Err(MultiPpoError::shape(
                            format!("kl operand {i}"),
                            &[lp.ncols()],
                            &[lq.ncols()],
                        ));
                    }
                    for (n, (rp, rq)) in lp.axis_iter(Axis(0)).zip(lq.axis_iter(Axis(0))).enumerate()
                    {
                        out[[n, i]] = rp
                            .iter()
                            .zip(rq.iter())
                            .map(|(&a, &b)| kl_term(a, b))
                            .sum();
                    }
                }
                Ok(out)
            }
            (
                Distribution::DiagGaussian {
                    mean: m1,
                    log_std: ls1,
                },
                Distribution::DiagGaussian {
                    mean: m2,
                    log_std: ls2,
                },
            ) => {
                let mut out = Array2::zeros(m1.raw_dim());
                Zip::from(&mut out)
                    .and(m1)
                    .and(ls1)
                    .and(m2)
                    .and(ls2)
                    .for_each(|o, &m1, &ls1, &m2, &ls2| {
                        let var1 = (2.0 * ls1).exp();
                        let var2 = (2.0 * ls2).exp();
                        *o = ls2 - ls1 + (var1 + (m1 - m2).powi(2)) / (2.0 * var2) - 0.5;
                    });
                Ok(out)
            }
            _ => Err(MultiPpoError::InvalidConfig(
                "KL between different distribution families".into(),
            )),
        }
    }
}
