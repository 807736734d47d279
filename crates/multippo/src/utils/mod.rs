//! Utility functions.

use ndarray::{ArrayBase, Data, Dimension};

/// Population mean and variance in f64
pub fn mean_var<S, D>(x: &ArrayBase<S, D>) -> (f64, f64)
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let n = x.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = x.iter().map(|&v| f64::from(v)).sum::<f64>() / n as f64;
    let var = x
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    (mean, var)
}

/// Fraction of the variance of `y` explained by `pred`, floored at -1.
///
/// Computed over every element of both arrays. When `y` is constant the
/// result is 1 for a perfect prediction and -1 otherwise.
pub fn explained_variance<S1, S2, D>(y: &ArrayBase<S1, D>, pred: &ArrayBase<S2, D>) -> f64
where
    S1: Data<Elem = f32>,
    S2: Data<Elem = f32>,
    D: Dimension,
{
    debug_assert_eq!(y.shape(), pred.shape());
    let (_, var_y) = mean_var(y);
    let residual = y - pred;
    let (_, var_residual) = mean_var(&residual);

    if var_y == 0.0 {
        return if var_residual == 0.0 { 1.0 } else { -1.0 };
    }
    (1.0 - var_residual / var_y).max(-1.0)
}
