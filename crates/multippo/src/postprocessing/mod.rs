//! Trajectory postprocessing.
//!
//! Provides:
//! - `compute_advantages` - GAE or discounted returns for one reward stream
//! - `Postprocessor` - per-agent advantage estimation over a whole segment

mod advantages;
mod postprocessor;

pub use advantages::{compute_advantages, discount_cumsum, Advantages};
pub use postprocessor::Postprocessor;
