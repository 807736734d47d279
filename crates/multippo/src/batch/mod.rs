//! Trajectory and training batch containers.
//!
//! Provides:
//! - `TrajectorySegment` - raw rollout data of one worker
//! - `TrainingBatch` - postprocessed data with per-agent columns on a trailing axis
//! - `decode_agent_rewards` - per-agent rewards from the step-info side-channel

mod infos;
mod segment;
mod training;

pub use infos::{decode_agent_rewards, RewardFallback, StepInfo};
pub use segment::TrajectorySegment;
pub use training::{AgentBatch, TrainingBatch};

use crate::{MultiPpoError, Result};
use ndarray::{Array2, ArrayBase, Data, Dimension};

/// Fail unless `array` has `rows` entries on its leading axis.
pub(crate) fn check_rows<S, D>(what: &str, array: &ArrayBase<S, D>, rows: usize) -> Result<()>
where
    S: Data,
    D: Dimension,
{
    let shape = array.shape();
    if shape.first().copied() != Some(rows) {
        let mut expected = shape.to_vec();
        if expected.is_empty() {
            expected.push(rows);
        } else {
            expected[0] = rows;
        }
        return Err(MultiPpoError::shape(what, &expected, shape));
    }
    Ok(())
}

/// Fail unless `array` is `[rows, agents]`.
pub(crate) fn check_agent_columns(
    what: &str,
    array: &Array2<f32>,
    rows: usize,
    agents: usize,
) -> Result<()> {
    if array.ncols() != agents {
        return Err(MultiPpoError::agents(what, agents, array.ncols()));
    }
    check_rows(what, array, rows)
}
