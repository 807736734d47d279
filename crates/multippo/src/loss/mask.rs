//! Valid-step masking for padded recurrent batches.

use crate::{MultiPpoError, Result};

/// Flattened validity mask of `B = seq_lens.len()` padded sequences.
///
/// Entry `[b, t]` is valid when `t < seq_lens[b]`. The result is laid out
/// batch-major (`b * max_len + t`) unless `time_major` is set, in which
/// case it is `t * B + b`.
pub fn sequence_mask(seq_lens: &[usize], max_len: usize, time_major: bool) -> Vec<bool> {
    let batch = seq_lens.len();
    let mut mask = vec![false; batch * max_len];
    for (b, &len) in seq_lens.iter().enumerate() {
        for t in 0..len.min(max_len) {
            let idx = if time_major { t * batch + b } else { b * max_len + t };
            mask[idx] = true;
        }
    }
    mask
}

/// Mean over the valid rows of a flat batch
#[derive(Clone, Debug)]
pub struct MeanReducer {
    mask: Option<Vec<bool>>,
    num_valid: usize,
}

impl MeanReducer {
    /// Every one of `rows` rows counts
    pub fn unmasked(rows: usize) -> Self {
        Self {
            mask: None,
            num_valid: rows,
        }
    }

    /// Rows past each sequence's length are padding
    pub fn from_seq_lens(seq_lens: &[usize], total_rows: usize, time_major: bool) -> Result<Self> {
        if seq_lens.is_empty() || total_rows % seq_lens.len() != 0 {
            return Err(MultiPpoError::shape(
                "seq_lens",
                &[total_rows],
                &[seq_lens.len()],
            ));
        }
        let max_len = total_rows / seq_lens.len();
        let mask = sequence_mask(seq_lens, max_len, time_major);
        let num_valid = mask.iter().filter(|&&valid| valid).count();
        Ok(Self {
            mask: Some(mask),
            num_valid,
        })
    }

    /// Per-row validity, `None` when every row counts
    pub fn mask(&self) -> Option<&[bool]> {
        self.mask.as_deref()
    }

    /// Number of valid rows
    pub fn num_valid(&self) -> usize {
        self.num_valid
    }

    /// Mean of `values` over valid rows, zero when none is valid
    pub fn mean<I: IntoIterator<Item = f64>>(&self, values: I) -> f64 {
        if self.num_valid == 0 {
            return 0.0;
        }
        let sum: f64 = match &self.mask {
            None => values.into_iter().sum(),
            Some(mask) => values
                .into_iter()
                .zip(mask)
                .filter(|(_, valid)| **valid)
                .map(|(v, _)| v)
                .sum(),
        };
        sum / self.num_valid as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_major_mask() {
        let mask = sequence_mask(&[2, 3], 3, false);
        assert_eq!(mask, vec![true, true, false, true, true, true]);
    }

    #[test]
    fn test_time_major_mask() {
        let mask = sequence_mask(&[2, 3], 3, true);
        assert_eq!(mask, vec![true, true, true, true, false, true]);
    }

    #[test]
    fn test_masked_mean_ignores_padding() {
        let reducer = MeanReducer::from_seq_lens(&[1, 2], 4, false).unwrap();
        assert_eq!(reducer.num_valid(), 3);
        assert_eq!(reducer.mask(), Some(&[true, false, true, true][..]));
        let mean = reducer.mean(vec![1.0, 100.0, 2.0, 3.0]);
        assert!((mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_unmasked_mean() {
        let reducer = MeanReducer::unmasked(4);
        assert!(reducer.mask().is_none());
        assert!((reducer.mean(vec![1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        assert!(MeanReducer::from_seq_lens(&[1, 2], 5, false).is_err());
        assert!(MeanReducer::from_seq_lens(&[], 4, false).is_err());
    }
}
