//! Adaptive KL-penalty coefficient.

/// Keeps the KL penalty near a target by multiplicative adjustment.
///
/// The coefficient is not clamped: repeated updates in one direction
/// grow or shrink it without bound.
#[derive(Clone, Debug, PartialEq)]
pub struct KlController {
    kl_coeff: f64,
    kl_target: f64,
}

impl KlController {
    pub fn new(kl_coeff: f64, kl_target: f64) -> Self {
        Self {
            kl_coeff,
            kl_target,
        }
    }

    /// Current coefficient
    pub fn coeff(&self) -> f64 {
        self.kl_coeff
    }

    /// Target KL divergence
    pub fn target(&self) -> f64 {
        self.kl_target
    }

    /// Update the coefficient from the KL measured on the last training batch
    /// and return the value to use for the next loss computation.
    pub fn update(&mut self, sampled_kl: f64) -> f64 {
        let previous = self.kl_coeff;
        if sampled_kl > 2.0 * self.kl_target {
            self.kl_coeff *= 1.5;
        } else if sampled_kl < 0.5 * self.kl_target {
            self.kl_coeff *= 0.5;
        }

        if self.kl_coeff != previous {
            tracing::debug!(
                kl = sampled_kl,
                target = self.kl_target,
                from = previous,
                to = self.kl_coeff,
                "Adjusted KL coefficient"
            );
        }
        self.kl_coeff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increase_above_twice_target() {
        let mut kl = KlController::new(0.2, 0.01);
        let c = kl.update(0.03);
        assert!((c - 0.3).abs() < 1e-12);
        assert_eq!(kl.coeff(), c);
    }

    #[test]
    fn test_decrease_below_half_target() {
        let mut kl = KlController::new(0.2, 0.01);
        assert!((kl.update(0.003) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_unchanged_in_band() {
        let mut kl = KlController::new(0.2, 0.01);
        assert_eq!(kl.update(0.01), 0.2);
        // Band edges are inclusive on both sides
        assert_eq!(kl.update(0.02), 0.2);
        assert_eq!(kl.update(0.005), 0.2);
    }

    #[test]
    fn test_drift_is_unbounded() {
        let mut kl = KlController::new(1.0, 0.01);
        for _ in 0..60 {
            kl.update(1.0);
        }
        assert!(kl.coeff() > 1e10);
        assert_eq!(kl.target(), 0.01);
    }
}
