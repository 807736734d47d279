//! Coefficient schedules driven by the global timestep.

/// Value of a hyperparameter as a function of the global timestep
#[derive(Clone, Debug, PartialEq)]
pub enum Schedule {
    /// Same value at every timestep
    Constant(f64),
    /// Linear interpolation between `(timestep, value)` endpoints.
    /// Before the first and after the last endpoint the last value holds.
    Piecewise(Vec<(u64, f64)>),
}

impl Schedule {
    /// Build from a configured constant and an optional schedule.
    ///
    /// An empty schedule is treated as absent.
    pub fn from_config(initial: f64, schedule: Option<&[(u64, f64)]>) -> Self {
        match schedule {
            Some(points) if !points.is_empty() => Schedule::Piecewise(points.to_vec()),
            _ => Schedule::Constant(initial),
        }
    }

    /// Value at timestep `t`
    pub fn value(&self, t: u64) -> f64 {
        match self {
            Schedule::Constant(v) => *v,
            Schedule::Piecewise(points) => {
                for pair in points.windows(2) {
                    let (l_t, l_v) = pair[0];
                    let (r_t, r_v) = pair[1];
                    if l_t <= t && t < r_t {
                        let alpha = (t - l_t) as f64 / (r_t - l_t) as f64;
                        return l_v + alpha * (r_v - l_v);
                    }
                }
                // Outside all intervals
                points.last().map(|&(_, v)| v).unwrap_or(0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let s = Schedule::from_config(0.01, None);
        assert_eq!(s.value(0), 0.01);
        assert_eq!(s.value(1_000_000), 0.01);
    }

    #[test]
    fn test_piecewise_interpolates() {
        let s = Schedule::from_config(0.5, Some(&[(0, 1.0), (100, 0.0), (200, 0.5)]));
        assert!((s.value(0) - 1.0).abs() < 1e-12);
        assert!((s.value(50) - 0.5).abs() < 1e-12);
        assert!((s.value(100) - 0.0).abs() < 1e-12);
        assert!((s.value(150) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_piecewise_outside_value_is_last() {
        let s = Schedule::from_config(0.5, Some(&[(10, 1.0), (20, 0.1)]));
        assert_eq!(s.value(5), 0.1);
        assert_eq!(s.value(20), 0.1);
        assert_eq!(s.value(10_000), 0.1);
    }

    #[test]
    fn test_empty_schedule_is_constant() {
        let s = Schedule::from_config(0.3, Some(&[]));
        assert_eq!(s, Schedule::Constant(0.3));
    }
}
