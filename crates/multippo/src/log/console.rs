//! Console backend emitting one structured `tracing` event per step.

use super::{StatsReporter, StepStats};

/// Reports step statistics as `info` events tagged with a run name.
#[derive(Clone, Debug, Default)]
pub struct ConsoleReporter {
    run: String,
}

impl ConsoleReporter {
    pub fn new(run: impl Into<String>) -> Self {
        Self { run: run.into() }
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    /// Compact human-readable line
    pub fn summary(stats: &StepStats) -> String {
        format!(
            "loss={:.4} pi={:.4} vf={:.4} kl={:.4} ent={:.4} kl_coeff={:.4}",
            stats.loss.total_loss,
            stats.loss.policy_loss,
            stats.loss.vf_loss,
            stats.loss.kl,
            stats.loss.entropy,
            stats.cur_kl_coeff,
        )
    }
}

impl StatsReporter for ConsoleReporter {
    fn report(&self, step: u64, stats: &StepStats) {
        tracing::info!(
            run = %self.run,
            step,
            total_loss = stats.loss.total_loss,
            policy_loss = stats.loss.policy_loss,
            vf_loss = stats.loss.vf_loss,
            vf_explained_var = stats.loss.vf_explained_var,
            kl = stats.loss.kl,
            entropy = stats.loss.entropy,
            cur_kl_coeff = stats.cur_kl_coeff,
            cur_lr = stats.cur_lr,
            entropy_coeff = stats.entropy_coeff,
            reward_fallbacks = stats.reward_fallbacks,
            "{}",
            Self::summary(stats)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::LossStats;

    #[test]
    fn test_summary_line() {
        let stats = StepStats {
            cur_kl_coeff: 0.3,
            loss: LossStats {
                total_loss: 1.5,
                kl: 0.01,
                ..LossStats::default()
            },
            ..StepStats::default()
        };
        assert_eq!(
            ConsoleReporter::summary(&stats),
            "loss=1.5000 pi=0.0000 vf=0.0000 kl=0.0100 ent=0.0000 kl_coeff=0.3000"
        );
        ConsoleReporter::new("learner").report(0, &stats);
    }
}
