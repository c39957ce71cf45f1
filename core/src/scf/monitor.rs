use serde::{Deserialize, Serialize};

use super::DivergencePolicy;

/// How the next density is produced from the current Fock matrices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceleration {
    Diis,
    /// Fixed-point iteration: diagonalize the Fock matrix as built.
    Plain,
    /// Fixed-point iteration mixing in part of the previous density.
    Damping,
}

/// What the monitor decided after looking at one cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    /// Switched to damped updates.
    Fallback,
    /// Damping brought the residual down, back to the normal mode.
    Recovered,
    /// Damping did not help either.
    Diverged,
}

/// Watches energies and residuals for runaway iterations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DivergenceMonitor {
    normal: Acceleration,
    mode: Acceleration,
    rises: usize,
    previous_residual: Option<f64>,
    damped_cycles: usize,
    /// residual when damping started
    fallback_residual: f64,
}

impl DivergenceMonitor {
    pub fn new(normal: Acceleration) -> Self {
        Self {
            normal,
            mode: normal,
            rises: 0,
            previous_residual: None,
            damped_cycles: 0,
            fallback_residual: f64::INFINITY,
        }
    }

    pub fn mode(&self) -> Acceleration {
        self.mode
    }

    /// Feeds one cycle: the energy change against the previous cycle (if any) and the residual
    /// of the Fock matrix just built. A rise counts only when it exceeds `tolerance` and the
    /// residual did not shrink either.
    pub fn observe(
        &mut self,
        policy: &DivergencePolicy,
        energy_delta: Option<f64>,
        residual: f64,
        tolerance: f64,
    ) -> Verdict {
        if self.mode == Acceleration::Damping {
            self.damped_cycles += 1;
            if self.damped_cycles < policy.fallback_cycles {
                return Verdict::Continue;
            }
            if residual < self.fallback_residual {
                self.mode = self.normal;
                self.rises = 0;
                self.previous_residual = Some(residual);
                return Verdict::Recovered;
            }
            return Verdict::Diverged;
        }

        let rising = energy_delta.is_some_and(|delta| delta > tolerance)
            && self.previous_residual.is_some_and(|previous| residual >= previous);
        self.rises = if rising { self.rises + 1 } else { 0 };
        self.previous_residual = Some(residual);

        if self.rises > policy.energy_rise_cycles {
            self.mode = Acceleration::Damping;
            self.rises = 0;
            self.damped_cycles = 0;
            self.fallback_residual = residual;
            Verdict::Fallback
        } else {
            Verdict::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Acceleration, DivergenceMonitor, Verdict};
    use crate::scf::DivergencePolicy;

    fn policy() -> DivergencePolicy {
        DivergencePolicy {
            energy_rise_cycles: 2,
            damping: 0.5,
            fallback_cycles: 3,
        }
    }

    #[test]
    fn oscillation_does_not_trigger_fallback() {
        let mut monitor = DivergenceMonitor::new(Acceleration::Diis);
        let policy = policy();

        let deltas = [None, Some(1e-3), Some(-2e-3), Some(1e-3), Some(-1e-3), Some(1e-3)];
        for delta in deltas {
            assert_eq!(monitor.observe(&policy, delta, 1.0, 1e-8), Verdict::Continue);
        }
        // the residual shrinks, so a rising energy alone is tolerated
        for k in 0..5 {
            let residual = 0.5f64.powi(k);
            assert_eq!(monitor.observe(&policy, Some(1e-3), residual, 1e-8), Verdict::Continue);
        }
        assert_eq!(monitor.mode(), Acceleration::Diis);
    }

    #[test]
    fn fallback_then_recovery() {
        let mut monitor = DivergenceMonitor::new(Acceleration::Diis);
        let policy = policy();

        assert_eq!(monitor.observe(&policy, None, 1.0, 1e-8), Verdict::Continue);
        assert_eq!(monitor.observe(&policy, Some(0.1), 1.0, 1e-8), Verdict::Continue);
        assert_eq!(monitor.observe(&policy, Some(0.1), 1.1, 1e-8), Verdict::Continue);
        assert_eq!(monitor.observe(&policy, Some(0.1), 1.2, 1e-8), Verdict::Fallback);
        assert_eq!(monitor.mode(), Acceleration::Damping);

        assert_eq!(monitor.observe(&policy, Some(-0.1), 0.9, 1e-8), Verdict::Continue);
        assert_eq!(monitor.observe(&policy, Some(-0.1), 0.5, 1e-8), Verdict::Continue);
        assert_eq!(monitor.observe(&policy, Some(-0.1), 0.2, 1e-8), Verdict::Recovered);
        assert_eq!(monitor.mode(), Acceleration::Diis);
    }

    #[test]
    fn fallback_that_does_not_help_diverges() {
        let mut monitor = DivergenceMonitor::new(Acceleration::Plain);
        let policy = policy();

        monitor.observe(&policy, None, 1.0, 1e-8);
        for k in 1..4 {
            monitor.observe(&policy, Some(0.1), 1.0 + k as f64, 1e-8);
        }
        assert_eq!(monitor.mode(), Acceleration::Damping);

        assert_eq!(monitor.observe(&policy, Some(0.1), 5.0, 1e-8), Verdict::Continue);
        assert_eq!(monitor.observe(&policy, Some(0.1), 6.0, 1e-8), Verdict::Continue);
        assert_eq!(monitor.observe(&policy, Some(0.1), 7.0, 1e-8), Verdict::Diverged);
    }
}
