use serde::{Deserialize, Serialize};

use crate::{dispersion::DispersionConfig, fock::FockConfig, xc::Method};

/// Thresholds that must hold together for a number of consecutive cycles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceCriteria {
    /// |ΔE| between cycles, hartree
    pub energy: f64,
    /// root mean square change of the density matrix
    pub density: f64,
    /// largest element of the orbital gradient FPS - SPF; below this together with `density` the
    /// density is a fixed point and the cycle count requirement is waived
    pub residual: f64,
    pub consecutive_cycles: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            energy: 1e-8,
            density: 1e-6,
            residual: 1e-6,
            consecutive_cycles: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiisConfig {
    /// Plain fixed-point iteration when false.
    pub enabled: bool,
    /// Number of (Fock, error) pairs kept.
    pub window: usize,
    /// Extrapolation starts once this many pairs are stored.
    pub min_vectors: usize,
}

impl Default for DiisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 8,
            min_vectors: 2,
        }
    }
}

/// When to give up on acceleration and fall back to damped updates, and when to give up
/// entirely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergencePolicy {
    /// Consecutive cycles in which the energy rises while the residual does not shrink before
    /// damping takes over.
    pub energy_rise_cycles: usize,
    /// Fraction of the previous density mixed into each damped update.
    pub damping: f64,
    /// Damped cycles after which the residual must have dropped below its value at the start of
    /// the fallback.
    pub fallback_cycles: usize,
}

impl Default for DivergencePolicy {
    fn default() -> Self {
        Self {
            energy_rise_cycles: 3,
            damping: 0.5,
            fallback_cycles: 12,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guess {
    /// Orbitals of the bare core Hamiltonian.
    Core,
    /// Generalized Wolfsberg-Helmholz (extended Hückel) with K = 1.75.
    #[default]
    Gwh,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// Restricted for singlets, unrestricted otherwise.
    #[default]
    Auto,
    Restricted,
    Unrestricted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScfConfig {
    pub method: Method,
    pub reference: Reference,
    pub guess: Guess,
    pub max_cycles: usize,
    pub convergence: ConvergenceCriteria,
    pub diis: DiisConfig,
    pub divergence: DivergencePolicy,
    /// Overlap eigenvalues below this are projected out of the orbital space.
    pub linear_dependency_threshold: f64,
    pub fock: FockConfig,
    pub dispersion: DispersionConfig,
}

impl Default for ScfConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            reference: Reference::default(),
            guess: Guess::default(),
            max_cycles: 128,
            convergence: ConvergenceCriteria::default(),
            diis: DiisConfig::default(),
            divergence: DivergencePolicy::default(),
            linear_dependency_threshold: 1e-7,
            fock: FockConfig::default(),
            dispersion: DispersionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Guess, Reference, ScfConfig};
    use crate::{parallel::Balancing, xc::Method};

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ScfConfig = serde_json::from_str(
            r#"{
                "method": "svwn5",
                "reference": "unrestricted",
                "convergence": {"energy": 1e-10},
                "diis": {"window": 6},
                "fock": {"balancing": "dynamic", "grid": {"radial_points": 80}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.method, Method::Svwn5);
        assert_eq!(config.reference, Reference::Unrestricted);
        assert_eq!(config.guess, Guess::Gwh);
        assert_eq!(config.convergence.energy, 1e-10);
        assert_eq!(config.convergence.density, 1e-6);
        assert_eq!(config.diis.window, 6);
        assert!(config.diis.enabled);
        assert_eq!(config.fock.balancing, Balancing::Dynamic);
        assert_eq!(config.fock.grid.radial_points, 80);
        assert_eq!(config.fock.grid.theta_points, 18);
        assert_eq!(config.max_cycles, ScfConfig::default().max_cycles);
    }
}
