use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::fock::EnergyComponents;

use super::{diis::Diis, monitor::DivergenceMonitor};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScfStatus {
    Initialized,
    Iterating,
    Converged,
    Diverged,
    MaxCyclesExceeded,
}

impl ScfStatus {
    /// No further cycles will run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ScfStatus::Initialized | ScfStatus::Iterating)
    }
}

/// Molecular orbitals of every spin channel: coefficients in the atomic orbital basis (one column
/// per orbital) and orbital energies, both in ascending energy order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoCoefficients {
    pub coefficients: Vec<DMatrix<f64>>,
    pub energies: Vec<DVector<f64>>,
    /// occupied orbitals per channel
    pub occupied: Vec<usize>,
    /// electrons per occupied orbital: 2 for a restricted closed shell, 1 otherwise
    pub occupation: f64,
}

impl MoCoefficients {
    pub fn channels(&self) -> usize {
        self.coefficients.len()
    }

    /// Highest occupied orbital energy over all channels.
    pub fn homo(&self) -> Option<f64> {
        self.energies
            .iter()
            .zip(&self.occupied)
            .filter(|&(_, &occupied)| occupied > 0)
            .map(|(energies, &occupied)| energies[occupied - 1])
            .reduce(f64::max)
    }

    /// Lowest unoccupied orbital energy over all channels.
    pub fn lumo(&self) -> Option<f64> {
        self.energies
            .iter()
            .zip(&self.occupied)
            .filter_map(|(energies, &occupied)| energies.get(occupied).copied())
            .reduce(f64::min)
    }
}

/// Everything the SCF iteration carries from one cycle to the next. Owned by the driver, and
/// sufficient to continue an interrupted calculation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScfState {
    pub status: ScfStatus,
    /// completed cycles
    pub cycle: usize,
    /// total energy of the density the last Fock matrices were built from
    pub energy: f64,
    pub components: EnergyComponents,
    pub energy_delta: Option<f64>,
    /// rms change of the density in the last cycle
    pub density_delta: f64,
    /// largest element of the orbital gradient of the last Fock matrices
    pub residual: f64,
    /// consecutive cycles meeting the energy and density thresholds
    pub converged_cycles: usize,
    /// the total density for a restricted calculation, alpha and beta densities otherwise
    pub densities: Vec<DMatrix<f64>>,
    /// orbitals the current densities were built from
    pub orbitals: MoCoefficients,
    pub diis: Diis,
    pub monitor: DivergenceMonitor,
}

impl ScfState {
    pub(crate) fn new(
        densities: Vec<DMatrix<f64>>,
        orbitals: MoCoefficients,
        diis: Diis,
        monitor: DivergenceMonitor,
    ) -> Self {
        Self {
            status: ScfStatus::Initialized,
            cycle: 0,
            energy: 0.0,
            components: EnergyComponents::default(),
            energy_delta: None,
            density_delta: f64::INFINITY,
            residual: f64::INFINITY,
            converged_cycles: 0,
            densities,
            orbitals,
            diis,
            monitor,
        }
    }

    /// Sum of the channel densities.
    pub fn total_density(&self) -> DMatrix<f64> {
        match self.densities.split_first() {
            Some((first, rest)) => rest.iter().fold(first.clone(), |sum, d| sum + d),
            None => DMatrix::zeros(0, 0),
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.densities.len() == 1
    }
}
