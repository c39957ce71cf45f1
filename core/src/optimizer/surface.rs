use nalgebra::DVector;

use crate::{
    basis::BasisSet,
    cancel::CancellationToken,
    checkpoint::system_fingerprint,
    error::Result,
    molecule::Molecule,
    parallel::Communicator,
    scf::{ScfConfig, ScfDriver, ScfState},
};

/// Energy and flattened cartesian gradient at one geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfacePoint {
    pub energy: f64,
    pub gradient: DVector<f64>,
}

/// Whatever the optimizer walks on.
pub trait EnergySurface {
    fn evaluate(&mut self, molecule: &Molecule) -> Result<SurfacePoint>;

    /// Electronic state of the last evaluation, saved with optimizer checkpoints.
    fn scf_state(&self) -> Option<&ScfState> {
        None
    }

    /// Puts back a state returned by [`EnergySurface::scf_state`] before resuming.
    fn restore(&mut self, _state: Option<ScfState>) {}

    /// Identity of the system `molecule` forms on this surface, compared against checkpoints.
    fn system_fingerprint(&self, _molecule: &Molecule) -> Option<u64> {
        None
    }

    /// Combines the cancellation flag of every process taking part in an evaluation. All of them
    /// have to see the same answer, otherwise some stop while the others wait in a collective.
    fn cancellation_vote(&self, local: bool) -> Result<bool> {
        Ok(local)
    }
}

/// A full SCF solve plus analytic gradient at every geometry. The converged densities of one
/// geometry seed the next.
pub struct ScfSurface<'a, C: Communicator + ?Sized> {
    comm: &'a C,
    basis_set: &'a BasisSet,
    config: ScfConfig,
    last: Option<ScfState>,
    cancellation: Option<CancellationToken>,
}

impl<'a, C: Communicator + ?Sized> ScfSurface<'a, C> {
    pub fn new(comm: &'a C, basis_set: &'a BasisSet, config: &ScfConfig) -> Self {
        Self {
            comm,
            basis_set,
            config: config.clone(),
            last: None,
            cancellation: None,
        }
    }

    /// Lets a cancellation stop an SCF in the middle of an evaluation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl<C: Communicator + ?Sized> EnergySurface for ScfSurface<'_, C> {
    fn evaluate(&mut self, molecule: &Molecule) -> Result<SurfacePoint> {
        let mut driver = ScfDriver::new(self.comm, molecule, self.basis_set, &self.config)?;
        if let Some(previous) = &self.last {
            driver = driver.with_guess(&previous.densities)?;
        }
        if let Some(token) = &self.cancellation {
            driver = driver.with_cancellation(token.clone());
        }

        let outcome = driver.solve()?;
        let gradient = driver.gradient()?;
        self.last = Some(driver.into_state());

        Ok(SurfacePoint {
            energy: outcome.energy,
            gradient: gradient.to_vector(),
        })
    }

    fn scf_state(&self) -> Option<&ScfState> {
        self.last.as_ref()
    }

    fn restore(&mut self, state: Option<ScfState>) {
        self.last = state;
    }

    fn system_fingerprint(&self, molecule: &Molecule) -> Option<u64> {
        Some(system_fingerprint(molecule, self.basis_set))
    }

    fn cancellation_vote(&self, local: bool) -> Result<bool> {
        let votes = self.comm.all_reduce_sum(vec![if local { 1.0 } else { 0.0 }])?;
        Ok(votes.first().is_some_and(|&votes| votes > 0.0))
    }
}
