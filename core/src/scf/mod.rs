//! Self-consistent field iteration.
//!
//! [`ScfDriver`] owns the whole iteration state ([`ScfState`]) and advances it one cycle at a
//! time: build Fock matrices from the current densities, extrapolate with DIIS (or fall back to
//! damping when the energy runs away), diagonalize, form new densities and decide whether the
//! calculation converged, diverged or ran out of cycles.
mod config;
mod diis;
mod driver;
mod guess;
mod monitor;
mod orthogonal;
mod properties;
mod state;
pub(crate) mod utils;

pub use config::{ConvergenceCriteria, DiisConfig, DivergencePolicy, Guess, Reference, ScfConfig};
pub use diis::Diis;
pub use driver::{ScfDriver, ScfOutcome};
pub use monitor::{Acceleration, DivergenceMonitor, Verdict};
pub use orthogonal::Orthogonalizer;
pub use properties::{dipole_moment, mulliken_charges};
pub use state::{MoCoefficients, ScfState, ScfStatus};
