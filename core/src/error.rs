use thiserror::Error;

use crate::{
    parallel::CommError,
    periodic_table::ElementType,
    scf::{ScfState, ScfStatus},
};

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine reports to its caller.
///
/// Variants that end a calculation carry enough state (cycle count, last energy, density delta) to
/// diagnose the failure or restart from the last checkpoint.
#[derive(Debug, Error)]
pub enum Error {
    /// The overlap matrix is so close to singular that the remaining orbitals cannot hold all
    /// electrons. Milder linear dependencies are projected out and only logged.
    #[error(
        "basis is linearly dependent: {removed} of {functions} functions projected out, \
         {orbitals} orbitals remain for {occupied} occupied"
    )]
    BasisLinearDependency {
        functions: usize,
        removed: usize,
        orbitals: usize,
        occupied: usize,
    },

    #[error(
        "SCF diverged at cycle {cycle}: damping did not reduce the residual \
         (residual {residual:.3e}, energy {energy:.10}, density rms {density_delta:.3e})"
    )]
    ScfDivergence {
        cycle: usize,
        energy: f64,
        residual: f64,
        density_delta: f64,
    },

    #[error(
        "SCF did not converge within {cycles} cycles \
         (energy {energy:.10}, density rms {density_delta:.3e})"
    )]
    MaxCyclesExceeded {
        cycles: usize,
        energy: f64,
        density_delta: f64,
        /// The state after the last cycle, usable as a restart point.
        state: Box<ScfState>,
    },

    #[error(
        "geometry optimization gave up after {rejections} consecutive rejected steps \
         at step {step} (trust radius {trust_radius:.3e})"
    )]
    OptimizerStepRejectionLimitExceeded {
        step: usize,
        rejections: usize,
        trust_radius: f64,
    },

    #[error("geometry optimization did not converge within {steps} steps (max force {max_force:.3e})")]
    OptimizerMaxStepsExceeded { steps: usize, max_force: f64 },

    #[error("checkpoint has format version {found}, this build reads version {expected}")]
    CheckpointVersionMismatch { found: u32, expected: u32 },

    #[error("checkpoint is corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("checkpoint belongs to another system (fingerprint {found:016x}, expected {expected:016x})")]
    CheckpointFingerprintMismatch { expected: u64, found: u64 },

    #[error("parallel communication failed: {0}")]
    ParallelCommunicationFailure(#[from] CommError),

    #[error("interrupted at the boundary of cycle {cycle}")]
    Interrupted { cycle: usize },

    #[error("gradients need a converged SCF state, found {0:?}")]
    GradientPrecondition(ScfStatus),

    #[error("basis set has no functions for {0}")]
    MissingBasis(ElementType),

    #[error("{electrons} electrons are incompatible with spin multiplicity {multiplicity}")]
    InvalidElectronConfiguration { electrons: i64, multiplicity: u32 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
