mod functions;
mod set;
mod shell;

pub(crate) use functions::cartesian_components;
pub use set::{AtomicBasis, BasisSet, ElectronShell};
pub use shell::{AoBasis, Shell};
