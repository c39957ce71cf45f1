//! Input files: molecules, basis sets and job settings.
mod basis_set;
mod job;
mod molecule;

pub use basis_set::ConfigBasisSet;
pub use job::JobConfig;
pub use molecule::{parse_xyz, ConfigAtom, ConfigMolecule, LengthUnit};
