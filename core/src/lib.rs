//! A distributed self-consistent field engine: integrals, parallel Fock construction, the SCF
//! iteration, analytic gradients, geometry optimization and restartable checkpoints.
pub mod atom;
pub mod basis;
pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod dispersion;
pub mod error;
pub mod fock;
pub mod gradient;
pub mod integrals;
pub mod molecule;
pub mod optimizer;
pub mod parallel;
pub mod periodic_table;
pub mod scf;
pub mod testing;
pub mod units;
pub mod vibrations;
pub mod xc;

pub use error::{Error, Result};
