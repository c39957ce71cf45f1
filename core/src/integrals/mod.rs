//! Molecular integrals over contracted cartesian Gaussian shells.
//!
//! Blocks are flat row-major arrays: an (a|b) block has `n_a * n_b` elements indexed `i * n_b + j`,
//! an (ab|cd) block is indexed `((i * n_b + j) * n_c + k) * n_d + l`.
mod boys;
mod electron_tensor;
mod eri;
mod hermite;
mod mmd;
mod screening;

use nalgebra::DMatrix;

use crate::{
    basis::{AoBasis, Shell},
    molecule::Molecule,
};

pub use electron_tensor::ElectronTensor;
pub use eri::EriDerivatives;
pub use mmd::PointCharge;
pub use screening::{significant_quartets, unique_quartets, SchwarzBounds, ShellQuartet};

/// Evaluates integral blocks for shell pairs and quartets.
///
/// Implementations are stateless: every call depends only on its arguments, so one kernel can be
/// shared by any number of workers.
pub trait IntegralKernel: Send + Sync {
    fn overlap(&self, shells: (&Shell, &Shell)) -> Vec<f64>;

    fn kinetic(&self, shells: (&Shell, &Shell)) -> Vec<f64>;

    /// Attraction to the given point charges (nuclei carry positive charge, the block is negative).
    fn nuclear(&self, shells: (&Shell, &Shell), charges: &[PointCharge]) -> Vec<f64>;

    /// <a| x |b>, <a| y |b>, <a| z |b> about the origin.
    fn dipole(&self, shells: (&Shell, &Shell)) -> [Vec<f64>; 3];

    fn electron_repulsion(&self, shells: (&Shell, &Shell, &Shell, &Shell)) -> Vec<f64>;

    /// d/dA_x, d/dA_y, d/dA_z of the overlap block. d/dB is the negative.
    fn overlap_derivative(&self, shells: (&Shell, &Shell)) -> [Vec<f64>; 3];

    /// d/dA of the kinetic block. d/dB is the negative.
    fn kinetic_derivative(&self, shells: (&Shell, &Shell)) -> [Vec<f64>; 3];

    /// (d/dA, d/dB) of the attraction block of a single charge; d/dC = -(d/dA + d/dB).
    fn nuclear_derivative(
        &self,
        shells: (&Shell, &Shell),
        charge: &PointCharge,
    ) -> ([Vec<f64>; 3], [Vec<f64>; 3]);

    fn electron_repulsion_derivative(
        &self,
        shells: (&Shell, &Shell, &Shell, &Shell),
    ) -> EriDerivatives;
}

/// The McMurchie-Davidson scheme.
#[derive(Copy, Clone, Debug, Default)]
pub struct McMurchieDavidson;

impl IntegralKernel for McMurchieDavidson {
    fn overlap(&self, (a, b): (&Shell, &Shell)) -> Vec<f64> {
        mmd::overlap_block(a, b)
    }

    fn kinetic(&self, (a, b): (&Shell, &Shell)) -> Vec<f64> {
        mmd::kinetic_block(a, b)
    }

    fn nuclear(&self, (a, b): (&Shell, &Shell), charges: &[PointCharge]) -> Vec<f64> {
        mmd::nuclear_block(a, b, charges)
    }

    fn dipole(&self, (a, b): (&Shell, &Shell)) -> [Vec<f64>; 3] {
        mmd::dipole_block(a, b)
    }

    fn electron_repulsion(&self, (a, b, c, d): (&Shell, &Shell, &Shell, &Shell)) -> Vec<f64> {
        eri::eri_block([a, b, c, d])
    }

    fn overlap_derivative(&self, (a, b): (&Shell, &Shell)) -> [Vec<f64>; 3] {
        mmd::overlap_derivative_block(a, b)
    }

    fn kinetic_derivative(&self, (a, b): (&Shell, &Shell)) -> [Vec<f64>; 3] {
        mmd::kinetic_derivative_block(a, b)
    }

    fn nuclear_derivative(
        &self,
        (a, b): (&Shell, &Shell),
        charge: &PointCharge,
    ) -> ([Vec<f64>; 3], [Vec<f64>; 3]) {
        mmd::nuclear_derivative_block(a, b, charge)
    }

    fn electron_repulsion_derivative(
        &self,
        (a, b, c, d): (&Shell, &Shell, &Shell, &Shell),
    ) -> EriDerivatives {
        eri::eri_derivative_block([a, b, c, d])
    }
}

/// Nuclei of a molecule as point charges.
pub fn nuclear_charges(molecule: &Molecule) -> Vec<PointCharge> {
    molecule
        .atoms()
        .iter()
        .map(|atom| PointCharge {
            charge: atom.nuclear_charge(),
            position: *atom.position(),
        })
        .collect()
}

/// Assembles a symmetric matrix from the blocks of all shell pairs a >= b.
pub(crate) fn shell_pair_matrix(
    basis: &AoBasis,
    mut block: impl FnMut(&Shell, &Shell) -> Vec<f64>,
) -> DMatrix<f64> {
    let n = basis.n_functions();
    let mut matrix = DMatrix::zeros(n, n);
    let shells = basis.shells();

    for (index_a, a) in shells.iter().enumerate() {
        for b in &shells[..=index_a] {
            let values = block(a, b);
            let nb = b.n_functions();
            for (i, mu) in a.functions().enumerate() {
                for (j, nu) in b.functions().enumerate() {
                    matrix[(mu, nu)] = values[i * nb + j];
                    matrix[(nu, mu)] = values[i * nb + j];
                }
            }
        }
    }

    matrix
}

pub fn overlap_matrix(kernel: &impl IntegralKernel, basis: &AoBasis) -> DMatrix<f64> {
    shell_pair_matrix(basis, |a, b| kernel.overlap((a, b)))
}

pub fn kinetic_matrix(kernel: &impl IntegralKernel, basis: &AoBasis) -> DMatrix<f64> {
    shell_pair_matrix(basis, |a, b| kernel.kinetic((a, b)))
}

pub fn nuclear_matrix(
    kernel: &impl IntegralKernel,
    basis: &AoBasis,
    molecule: &Molecule,
) -> DMatrix<f64> {
    let charges = nuclear_charges(molecule);
    shell_pair_matrix(basis, |a, b| kernel.nuclear((a, b), &charges))
}

/// Core Hamiltonian T + V.
pub fn core_hamiltonian(
    kernel: &impl IntegralKernel,
    basis: &AoBasis,
    molecule: &Molecule,
) -> DMatrix<f64> {
    kinetic_matrix(kernel, basis) + nuclear_matrix(kernel, basis, molecule)
}

/// Dipole integral matrices for x, y and z.
pub fn dipole_matrices(kernel: &impl IntegralKernel, basis: &AoBasis) -> [DMatrix<f64>; 3] {
    let n = basis.n_functions();
    let mut matrices = [0, 1, 2].map(|_| DMatrix::zeros(n, n));
    let shells = basis.shells();

    for (index_a, a) in shells.iter().enumerate() {
        for b in &shells[..=index_a] {
            let blocks = kernel.dipole((a, b));
            let nb = b.n_functions();
            for (matrix, values) in matrices.iter_mut().zip(&blocks) {
                for (i, mu) in a.functions().enumerate() {
                    for (j, nu) in b.functions().enumerate() {
                        matrix[(mu, nu)] = values[i * nb + j];
                        matrix[(nu, mu)] = values[i * nb + j];
                    }
                }
            }
        }
    }

    matrices
}
