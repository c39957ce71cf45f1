use nalgebra::{DMatrix, Vector3};

use crate::{basis::AoBasis, molecule::Molecule};

/// Mulliken population charges, Z_A - Σ_{μ∈A} (PS)_μμ.
pub fn mulliken_charges(
    molecule: &Molecule,
    basis: &AoBasis,
    overlap: &DMatrix<f64>,
    total_density: &DMatrix<f64>,
) -> Vec<f64> {
    let populations = total_density * overlap;
    let mut charges = molecule
        .atoms()
        .iter()
        .map(|atom| atom.nuclear_charge())
        .collect::<Vec<_>>();

    for (function, atom) in basis.function_atoms().into_iter().enumerate() {
        charges[atom] -= populations[(function, function)];
    }
    charges
}

/// Electric dipole moment about the origin in atomic units (e bohr).
pub fn dipole_moment(
    molecule: &Molecule,
    dipole_integrals: &[DMatrix<f64>; 3],
    total_density: &DMatrix<f64>,
) -> Vector3<f64> {
    let nuclear = molecule
        .atoms()
        .iter()
        .fold(Vector3::zeros(), |sum, atom| sum + atom.position() * atom.nuclear_charge());
    let electronic = Vector3::from_fn(|axis, _| total_density.dot(&dipole_integrals[axis]));
    nuclear - electronic
}
