use nalgebra::{DMatrix, Vector3};

use crate::{
    basis::{AoBasis, Shell},
    integrals::{IntegralKernel, PointCharge},
};

/// Σ_{μ∈a, ν∈b} M_μν block_μν for a row-major shell pair block.
fn contract(matrix: &DMatrix<f64>, a: &Shell, b: &Shell, block: &[f64]) -> f64 {
    let nb = b.n_functions();
    let mut sum = 0.0;
    for (i, mu) in a.functions().enumerate() {
        for (j, nu) in b.functions().enumerate() {
            sum += matrix[(mu, nu)] * block[i * nb + j];
        }
    }
    sum
}

/// Calls `pair` for every shell pair a >= b with the factor that accounts for the (b, a) twin.
fn for_shell_pairs(basis: &AoBasis, mut pair: impl FnMut(&Shell, &Shell, f64)) {
    let shells = basis.shells();
    for (index_a, a) in shells.iter().enumerate() {
        for (index_b, b) in shells[..=index_a].iter().enumerate() {
            pair(a, b, if index_a == index_b { 1.0 } else { 2.0 });
        }
    }
}

/// W = Σ_σ P_σ F_σ P_σ / f, the energy-weighted density.
///
/// Built from the Fock matrices of the densities themselves, so it stays consistent with the
/// energy even when the stored orbitals came from an extrapolated Fock matrix.
pub(crate) fn energy_weighted_density(
    densities: &[DMatrix<f64>],
    fock: &[DMatrix<f64>],
    occupation: f64,
) -> DMatrix<f64> {
    let mut weighted: Option<DMatrix<f64>> = None;
    for (density, fock) in densities.iter().zip(fock) {
        let channel = density * fock * density / occupation;
        weighted = Some(match weighted {
            Some(sum) => sum + channel,
            None => channel,
        });
    }
    weighted.unwrap_or_else(|| DMatrix::zeros(0, 0))
}

/// Σ P dH/dX: kinetic and nuclear attraction blocks move with their shells, the attraction
/// operator moves with each nucleus.
pub(crate) fn one_electron(
    kernel: &impl IntegralKernel,
    basis: &AoBasis,
    charges: &[PointCharge],
    total_density: &DMatrix<f64>,
    gradient: &mut [Vector3<f64>],
) {
    for_shell_pairs(basis, |a, b, factor| {
        let kinetic = kernel.kinetic_derivative((a, b));
        for (axis, block) in kinetic.iter().enumerate() {
            let term = factor * contract(total_density, a, b, block);
            gradient[a.atom()][axis] += term;
            gradient[b.atom()][axis] -= term;
        }

        for (nucleus, charge) in charges.iter().enumerate() {
            let (d_a, d_b) = kernel.nuclear_derivative((a, b), charge);
            for axis in 0..3 {
                let term_a = factor * contract(total_density, a, b, &d_a[axis]);
                let term_b = factor * contract(total_density, a, b, &d_b[axis]);
                gradient[a.atom()][axis] += term_a;
                gradient[b.atom()][axis] += term_b;
                gradient[nucleus][axis] -= term_a + term_b;
            }
        }
    });
}

/// -Σ W dS/dX, the force from basis functions riding on the nuclei.
pub(crate) fn pulay(
    kernel: &impl IntegralKernel,
    basis: &AoBasis,
    energy_weighted: &DMatrix<f64>,
    gradient: &mut [Vector3<f64>],
) {
    for_shell_pairs(basis, |a, b, factor| {
        if a.atom() == b.atom() {
            return;
        }
        let overlap = kernel.overlap_derivative((a, b));
        for (axis, block) in overlap.iter().enumerate() {
            let term = factor * contract(energy_weighted, a, b, block);
            gradient[a.atom()][axis] -= term;
            gradient[b.atom()][axis] += term;
        }
    });
}

/// Adds ½ Σ_ijkl d(ij|kl)/dX G_ijkl of one canonical quartet, with the two-particle density
/// G_ijkl = P_ij P_kl - α/(2f) Σ_σ (P^σ_ik P^σ_jl + P^σ_il P^σ_jk).
pub(crate) fn add_quartet(
    kernel: &impl IntegralKernel,
    shells: [&Shell; 4],
    degeneracy: f64,
    total: &DMatrix<f64>,
    densities: &[DMatrix<f64>],
    exchange_scale: f64,
    gradient: &mut [Vector3<f64>],
) {
    let [a, b, c, d] = shells;
    let derivatives = kernel.electron_repulsion_derivative((a, b, c, d));

    let mut weights = Vec::with_capacity(derivatives.centers[0][0].len());
    for i in a.functions() {
        for j in b.functions() {
            for k in c.functions() {
                for l in d.functions() {
                    let mut density = total[(i, j)] * total[(k, l)];
                    if exchange_scale != 0.0 {
                        let exchange = densities
                            .iter()
                            .map(|p| p[(i, k)] * p[(j, l)] + p[(i, l)] * p[(j, k)])
                            .sum::<f64>();
                        density -= 0.5 * exchange_scale * exchange;
                    }
                    weights.push(0.5 * degeneracy * density);
                }
            }
        }
    }

    for (shell, center) in shells.iter().zip(&derivatives.centers) {
        for (axis, block) in center.iter().enumerate() {
            let term = block
                .iter()
                .zip(&weights)
                .map(|(value, weight)| value * weight)
                .sum::<f64>();
            gradient[shell.atom()][axis] += term;
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    use super::energy_weighted_density;

    /// Orthonormal orbitals c_i of F = C diag(ε) C^T with the first one doubly occupied.
    fn rotated(angle: f64) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
        let (sin, cos) = angle.sin_cos();
        let orbitals = DMatrix::from_row_slice(2, 2, &[cos, -sin, sin, cos]);
        let energies = DMatrix::from_diagonal(&DVector::from_vec(vec![-0.5, 0.3]));
        let fock = &orbitals * energies * orbitals.transpose();
        let occupied = orbitals.columns(0, 1);
        let density = occupied * occupied.transpose() * 2.0;
        (orbitals, fock, density)
    }

    #[test]
    fn energy_weighted_density_of_occupied_orbitals() {
        let (orbitals, fock, density) = rotated(0.3);
        let weighted = energy_weighted_density(&[density], &[fock], 2.0);

        let occupied = orbitals.columns(0, 1);
        let expected = occupied * occupied.transpose() * (2.0 * -0.5);
        assert_relative_eq!(weighted, expected, epsilon = 1e-14);
    }

    #[test]
    fn energy_weighted_density_sums_spin_channels() {
        let (_, fock, density) = rotated(-0.7);
        let alpha = &density / 2.0;
        let restricted = energy_weighted_density(&[density], std::slice::from_ref(&fock), 2.0);
        let unrestricted =
            energy_weighted_density(&[alpha.clone(), alpha], &[fock.clone(), fock], 1.0);
        assert_relative_eq!(restricted, unrestricted, epsilon = 1e-14);
    }
}
