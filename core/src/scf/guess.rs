use nalgebra::DMatrix;

use crate::error::{Error, Result};

use super::{utils::symmetric_matrix, Guess};

/// Wolfsberg-Helmholz constant.
const GWH_K: f64 = 1.75;

/// The one-electron matrix whose orbitals start the iteration.
pub(crate) fn initial_fock(
    guess: Guess,
    core_hamiltonian: &DMatrix<f64>,
    overlap: &DMatrix<f64>,
) -> DMatrix<f64> {
    match guess {
        Guess::Core => core_hamiltonian.clone(),
        Guess::Gwh => symmetric_matrix(core_hamiltonian.nrows(), |i, j| {
            if i == j {
                core_hamiltonian[(i, i)]
            } else {
                0.5 * GWH_K * overlap[(i, j)] * (core_hamiltonian[(i, i)] + core_hamiltonian[(j, j)])
            }
        }),
    }
}

/// Reshapes densities from another calculation to `channels` channels: a total density is split
/// evenly between the spins, alpha and beta densities are summed into a total.
pub(crate) fn adapt_densities(
    densities: &[DMatrix<f64>],
    channels: usize,
    n_functions: usize,
) -> Result<Vec<DMatrix<f64>>> {
    if densities.iter().any(|d| d.shape() != (n_functions, n_functions)) {
        return Err(Error::InvalidInput(format!(
            "guess densities must be {n_functions}x{n_functions}"
        )));
    }

    match (densities, channels) {
        ([total], 1) => Ok(vec![total.clone()]),
        ([total], 2) => Ok(vec![total * 0.5, total * 0.5]),
        ([alpha, beta], 1) => Ok(vec![alpha + beta]),
        ([alpha, beta], 2) => Ok(vec![alpha.clone(), beta.clone()]),
        _ => Err(Error::InvalidInput(format!(
            "cannot use {} guess densities for {channels} spin channels",
            densities.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    use super::{adapt_densities, initial_fock};
    use crate::scf::Guess;

    #[test]
    fn gwh_off_diagonal() {
        let h = DMatrix::from_row_slice(2, 2, &[-1.0, -0.5, -0.5, -0.4]);
        let s = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);

        let fock = initial_fock(Guess::Gwh, &h, &s);
        assert_relative_eq!(fock[(0, 0)], -1.0);
        assert_relative_eq!(fock[(0, 1)], 0.875 * 0.5 * -1.4);
        assert_eq!(fock[(0, 1)], fock[(1, 0)]);
        assert_eq!(initial_fock(Guess::Core, &h, &s), h);
    }

    #[test]
    fn densities_change_channel_count() {
        let total = DMatrix::from_element(2, 2, 2.0);
        let split = adapt_densities(&[total.clone()], 2, 2).unwrap();
        assert_eq!(split, vec![DMatrix::from_element(2, 2, 1.0); 2]);

        let merged = adapt_densities(&split, 1, 2).unwrap();
        assert_eq!(merged, vec![total.clone()]);
        assert_eq!(adapt_densities(&[total.clone()], 1, 2).unwrap(), vec![total.clone()]);

        assert!(adapt_densities(&[total], 1, 3).is_err());
        assert!(adapt_densities(&[], 1, 2).is_err());
    }
}
