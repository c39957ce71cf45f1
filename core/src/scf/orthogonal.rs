use nalgebra::{DMatrix, DVector};

use super::utils::sorted_eigs;

/// X with X^T S X = 1, mapping the orthonormal orbital space back to atomic orbitals.
///
/// Symmetric (Löwdin) when every eigenvalue of S reaches the threshold. Otherwise canonical over
/// the eigenvectors that do, which removes the near-dependent combinations from the orbital space
/// once, before the first cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Orthogonalizer {
    transform: DMatrix<f64>,
    smallest_eigenvalue: f64,
    removed: usize,
}

impl Orthogonalizer {
    pub fn new(overlap: &DMatrix<f64>, threshold: f64) -> Self {
        let n = overlap.nrows();
        let (vectors, values) = sorted_eigs(overlap.clone());
        let smallest_eigenvalue = values.iter().copied().fold(f64::INFINITY, f64::min);

        let kept = values
            .iter()
            .enumerate()
            .filter(|&(_, &value)| value >= threshold)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        let removed = n - kept.len();

        let transform = if removed == 0 {
            let inverse_sqrt = DMatrix::from_diagonal(&values.map(|s| s.sqrt().recip()));
            &vectors * inverse_sqrt * vectors.transpose()
        } else {
            log::warn!(
                "basis is nearly linearly dependent (smallest overlap eigenvalue {smallest_eigenvalue:.3e}), \
                 projecting out {removed} of {n} functions"
            );
            let columns = kept
                .iter()
                .map(|&k| vectors.column(k) * values[k].sqrt().recip())
                .collect::<Vec<DVector<f64>>>();
            DMatrix::from_columns(&columns)
        };

        Self {
            transform,
            smallest_eigenvalue,
            removed,
        }
    }

    pub fn transform(&self) -> &DMatrix<f64> {
        &self.transform
    }

    /// Dimension of the orbital space.
    pub fn n_orbitals(&self) -> usize {
        self.transform.ncols()
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    pub fn smallest_eigenvalue(&self) -> f64 {
        self.smallest_eigenvalue
    }

    /// X^T A X
    pub fn to_orthogonal(&self, matrix: &DMatrix<f64>) -> DMatrix<f64> {
        self.transform.transpose() * matrix * &self.transform
    }
}
