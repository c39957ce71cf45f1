use nalgebra::{DMatrix, DVector, SymmetricEigen};

#[inline(always)]
/// Create a symmetric, square matrix. `func` is only evaluated for the upper triangle.
pub(crate) fn symmetric_matrix(
    n: usize,
    mut func: impl FnMut(usize, usize) -> f64,
) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(n, n);
    for j in 0..n {
        for i in 0..=j {
            let value = func(i, j);
            matrix[(i, j)] = value;
            matrix[(j, i)] = value;
        }
    }
    matrix
}

/// Eigenpairs of a symmetric matrix in ascending eigenvalue order.
pub(crate) fn sorted_eigs(matrix: DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>) {
    let eigs = SymmetricEigen::new(matrix);

    let mut val_vec_pairs = eigs
        .eigenvalues
        .iter()
        .copied()
        .zip(eigs.eigenvectors.column_iter())
        .collect::<Vec<_>>();

    val_vec_pairs.sort_by(|(a, _), (b, _)| a.total_cmp(b));

    let (values, vectors): (Vec<_>, Vec<_>) = val_vec_pairs.into_iter().unzip();

    (
        DMatrix::from_columns(&vectors),
        DVector::from_column_slice(&values),
    )
}

/// f * C_occ C_occ^T for the first `occupied` columns of `coefficients`.
pub(crate) fn density_from_orbitals(
    coefficients: &DMatrix<f64>,
    occupied: usize,
    occupation: f64,
) -> DMatrix<f64> {
    let occupied = coefficients.columns(0, occupied);
    occupied * occupied.transpose() * occupation
}

/// Root mean square of all elements of a list of equally shaped matrices.
pub(crate) fn rms(matrices: &[DMatrix<f64>]) -> f64 {
    let count = matrices.iter().map(DMatrix::len).sum::<usize>();
    if count == 0 {
        return 0.0;
    }
    (matrices.iter().map(DMatrix::norm_squared).sum::<f64>() / count as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, DVector};

    use super::{density_from_orbitals, rms, sorted_eigs, symmetric_matrix};

    #[test]
    fn eigenpairs_are_sorted() {
        let matrix = symmetric_matrix(3, |i, j| if i == j { [3.0, -1.0, 2.0][i] } else { 0.1 });
        let (vectors, values) = sorted_eigs(matrix.clone());

        assert!(values[0] < values[1] && values[1] < values[2]);
        for k in 0..3 {
            let v = vectors.column(k);
            assert_relative_eq!(&matrix * v, v * values[k], epsilon = 1e-12);
        }
    }

    #[test]
    fn density_and_rms() {
        let coefficients = DMatrix::identity(3, 3);
        let density = density_from_orbitals(&coefficients, 2, 2.0);
        assert_eq!(density, DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 2.0, 0.0])));
        assert_relative_eq!(rms(&[density]), (8.0f64 / 9.0).sqrt());
        assert_eq!(rms(&[]), 0.0);
    }
}
