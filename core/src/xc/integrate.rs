use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::basis::AoBasis;

use super::{GridBatch, MolecularGrid, XcFunctional, XcValues};

/// Integrated exchange-correlation contribution: energy, electron count (a grid quality check) and
/// one potential matrix per spin channel.
#[derive(Clone, Debug, PartialEq)]
pub struct XcMatrices {
    pub energy: f64,
    pub electrons: f64,
    pub potential: Vec<DMatrix<f64>>,
}

impl XcMatrices {
    pub fn zeros(n_functions: usize, channels: usize) -> Self {
        Self {
            energy: 0.0,
            electrons: 0.0,
            potential: vec![DMatrix::zeros(n_functions, n_functions); channels],
        }
    }
}

/// Basis function values on the batch points, one row per point, and their derivatives along x,
/// y and z when `with_gradient` is set.
fn basis_values(
    batch: &GridBatch,
    basis: &AoBasis,
    with_gradient: bool,
) -> (DMatrix<f64>, Option<[DMatrix<f64>; 3]>) {
    let n = basis.n_functions();
    let mut values = DMatrix::zeros(batch.len(), n);
    let mut row = vec![0.0; n];
    if !with_gradient {
        for (g, point) in batch.points.iter().enumerate() {
            basis.evaluate(point, &mut row);
            for (mu, &value) in row.iter().enumerate() {
                values[(g, mu)] = value;
            }
        }
        return (values, None);
    }

    let mut derivatives = [0, 1, 2].map(|_| DMatrix::zeros(batch.len(), n));
    let mut row_gradient = vec![Vector3::zeros(); n];
    for (g, point) in batch.points.iter().enumerate() {
        basis.evaluate_with_gradient(point, &mut row, &mut row_gradient);
        for mu in 0..n {
            values[(g, mu)] = row[mu];
            for axis in 0..3 {
                derivatives[axis][(g, mu)] = row_gradient[mu][axis];
            }
        }
    }
    (values, Some(derivatives))
}

/// Spin densities at the batch points and, given basis derivatives, their gradients
/// ∇ρ_σ = 2 sum_μν P^σ_μν φ_ν ∇φ_μ. One density matrix means a closed shell total density, split
/// evenly between the spins; two are the alpha and beta densities.
struct PointDensities {
    rho: Vec<[f64; 2]>,
    gradient: Option<Vec<[Vector3<f64>; 2]>>,
}

impl PointDensities {
    fn new(
        values: &DMatrix<f64>,
        derivatives: Option<&[DMatrix<f64>; 3]>,
        densities: &[DMatrix<f64>],
    ) -> Self {
        let points = values.nrows();
        let channel = |density: &DMatrix<f64>| {
            let contracted = values * density;
            let rho = (0..points)
                .map(|g| contracted.row(g).dot(&values.row(g)))
                .collect::<Vec<_>>();
            let gradient = derivatives.map(|derivatives| {
                (0..points)
                    .map(|g| {
                        Vector3::from_fn(|axis, _| {
                            2.0 * contracted.row(g).dot(&derivatives[axis].row(g))
                        })
                    })
                    .collect::<Vec<_>>()
            });
            (rho, gradient)
        };

        let channels = densities.iter().map(channel).collect::<Vec<_>>();
        match channels.as_slice() {
            [(total, gradient)] => Self {
                rho: total.iter().map(|&rho| [0.5 * rho, 0.5 * rho]).collect(),
                gradient: gradient
                    .as_ref()
                    .map(|gradient| gradient.iter().map(|&g| [0.5 * g, 0.5 * g]).collect()),
            },
            [(alpha, alpha_gradient), (beta, beta_gradient), ..] => Self {
                rho: alpha.iter().zip(beta).map(|(&a, &b)| [a, b]).collect(),
                gradient: alpha_gradient.as_ref().zip(beta_gradient.as_ref()).map(|(a, b)| {
                    a.iter().zip(b).map(|(&a, &b)| [a, b]).collect()
                }),
            },
            [] => Self {
                rho: vec![[0.0; 2]; points],
                gradient: derivatives.map(|_| vec![[Vector3::zeros(); 2]; points]),
            },
        }
    }

    /// [∇ρ_α·∇ρ_α, ∇ρ_α·∇ρ_β, ∇ρ_β·∇ρ_β] per point.
    fn sigma(&self) -> Option<Vec<[f64; 3]>> {
        self.gradient.as_ref().map(|gradient| {
            gradient
                .iter()
                .map(|[a, b]| [a.dot(a), a.dot(b), b.dot(b)])
                .collect()
        })
    }

    /// w (2 dE/dσ_σσ ∇ρ_σ + dE/dσ_αβ ∇ρ_σ') per point, which the potential of channel `spin`
    /// contracts with ∇(φ_μ φ_ν).
    fn gradient_weights(&self, weights: &[f64], xc: &XcValues, spin: usize) -> Vec<Vector3<f64>> {
        let Some(gradient) = &self.gradient else {
            return vec![Vector3::zeros(); weights.len()];
        };
        weights
            .iter()
            .zip(gradient)
            .zip(&xc.sigma_potential)
            .map(|((&weight, gradient), v)| {
                weight * (2.0 * v[2 * spin] * gradient[spin] + v[1] * gradient[1 - spin])
            })
            .collect()
    }
}

/// Σ_a t_g[a] ∂_a φ_μ(g) for every point g and function μ.
fn along(derivatives: &[DMatrix<f64>; 3], directions: &[Vector3<f64>]) -> DMatrix<f64> {
    let mut projected = DMatrix::zeros(derivatives[0].nrows(), derivatives[0].ncols());
    for (axis, derivative) in derivatives.iter().enumerate() {
        for (g, mut row) in projected.row_iter_mut().enumerate() {
            row += derivative.row(g) * directions[g][axis];
        }
    }
    projected
}

/// Adds the contribution of one batch: E_xc = sum_g w_g e(ρ_g, σ_g) and
/// V^σ_μν = sum_g w_g v_σ φ_μ φ_ν plus, for gradient dependent functionals, t_σ·∇(φ_μ φ_ν).
pub(crate) fn integrate_batch(
    batch: &GridBatch,
    basis: &AoBasis,
    densities: &[DMatrix<f64>],
    functional: &dyn XcFunctional,
    output: &mut XcMatrices,
) {
    let (values, derivatives) = basis_values(batch, basis, functional.needs_gradient());
    let density = PointDensities::new(&values, derivatives.as_ref(), densities);
    let sigma = density.sigma();

    let mut xc = XcValues::zeros(batch.len());
    functional.evaluate(&density.rho, sigma.as_deref(), &mut xc);

    for ((weight, energy), rho) in batch.weights.iter().zip(&xc.energy).zip(&density.rho) {
        output.energy += weight * energy;
        output.electrons += weight * (rho[0] + rho[1]);
    }

    for (spin, potential) in output.potential.iter_mut().enumerate() {
        let mut weighted = values.clone();
        for (g, mut row) in weighted.row_iter_mut().enumerate() {
            row *= batch.weights[g] * xc.potential[g][spin];
        }
        *potential += values.transpose() * weighted;

        if let Some(derivatives) = &derivatives {
            let directions = density.gradient_weights(&batch.weights, &xc, spin);
            let cross = values.transpose() * along(derivatives, &directions);
            *potential += &cross + cross.transpose();
        }
    }
}

/// Adds the exchange-correlation force contribution of one batch to `gradient`:
/// dE_xc/dA = -2 sum_σ sum_(μ on A) sum_ν P^σ_μν ∫ v_σ ∇φ_μ φ_ν, plus for gradient dependent
/// functionals ∫ (∇∇φ_μ · t_σ) φ_ν + ∇φ_μ (t_σ · ∇φ_ν).
///
/// The dependence of the Becke weights on the nuclear positions is not included.
pub(crate) fn xc_gradient_batch(
    batch: &GridBatch,
    basis: &AoBasis,
    densities: &[DMatrix<f64>],
    functional: &dyn XcFunctional,
    function_atoms: &[usize],
    gradient: &mut [Vector3<f64>],
) {
    let n = basis.n_functions();
    let points = batch.len();
    let needs_gradient = functional.needs_gradient();
    let mut values = DMatrix::zeros(points, n);
    let mut derivatives = [0, 1, 2].map(|_| DMatrix::<f64>::zeros(points, n));
    // second[3 a + b] holds ∂_a ∂_b φ
    let mut second = needs_gradient.then(|| vec![DMatrix::<f64>::zeros(points, n); 9]);

    let mut row = vec![0.0; n];
    let mut row_gradient = vec![Vector3::zeros(); n];
    let mut row_hessian = vec![Matrix3::zeros(); n];
    for (g, point) in batch.points.iter().enumerate() {
        match &mut second {
            Some(second) => {
                basis.evaluate_with_hessian(point, &mut row, &mut row_gradient, &mut row_hessian);
                for (mu, hessian) in row_hessian.iter().enumerate() {
                    for (index, &value) in hessian.transpose().iter().enumerate() {
                        second[index][(g, mu)] = value;
                    }
                }
            }
            None => basis.evaluate_with_gradient(point, &mut row, &mut row_gradient),
        }
        for mu in 0..n {
            values[(g, mu)] = row[mu];
            for axis in 0..3 {
                derivatives[axis][(g, mu)] = row_gradient[mu][axis];
            }
        }
    }

    let density = PointDensities::new(&values, needs_gradient.then_some(&derivatives), densities);
    let sigma = density.sigma();
    let mut xc = XcValues::zeros(points);
    functional.evaluate(&density.rho, sigma.as_deref(), &mut xc);

    for (spin, channel_density) in densities.iter().enumerate() {
        // P φ for every point
        let contracted = &values * channel_density;
        let mut paired = contracted.clone();
        for (g, mut row) in paired.row_iter_mut().enumerate() {
            row *= batch.weights[g] * xc.potential[g][spin];
        }
        let directions = second
            .as_ref()
            .map(|_| density.gradient_weights(&batch.weights, &xc, spin));
        if let Some(directions) = &directions {
            paired += along(&derivatives, directions) * channel_density;
        }

        for (axis, derivative) in derivatives.iter().enumerate() {
            for mu in 0..n {
                let mut term = derivative.column(mu).dot(&paired.column(mu));
                if let (Some(second), Some(directions)) = (&second, &directions) {
                    term += (0..points)
                        .map(|g| {
                            let curvature = (0..3)
                                .map(|b| directions[g][b] * second[3 * axis + b][(g, mu)])
                                .sum::<f64>();
                            curvature * contracted[(g, mu)]
                        })
                        .sum::<f64>();
                }
                gradient[function_atoms[mu]][axis] -= 2.0 * term;
            }
        }
    }
}

/// Exchange-correlation energy and potential over a whole grid.
pub fn integrate(
    grid: &MolecularGrid,
    basis: &AoBasis,
    densities: &[DMatrix<f64>],
    functional: &dyn XcFunctional,
) -> XcMatrices {
    let mut output = XcMatrices::zeros(basis.n_functions(), densities.len());
    for batch in grid.batches() {
        integrate_batch(batch, basis, densities, functional, &mut output);
    }
    output
}

/// Exchange-correlation contribution to the nuclear gradient over a whole grid.
pub fn xc_gradient(
    grid: &MolecularGrid,
    basis: &AoBasis,
    densities: &[DMatrix<f64>],
    functional: &dyn XcFunctional,
    n_atoms: usize,
) -> Vec<Vector3<f64>> {
    let function_atoms = basis.function_atoms();
    let mut gradient = vec![Vector3::zeros(); n_atoms];
    for batch in grid.batches() {
        xc_gradient_batch(batch, basis, densities, functional, &function_atoms, &mut gradient);
    }
    gradient
}
