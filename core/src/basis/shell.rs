use nalgebra::{Matrix3, Vector3};
use smallvec::SmallVec;

use crate::{
    error::{Error, Result},
    molecule::Molecule,
};

use super::{
    functions::{cartesian_components, component_norm, monomial, radial_norm, same_center_overlap},
    BasisSet, ElectronShell,
};

/// A contracted shell placed on an atom. All cartesian components of the shell share the
/// exponents and contraction coefficients; the coefficients already include the radial
/// normalization of each primitive and the renormalization of the contraction.
#[derive(Clone, Debug, PartialEq)]
pub struct Shell {
    pub(crate) angular: u32,
    pub(crate) exponents: SmallVec<[f64; 6]>,
    pub(crate) coefficients: SmallVec<[f64; 6]>,
    pub(crate) components: SmallVec<[[i32; 3]; 10]>,
    pub(crate) component_norms: SmallVec<[f64; 10]>,
    pub(crate) center: Vector3<f64>,
    /// index of the owning atom in the molecule
    pub(crate) atom: usize,
    /// index of the first basis function of this shell
    pub(crate) offset: usize,
}

impl Shell {
    pub(crate) fn new(shell: &ElectronShell, center: Vector3<f64>, atom: usize, offset: usize) -> Self {
        let angular = shell.angular_magnitude;

        let mut coefficients = shell
            .exponents
            .iter()
            .zip(&shell.coefficients)
            .map(|(&exponent, &coefficient)| coefficient * radial_norm(exponent, angular))
            .collect::<SmallVec<[f64; 6]>>();

        // renormalize the contraction using the (l, 0, 0) component
        let component = component_norm([angular as i32, 0, 0]);
        let mut self_overlap = 0.0;
        for (&a, &ca) in shell.exponents.iter().zip(&coefficients) {
            for (&b, &cb) in shell.exponents.iter().zip(&coefficients) {
                self_overlap += ca * cb * component * component * same_center_overlap(a, b, angular);
            }
        }
        if self_overlap > 0.0 {
            let scale = self_overlap.sqrt().recip();
            coefficients.iter_mut().for_each(|c| *c *= scale);
        }

        let components = cartesian_components(angular)
            .into_iter()
            .collect::<SmallVec<[[i32; 3]; 10]>>();
        let component_norms = components.iter().map(|&c| component_norm(c)).collect();

        Self {
            angular,
            exponents: shell.exponents.clone(),
            coefficients,
            components,
            component_norms,
            center,
            atom,
            offset,
        }
    }

    pub fn angular(&self) -> u32 {
        self.angular
    }

    pub fn n_functions(&self) -> usize {
        self.components.len()
    }

    pub fn n_primitives(&self) -> usize {
        self.exponents.len()
    }

    pub fn center(&self) -> &Vector3<f64> {
        &self.center
    }

    pub fn atom(&self) -> usize {
        self.atom
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Range of basis function indices covered by this shell.
    pub fn functions(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.n_functions()
    }

    /// Smallest exponent, which decides how far the shell reaches.
    pub(crate) fn min_exponent(&self) -> f64 {
        self.exponents.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Evaluate every component of this shell at `point`, writing into `values`.
    pub(crate) fn evaluate(&self, point: &Vector3<f64>, values: &mut [f64]) {
        let r = point - self.center;
        let r2 = r.norm_squared();

        let radial = self
            .exponents
            .iter()
            .zip(&self.coefficients)
            .map(|(&alpha, &c)| c * (-alpha * r2).exp())
            .sum::<f64>();

        for ((value, &[i, j, k]), &norm) in values
            .iter_mut()
            .zip(&self.components)
            .zip(&self.component_norms)
        {
            *value = norm * radial * monomial(r.x, i) * monomial(r.y, j) * monomial(r.z, k);
        }
    }

    /// Evaluate every component and its gradient with respect to the electron coordinate.
    pub(crate) fn evaluate_with_gradient(
        &self,
        point: &Vector3<f64>,
        values: &mut [f64],
        gradients: &mut [Vector3<f64>],
    ) {
        let r = point - self.center;
        let r2 = r.norm_squared();

        let mut radial = 0.0;
        // derivative of the radial part divided by r_x (resp. r_y, r_z)
        let mut radial_derivative = 0.0;
        for (&alpha, &c) in self.exponents.iter().zip(&self.coefficients) {
            let term = c * (-alpha * r2).exp();
            radial += term;
            radial_derivative -= 2.0 * alpha * term;
        }

        for (n, (&[i, j, k], &norm)) in self.components.iter().zip(&self.component_norms).enumerate()
        {
            let (x, y, z) = (monomial(r.x, i), monomial(r.y, j), monomial(r.z, k));
            let angular = x * y * z;

            values[n] = norm * radial * angular;
            gradients[n] = norm
                * Vector3::new(
                    i as f64 * monomial(r.x, i - 1) * y * z * radial
                        + angular * r.x * radial_derivative,
                    j as f64 * x * monomial(r.y, j - 1) * z * radial
                        + angular * r.y * radial_derivative,
                    k as f64 * x * y * monomial(r.z, k - 1) * radial
                        + angular * r.z * radial_derivative,
                );
        }
    }

    /// Values, gradients and second derivatives of every component. The primitive
    /// x^i y^j z^k exp(-a r^2) factorizes per axis, so each derivative is a product of three
    /// one-dimensional factors.
    pub(crate) fn evaluate_with_hessian(
        &self,
        point: &Vector3<f64>,
        values: &mut [f64],
        gradients: &mut [Vector3<f64>],
        hessians: &mut [Matrix3<f64>],
    ) {
        let r = point - self.center;
        let r2 = r.norm_squared();
        values.iter_mut().for_each(|v| *v = 0.0);
        gradients.iter_mut().for_each(|g| *g = Vector3::zeros());
        hessians.iter_mut().for_each(|h| *h = Matrix3::zeros());

        for (&alpha, &c) in self.exponents.iter().zip(&self.coefficients) {
            let radial = c * (-alpha * r2).exp();
            for (n, (&powers, &norm)) in self.components.iter().zip(&self.component_norms).enumerate()
            {
                // factors[axis][order] is the order-th derivative along axis
                let factors = [0, 1, 2].map(|axis| axis_factors(r[axis], powers[axis], alpha));
                let scale = norm * radial;

                values[n] += scale * factors[0][0] * factors[1][0] * factors[2][0];
                for a in 0..3 {
                    let mut orders = [0; 3];
                    orders[a] += 1;
                    gradients[n][a] += scale * product(&factors, orders);
                    for b in 0..3 {
                        let mut orders = orders;
                        orders[b] += 1;
                        hessians[n][(a, b)] += scale * product(&factors, orders);
                    }
                }
            }
        }
    }
}

/// x^p and its first two derivatives after dividing out exp(-a x^2).
fn axis_factors(x: f64, power: i32, alpha: f64) -> [f64; 3] {
    let p = f64::from(power);
    [
        monomial(x, power),
        p * monomial(x, power - 1) - 2.0 * alpha * monomial(x, power + 1),
        p * (p - 1.0) * monomial(x, power - 2) - 2.0 * alpha * (2.0 * p + 1.0) * monomial(x, power)
            + 4.0 * alpha * alpha * monomial(x, power + 2),
    ]
}

fn product(factors: &[[f64; 3]; 3], orders: [usize; 3]) -> f64 {
    factors[0][orders[0]] * factors[1][orders[1]] * factors[2][orders[2]]
}

/// The full atomic-orbital basis of one molecular geometry: every shell of the basis set placed on
/// its atom, with contiguous function offsets.
///
/// Rebuilt for every geometry so that each shell center equals its atom's position.
#[derive(Clone, Debug)]
pub struct AoBasis {
    shells: Vec<Shell>,
    n_functions: usize,
}

impl AoBasis {
    pub fn new(molecule: &Molecule, basis_set: &BasisSet) -> Result<Self> {
        let mut shells = Vec::new();
        let mut offset = 0;

        for (index, atom) in molecule.atoms().iter().enumerate() {
            let atomic_basis = basis_set
                .for_atom(atom)
                .ok_or(Error::MissingBasis(atom.element_type))?;

            for electron_shell in &atomic_basis.shells {
                let shell = Shell::new(electron_shell, atom.position, index, offset);
                offset += shell.n_functions();
                shells.push(shell);
            }
        }

        log::debug!(
            "placed {} shells ({offset} functions) on {} atoms",
            shells.len(),
            molecule.n_atoms()
        );

        Ok(Self {
            shells,
            n_functions: offset,
        })
    }

    pub fn shells(&self) -> &[Shell] {
        &self.shells
    }

    pub fn n_shells(&self) -> usize {
        self.shells.len()
    }

    pub fn n_functions(&self) -> usize {
        self.n_functions
    }

    pub fn max_angular(&self) -> u32 {
        self.shells.iter().map(|shell| shell.angular).max().unwrap_or(0)
    }

    /// Owning atom of every basis function.
    pub fn function_atoms(&self) -> Vec<usize> {
        self.shells
            .iter()
            .flat_map(|shell| std::iter::repeat(shell.atom).take(shell.n_functions()))
            .collect()
    }

    /// Evaluate all basis functions at `point`.
    pub fn evaluate(&self, point: &Vector3<f64>, values: &mut [f64]) {
        for shell in &self.shells {
            shell.evaluate(point, &mut values[shell.functions()]);
        }
    }

    /// Evaluate all basis functions and their gradients at `point`.
    pub fn evaluate_with_gradient(
        &self,
        point: &Vector3<f64>,
        values: &mut [f64],
        gradients: &mut [Vector3<f64>],
    ) {
        for shell in &self.shells {
            let range = shell.functions();
            shell.evaluate_with_gradient(point, &mut values[range.clone()], &mut gradients[range]);
        }
    }

    /// Evaluate all basis functions with their gradients and second derivatives at `point`.
    pub fn evaluate_with_hessian(
        &self,
        point: &Vector3<f64>,
        values: &mut [f64],
        gradients: &mut [Vector3<f64>],
        hessians: &mut [Matrix3<f64>],
    ) {
        for shell in &self.shells {
            let range = shell.functions();
            shell.evaluate_with_hessian(
                point,
                &mut values[range.clone()],
                &mut gradients[range.clone()],
                &mut hessians[range],
            );
        }
    }
}
