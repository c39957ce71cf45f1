//! Hermite Gaussian machinery of the McMurchie-Davidson scheme.
//! Reference:
//!
//! [1] Helgaker, Jørgensen, Olsen. Molecular Electronic-Structure Theory, ch. 9.
//! [2] Goings, J. Integrals. https://joshuagoings.com/2017/04/28/integrals/
use nalgebra::Vector3;

use super::boys::boys;

/// Expansion coefficients E^{ij}_t of the product of two one-dimensional cartesian Gaussians
/// x_A^i exp(-a x_A^2) * x_B^j exp(-b x_B^2) in Hermite Gaussians Λ_t centered on the product
/// center, for all i <= imax, j <= jmax.
#[derive(Clone, Debug, Default)]
pub(crate) struct HermiteTable {
    imax: usize,
    jmax: usize,
    tdim: usize,
    data: Vec<f64>,
}

impl HermiteTable {
    pub(crate) fn new(imax: usize, jmax: usize, a: f64, b: f64, x_ab: f64) -> Self {
        let mut table = Self::default();
        table.fill(imax, jmax, a, b, x_ab);
        table
    }

    #[inline(always)]
    fn index(&self, i: usize, j: usize, t: usize) -> usize {
        (i * (self.jmax + 1) + j) * self.tdim + t
    }

    /// E^{ij}_t, zero outside of 0 <= t <= i + j and for negative i or j.
    #[inline(always)]
    pub(crate) fn get(&self, i: i32, j: i32, t: i32) -> f64 {
        if i < 0 || j < 0 || t < 0 || t > i + j {
            return 0.0;
        }
        let (i, j, t) = (i as usize, j as usize, t as usize);
        debug_assert!(i <= self.imax && j <= self.jmax);
        self.data[self.index(i, j, t)]
    }

    /// (Re)computes the table for exponents `a`, `b` and center separation `x_ab` = A - B.
    pub(crate) fn fill(&mut self, imax: usize, jmax: usize, a: f64, b: f64, x_ab: f64) {
        self.imax = imax;
        self.jmax = jmax;
        self.tdim = imax + jmax + 1;
        self.data.clear();
        self.data.resize((imax + 1) * (jmax + 1) * self.tdim, 0.0);

        let p = a + b;
        let one_over_2p = 0.5 / p;
        let x_pa = -b / p * x_ab;
        let x_pb = a / p * x_ab;

        let first = self.index(0, 0, 0);
        self.data[first] = (-a * b / p * x_ab * x_ab).exp();

        for i in 0..=imax {
            for j in 0..=jmax {
                if i == 0 && j == 0 {
                    continue;
                }

                // raise j when possible, otherwise i
                let (pi, pj, shift) = if j > 0 { (i, j - 1, x_pb) } else { (i - 1, j, x_pa) };
                let previous_max = pi + pj;

                for t in 0..=i + j {
                    let mut value = 0.0;
                    if t > 0 && t - 1 <= previous_max {
                        value += one_over_2p * self.data[self.index(pi, pj, t - 1)];
                    }
                    if t <= previous_max {
                        value += shift * self.data[self.index(pi, pj, t)];
                    }
                    if t + 1 <= previous_max {
                        value += (t + 1) as f64 * self.data[self.index(pi, pj, t + 1)];
                    }
                    let index = self.index(i, j, t);
                    self.data[index] = value;
                }
            }
        }
    }
}

/// Which center a one-dimensional factor is differentiated with respect to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Center {
    A,
    B,
}

/// Hermite expansion of one cartesian factor, optionally differentiated with respect to one of the
/// two centers. Returns the number of coefficients written to `out`.
///
/// d/dA_x [x_A^i exp(-a x_A^2)] = 2a x_A^(i+1) exp(..) - i x_A^(i-1) exp(..)
#[inline(always)]
pub(crate) fn expansion_1d(
    table: &HermiteTable,
    i: i32,
    j: i32,
    derivative: Option<(Center, f64)>,
    out: &mut [f64],
) -> usize {
    match derivative {
        None => {
            let len = (i + j + 1) as usize;
            for (t, value) in out[..len].iter_mut().enumerate() {
                *value = table.get(i, j, t as i32);
            }
            len
        }
        Some((Center::A, exponent)) => {
            let len = (i + j + 2) as usize;
            for (t, value) in out[..len].iter_mut().enumerate() {
                let t = t as i32;
                *value = 2.0 * exponent * table.get(i + 1, j, t) - i as f64 * table.get(i - 1, j, t);
            }
            len
        }
        Some((Center::B, exponent)) => {
            let len = (i + j + 2) as usize;
            for (t, value) in out[..len].iter_mut().enumerate() {
                let t = t as i32;
                *value = 2.0 * exponent * table.get(i, j + 1, t) - j as f64 * table.get(i, j - 1, t);
            }
            len
        }
    }
}

/// Hermite Coulomb integrals R_tuv(alpha, PC) for all t + u + v <= L.
#[derive(Clone, Debug, Default)]
pub(crate) struct CoulombTable {
    dim: usize,
    current: Vec<f64>,
    result: Vec<f64>,
    boys: Vec<f64>,
}

impl CoulombTable {
    #[inline(always)]
    fn index(dim: usize, t: usize, u: usize, v: usize) -> usize {
        (t * dim + u) * dim + v
    }

    #[inline(always)]
    pub(crate) fn get(&self, t: usize, u: usize, v: usize) -> f64 {
        self.result[Self::index(self.dim, t, u, v)]
    }

    /// Computes R_tuv = R^0_tuv for t + u + v <= `l` with the downward recursion over the
    /// auxiliary index n:
    ///
    /// R^n_000 = (-2 alpha)^n F_n(alpha |PC|^2)
    /// R^n_(t+1)uv = t R^(n+1)_(t-1)uv + X_PC R^(n+1)_tuv
    pub(crate) fn fill(&mut self, l: usize, alpha: f64, pc: &Vector3<f64>) {
        let dim = l + 1;
        self.dim = dim;
        for buffer in [&mut self.current, &mut self.result] {
            buffer.clear();
            buffer.resize(dim * dim * dim, 0.0);
        }
        self.boys.resize(dim, 0.0);

        boys(l, alpha * pc.norm_squared(), &mut self.boys);

        let factor = -2.0 * alpha;
        // level n = l lives in `result`, each lower level is built in `current` then swapped
        self.result[0] = factor.powi(l as i32) * self.boys[l];

        for n in (0..l).rev() {
            let previous = &self.result;
            let current = &mut self.current;

            current[0] = factor.powi(n as i32) * self.boys[n];

            for total in 1..=l - n {
                for t in 0..=total {
                    for u in 0..=total - t {
                        let v = total - t - u;

                        let value = if t > 0 {
                            let mut value = pc.x * previous[Self::index(dim, t - 1, u, v)];
                            if t > 1 {
                                value += (t - 1) as f64 * previous[Self::index(dim, t - 2, u, v)];
                            }
                            value
                        } else if u > 0 {
                            let mut value = pc.y * previous[Self::index(dim, t, u - 1, v)];
                            if u > 1 {
                                value += (u - 1) as f64 * previous[Self::index(dim, t, u - 2, v)];
                            }
                            value
                        } else {
                            let mut value = pc.z * previous[Self::index(dim, t, u, v - 1)];
                            if v > 1 {
                                value += (v - 1) as f64 * previous[Self::index(dim, t, u, v - 2)];
                            }
                            value
                        };

                        current[Self::index(dim, t, u, v)] = value;
                    }
                }
            }

            std::mem::swap(&mut self.current, &mut self.result);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use super::{CoulombTable, HermiteTable};

    #[test]
    fn overlap_of_s_functions() {
        // E^{00}_0 is the gaussian product prefactor
        let table = HermiteTable::new(2, 2, 1.0, 0.5, 0.7);
        assert_relative_eq!(table.get(0, 0, 0), (-0.5 / 1.5 * 0.49f64).exp(), epsilon = 1e-15);
        assert_eq!(table.get(0, 0, 1), 0.0);
        assert_eq!(table.get(-1, 0, 0), 0.0);
    }

    #[test]
    fn one_dimensional_moments() {
        // integral of x_A^i x_B^j exp(-a x_A^2 - b x_B^2) equals E^{ij}_0 sqrt(pi/p)
        let (a, b, ax, bx) = (0.8, 1.3, 0.2, -0.45);
        let table = HermiteTable::new(3, 3, a, b, ax - bx);
        let p: f64 = a + b;

        let steps = 40_000;
        let (lo, hi) = (-12.0, 12.0);
        let h = (hi - lo) / steps as f64;

        for i in 0..=3 {
            for j in 0..=3 {
                let mut integral = 0.0;
                for k in 0..=steps {
                    let x = lo + k as f64 * h;
                    let weight = if k == 0 || k == steps { 0.5 } else { 1.0 };
                    integral += weight
                        * (x - ax).powi(i)
                        * (x - bx).powi(j)
                        * (-a * (x - ax).powi(2) - b * (x - bx).powi(2)).exp();
                }
                integral *= h;

                let expected = table.get(i, j, 0) * (std::f64::consts::PI / p).sqrt();
                assert_relative_eq!(integral, expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn coulomb_table_derivatives() {
        // R_100 is the derivative of R_000 with respect to the x component of PC
        let alpha = 0.9;
        let pc = Vector3::new(0.3, -0.2, 0.5);
        let h = 1e-5;

        let mut table = CoulombTable::default();
        table.fill(3, alpha, &pc);

        let r000 = |shift: Vector3<f64>| {
            let mut table = CoulombTable::default();
            table.fill(0, alpha, &(pc + shift));
            table.get(0, 0, 0)
        };

        let numeric_x = (r000(Vector3::new(h, 0.0, 0.0)) - r000(Vector3::new(-h, 0.0, 0.0))) / (2.0 * h);
        let numeric_z = (r000(Vector3::new(0.0, 0.0, h)) - r000(Vector3::new(0.0, 0.0, -h))) / (2.0 * h);

        assert_relative_eq!(table.get(1, 0, 0), numeric_x, epsilon = 1e-8);
        assert_relative_eq!(table.get(0, 0, 1), numeric_z, epsilon = 1e-8);

        let r100 = |shift: Vector3<f64>| {
            let mut table = CoulombTable::default();
            table.fill(1, alpha, &(pc + shift));
            table.get(1, 0, 0)
        };
        let numeric_xy = (r100(Vector3::new(0.0, h, 0.0)) - r100(Vector3::new(0.0, -h, 0.0))) / (2.0 * h);
        assert_relative_eq!(table.get(1, 1, 0), numeric_xy, epsilon = 1e-8);
    }
}
