//! Local (spin) density approximation functionals.
use std::f64::consts::PI;

use super::{XcFunctional, XcValues};

/// Below this density a point contributes nothing.
const DENSITY_CUTOFF: f64 = 1e-14;

/// Slater (Dirac) exchange, spin resolved:
/// e_x = -3/2 (3 / 4pi)^(1/3) sum_σ ρ_σ^(4/3)
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SlaterExchange {
    pub scale: f64,
}

impl XcFunctional for SlaterExchange {
    fn evaluate(&self, density: &[[f64; 2]], _sigma: Option<&[[f64; 3]]>, values: &mut XcValues) {
        let energy_factor = -1.5 * (3.0 / (4.0 * PI)).cbrt() * self.scale;
        let potential_factor = -(6.0 / PI).cbrt() * self.scale;

        for (point, rho) in density.iter().enumerate() {
            for spin in 0..2 {
                let rho = rho[spin];
                if rho < DENSITY_CUTOFF {
                    continue;
                }
                let cbrt = rho.cbrt();
                values.energy[point] += energy_factor * rho * cbrt;
                values.potential[point][spin] += potential_factor * cbrt;
            }
        }
    }
}

/// One VWN fit: A, x0, b, c.
struct VwnParameters {
    a: f64,
    x0: f64,
    b: f64,
    c: f64,
}

const PARAMAGNETIC: VwnParameters = VwnParameters {
    a: 0.0310907,
    x0: -0.10498,
    b: 3.72744,
    c: 12.9352,
};

const FERROMAGNETIC: VwnParameters = VwnParameters {
    a: 0.01554535,
    x0: -0.32500,
    b: 7.06042,
    c: 18.0578,
};

const SPIN_STIFFNESS: VwnParameters = VwnParameters {
    a: -1.0 / (6.0 * PI * PI),
    x0: -0.0047584,
    b: 1.13107,
    c: 13.0045,
};

/// f''(0) of the spin interpolation function.
const F_SECOND_DERIVATIVE: f64 = 1.709921;

impl VwnParameters {
    /// The fitted function and its derivative with respect to x = sqrt(r_s).
    fn evaluate(&self, x: f64) -> (f64, f64) {
        let &Self { a, x0, b, c } = self;
        let polynomial = |y: f64| y * y + b * y + c;

        let q = (4.0 * c - b * b).sqrt();
        let xx = polynomial(x);
        let xx0 = polynomial(x0);
        let arctan = (q / (2.0 * x + b)).atan();
        let shift = b * x0 / xx0;

        let value = a
            * ((x * x / xx).ln() + 2.0 * b / q * arctan
                - shift * (((x - x0) * (x - x0) / xx).ln() + 2.0 * (b + 2.0 * x0) / q * arctan));

        let denominator = q * q + (2.0 * x + b).powi(2);
        let derivative = a
            * (2.0 / x - (2.0 * x + b) / xx - 4.0 * b / denominator
                - shift * (2.0 / (x - x0) - (2.0 * x + b) / xx - 4.0 * (b + 2.0 * x0) / denominator));

        (value, derivative)
    }
}

/// Vosko-Wilk-Nusair correlation, parametrization 5, with the spin interpolation of the original
/// paper.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vwn5Correlation {
    pub scale: f64,
}

impl Vwn5Correlation {
    /// ε_c per electron and its partial derivatives with respect to r_s and ζ.
    pub(crate) fn epsilon(rs: f64, zeta: f64) -> (f64, f64, f64) {
        let x = rs.sqrt();
        let (paramagnetic, d_paramagnetic) = PARAMAGNETIC.evaluate(x);
        let (ferromagnetic, d_ferromagnetic) = FERROMAGNETIC.evaluate(x);
        let (stiffness, d_stiffness) = SPIN_STIFFNESS.evaluate(x);

        let norm = 2f64.powf(4.0 / 3.0) - 2.0;
        let (plus, minus) = (1.0 + zeta, 1.0 - zeta);
        let f = (plus.powf(4.0 / 3.0) + minus.powf(4.0 / 3.0) - 2.0) / norm;
        let df = 4.0 / 3.0 * (plus.cbrt() - minus.cbrt()) / norm;

        let zeta3 = zeta.powi(3);
        let zeta4 = zeta3 * zeta;
        let difference = ferromagnetic - paramagnetic;

        let epsilon = paramagnetic
            + stiffness * f / F_SECOND_DERIVATIVE * (1.0 - zeta4)
            + difference * f * zeta4;

        // d/dx -> d/dr_s
        let to_rs = 0.5 / x;
        let d_rs = to_rs
            * (d_paramagnetic
                + d_stiffness * f / F_SECOND_DERIVATIVE * (1.0 - zeta4)
                + (d_ferromagnetic - d_paramagnetic) * f * zeta4);

        let d_zeta = stiffness / F_SECOND_DERIVATIVE * (df * (1.0 - zeta4) - 4.0 * zeta3 * f)
            + difference * (df * zeta4 + 4.0 * zeta3 * f);

        (epsilon, d_rs, d_zeta)
    }
}

impl XcFunctional for Vwn5Correlation {
    fn evaluate(&self, density: &[[f64; 2]], _sigma: Option<&[[f64; 3]]>, values: &mut XcValues) {
        for (point, &[alpha, beta]) in density.iter().enumerate() {
            let alpha = alpha.max(0.0);
            let beta = beta.max(0.0);
            let rho = alpha + beta;
            if rho < DENSITY_CUTOFF {
                continue;
            }

            let rs = (3.0 / (4.0 * PI * rho)).cbrt();
            let zeta = ((alpha - beta) / rho).clamp(-1.0, 1.0);
            let (epsilon, d_rs, d_zeta) = Self::epsilon(rs, zeta);

            let common = epsilon - rs / 3.0 * d_rs;
            values.energy[point] += self.scale * rho * epsilon;
            values.potential[point][0] += self.scale * (common + (1.0 - zeta) * d_zeta);
            values.potential[point][1] += self.scale * (common - (1.0 + zeta) * d_zeta);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{SlaterExchange, Vwn5Correlation};
    use crate::xc::{XcFunctional, XcValues};

    #[test]
    fn vwn_reference_values() {
        // uniform electron gas correlation energies per electron
        assert_relative_eq!(Vwn5Correlation::epsilon(1.0, 0.0).0, -0.0600187, epsilon = 1e-6);
        assert_relative_eq!(Vwn5Correlation::epsilon(2.0, 0.0).0, -0.0447828, epsilon = 1e-6);
        assert_relative_eq!(Vwn5Correlation::epsilon(1.0, 1.0).0, -0.0315281, epsilon = 1e-6);
    }

    fn energy(functional: &impl XcFunctional, alpha: f64, beta: f64) -> f64 {
        let mut values = XcValues::zeros(1);
        functional.evaluate(&[[alpha, beta]], None, &mut values);
        values.energy[0]
    }

    #[test]
    fn potentials_are_density_derivatives() {
        let h = 1e-7;
        let functionals: [&dyn Fn(f64, f64) -> (f64, [f64; 2]); 2] = [
            &|a, b| {
                let mut values = XcValues::zeros(1);
                SlaterExchange { scale: 1.0 }.evaluate(&[[a, b]], None, &mut values);
                (values.energy[0], values.potential[0])
            },
            &|a, b| {
                let mut values = XcValues::zeros(1);
                Vwn5Correlation { scale: 1.0 }.evaluate(&[[a, b]], None, &mut values);
                (values.energy[0], values.potential[0])
            },
        ];

        for functional in functionals {
            for &(alpha, beta) in &[(0.3, 0.3), (0.8, 0.05), (0.01, 0.2), (2.5, 1.7)] {
                let (_, potential) = functional(alpha, beta);
                let numeric_alpha =
                    (functional(alpha + h, beta).0 - functional(alpha - h, beta).0) / (2.0 * h);
                let numeric_beta =
                    (functional(alpha, beta + h).0 - functional(alpha, beta - h).0) / (2.0 * h);

                assert_relative_eq!(potential[0], numeric_alpha, epsilon = 1e-6);
                assert_relative_eq!(potential[1], numeric_beta, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn closed_shell_slater_constant() {
        // e_x = -3/4 (3/pi)^(1/3) ρ^(4/3) for equal spin densities
        let rho: f64 = 0.7;
        let expected = -0.75 * (3.0 / std::f64::consts::PI).cbrt() * rho.powf(4.0 / 3.0);
        assert_relative_eq!(
            energy(&SlaterExchange { scale: 1.0 }, rho / 2.0, rho / 2.0),
            expected,
            epsilon = 1e-12
        );
        assert_eq!(energy(&SlaterExchange { scale: 1.0 }, 0.0, 0.0), 0.0);
    }
}
