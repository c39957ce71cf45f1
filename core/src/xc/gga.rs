//! Gradient corrected functionals.
use std::f64::consts::PI;

use super::{XcFunctional, XcValues};

const DENSITY_CUTOFF: f64 = 1e-14;

/// Becke's 1988 exchange, spin resolved:
/// e_x = -sum_σ ρ_σ^(4/3) (C + β x_σ² / (1 + 6 β x_σ asinh x_σ)), with x_σ = |∇ρ_σ| / ρ_σ^(4/3)
/// and C the Slater constant, so a flat density gives back Slater exchange.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Becke88Exchange {
    pub scale: f64,
}

impl Becke88Exchange {
    const BETA: f64 = 0.0042;

    /// The enhancement g(x) = x² / (1 + 6 β x asinh x) with g'(x) and g'(x) / x.
    fn enhancement(x: f64) -> (f64, f64, f64) {
        let beta = Self::BETA;
        let denominator = 1.0 + 6.0 * beta * x * x.asinh();
        let d_denominator = 6.0 * beta * (x.asinh() + x / (1.0 + x * x).sqrt());
        let g = x * x / denominator;
        let over_x = (2.0 * denominator - x * d_denominator) / (denominator * denominator);
        (g, over_x * x, over_x)
    }
}

impl XcFunctional for Becke88Exchange {
    fn needs_gradient(&self) -> bool {
        true
    }

    fn evaluate(&self, density: &[[f64; 2]], sigma: Option<&[[f64; 3]]>, values: &mut XcValues) {
        let slater = 1.5 * (3.0 / (4.0 * PI)).cbrt();
        let beta = Self::BETA;

        for (point, rho) in density.iter().enumerate() {
            let invariants = sigma.map_or([0.0; 3], |sigma| sigma[point]);
            for spin in 0..2 {
                let rho = rho[spin];
                if rho < DENSITY_CUTOFF {
                    continue;
                }
                // σ_αα and σ_ββ sit at the ends of the invariants
                let sigma = invariants[2 * spin].max(0.0);
                let rho_third = rho.cbrt();
                let rho_four_thirds = rho * rho_third;
                let x = sigma.sqrt() / rho_four_thirds;
                let (g, d_g, d_g_over_x) = Self::enhancement(x);

                values.energy[point] -= self.scale * rho_four_thirds * (slater + beta * g);
                values.potential[point][spin] -=
                    self.scale * 4.0 / 3.0 * rho_third * (slater + beta * (g - x * d_g));
                values.sigma_potential[point][2 * spin] -=
                    self.scale * beta * d_g_over_x / (2.0 * rho_four_thirds);
            }
        }
    }
}
