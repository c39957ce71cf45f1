//! McMurchie Davidon integration scheme, two-electron part.
//!
//! (ab|cd) = 2 pi^(5/2) / (p q sqrt(p + q)) sum_tuv E^ab_tuv sum_τνφ (-1)^(τ+ν+φ) E^cd_τνφ R_(t+τ)(u+ν)(v+φ)
//!
//! The inner sum over the ket is done once per ket component pair into an intermediate G_tuv,
//! which every bra component pair then contracts with.
use std::f64::consts::PI;

use crate::basis::Shell;

use super::{
    hermite::{expansion_1d, Center, CoulombTable},
    mmd::{primitive_pairs, PrimitivePair},
};

/// Hermite expansions of every component pair of a primitive pair, one row per axis.
struct Expansion {
    stride: usize,
    data: Vec<f64>,
    lengths: Vec<[usize; 3]>,
}

impl Expansion {
    /// `derivative` differentiates with respect to one center along one axis. `alternate` folds
    /// the (-1)^t sign of the ket into the coefficients.
    fn new(
        pair: &PrimitivePair,
        shell_a: &Shell,
        shell_b: &Shell,
        derivative: Option<(Center, usize)>,
        alternate: bool,
    ) -> Self {
        let stride = (shell_a.angular + shell_b.angular) as usize + 2;
        let n = shell_a.n_functions() * shell_b.n_functions();
        let mut data = vec![0.0; n * 3 * stride];
        let mut lengths = Vec::with_capacity(n);

        for component_a in &shell_a.components {
            for component_b in &shell_b.components {
                let index = lengths.len();
                let mut length = [0; 3];

                for axis in 0..3 {
                    let differentiate = match derivative {
                        Some((Center::A, d)) if d == axis => Some((Center::A, pair.a)),
                        Some((Center::B, d)) if d == axis => Some((Center::B, pair.b)),
                        _ => None,
                    };

                    let start = (index * 3 + axis) * stride;
                    let out = &mut data[start..start + stride];
                    length[axis] = expansion_1d(
                        &pair.tables[axis],
                        component_a[axis],
                        component_b[axis],
                        differentiate,
                        out,
                    );

                    if alternate {
                        out[..length[axis]].iter_mut().skip(1).step_by(2).for_each(|e| *e = -*e);
                    }
                }

                lengths.push(length);
            }
        }

        Self {
            stride,
            data,
            lengths,
        }
    }

    #[inline(always)]
    fn axis(&self, index: usize, axis: usize) -> &[f64] {
        let start = (index * 3 + axis) * self.stride;
        &self.data[start..start + self.lengths[index][axis]]
    }
}

/// G_tuv = sum over the ket expansion of `index` times R, for all t + u + v <= `bra_max`.
fn ket_contraction(
    ket: &Expansion,
    index: usize,
    coulomb: &CoulombTable,
    bra_max: usize,
    g: &mut [f64],
) {
    let dim = bra_max + 1;
    let (ex, ey, ez) = (ket.axis(index, 0), ket.axis(index, 1), ket.axis(index, 2));

    for t in 0..=bra_max {
        for u in 0..=bra_max - t {
            for v in 0..=bra_max - t - u {
                let mut sum = 0.0;
                for (tau, &x) in ex.iter().enumerate() {
                    if x == 0.0 {
                        continue;
                    }
                    for (nu, &y) in ey.iter().enumerate() {
                        let xy = x * y;
                        if xy == 0.0 {
                            continue;
                        }
                        for (phi, &z) in ez.iter().enumerate() {
                            sum += xy * z * coulomb.get(t + tau, u + nu, v + phi);
                        }
                    }
                }
                g[(t * dim + u) * dim + v] = sum;
            }
        }
    }
}

#[inline(always)]
fn bra_contraction(bra: &Expansion, index: usize, g: &[f64], dim: usize) -> f64 {
    let (ex, ey, ez) = (bra.axis(index, 0), bra.axis(index, 1), bra.axis(index, 2));

    let mut sum = 0.0;
    for (t, &x) in ex.iter().enumerate() {
        if x == 0.0 {
            continue;
        }
        for (u, &y) in ey.iter().enumerate() {
            let xy = x * y;
            if xy == 0.0 {
                continue;
            }
            for (v, &z) in ez.iter().enumerate() {
                sum += xy * z * g[(t * dim + u) * dim + v];
            }
        }
    }
    sum
}

#[inline(always)]
fn quartet_prefactor(bra: &PrimitivePair, ket: &PrimitivePair) -> (f64, f64) {
    let (p, q) = (bra.p, ket.p);
    let alpha = p * q / (p + q);
    let prefactor = 2.0 * PI.powi(2) * PI.sqrt() / (p * q * (p + q).sqrt());
    (alpha, prefactor * bra.weight * ket.weight)
}

fn pair_norms(shell_a: &Shell, shell_b: &Shell) -> Vec<f64> {
    shell_a
        .component_norms
        .iter()
        .flat_map(|&a| shell_b.component_norms.iter().map(move |&b| a * b))
        .collect()
}

fn normalize(block: &mut [f64], bra_norms: &[f64], ket_norms: &[f64]) {
    let ncd = ket_norms.len();
    for (ij, &bra) in bra_norms.iter().enumerate() {
        for (kl, &ket) in ket_norms.iter().enumerate() {
            block[ij * ncd + kl] *= bra * ket;
        }
    }
}

/// Electron repulsion integrals (ab|cd) of four shells, laid out as
/// `((i * nb + j) * nc + k) * nd + l`.
pub(crate) fn eri_block(shells: [&Shell; 4]) -> Vec<f64> {
    let [a, b, c, d] = shells;
    let lab = (a.angular + b.angular) as usize;
    let lcd = (c.angular + d.angular) as usize;
    let nab = a.n_functions() * b.n_functions();
    let ncd = c.n_functions() * d.n_functions();

    let bra_pairs = primitive_pairs(a, b, 0, 0);
    let ket_pairs = primitive_pairs(c, d, 0, 0);
    let bra = bra_pairs
        .iter()
        .map(|pair| Expansion::new(pair, a, b, None, false))
        .collect::<Vec<_>>();
    let ket = ket_pairs
        .iter()
        .map(|pair| Expansion::new(pair, c, d, None, true))
        .collect::<Vec<_>>();

    let mut block = vec![0.0; nab * ncd];
    let mut coulomb = CoulombTable::default();
    let dim = lab + 1;
    let mut g = vec![0.0; dim * dim * dim];

    for (bra_pair, bra) in bra_pairs.iter().zip(&bra) {
        for (ket_pair, ket) in ket_pairs.iter().zip(&ket) {
            let (alpha, prefactor) = quartet_prefactor(bra_pair, ket_pair);
            coulomb.fill(
                lab + lcd,
                alpha,
                &(bra_pair.product_center - ket_pair.product_center),
            );

            for kl in 0..ncd {
                ket_contraction(ket, kl, &coulomb, lab, &mut g);
                for ij in 0..nab {
                    block[ij * ncd + kl] += prefactor * bra_contraction(bra, ij, &g, dim);
                }
            }
        }
    }

    normalize(&mut block, &pair_norms(a, b), &pair_norms(c, d));
    block
}

/// Derivatives of an ERI block with respect to the centers of its four shells, indexed
/// `[center][axis]`. Same layout as [`eri_block`].
pub struct EriDerivatives {
    pub centers: [[Vec<f64>; 3]; 4],
}

/// Computes the A, B and C derivatives directly; D follows from translational invariance.
pub(crate) fn eri_derivative_block(shells: [&Shell; 4]) -> EriDerivatives {
    let [a, b, c, d] = shells;
    let lab = (a.angular + b.angular) as usize;
    let lcd = (c.angular + d.angular) as usize;
    let nab = a.n_functions() * b.n_functions();
    let ncd = c.n_functions() * d.n_functions();
    let size = nab * ncd;

    let bra_pairs = primitive_pairs(a, b, 1, 1);
    let ket_pairs = primitive_pairs(c, d, 1, 0);

    let mut centers: [[Vec<f64>; 3]; 4] =
        std::array::from_fn(|_| std::array::from_fn(|_| vec![0.0; size]));
    let mut coulomb = CoulombTable::default();

    let dim_plain = lab + 2;
    let dim_ket = lab + 1;
    let mut g = vec![0.0; dim_plain.pow(3)];
    let mut g_c = [0, 1, 2].map(|_| vec![0.0; dim_ket.pow(3)]);

    for bra_pair in &bra_pairs {
        let bra = Expansion::new(bra_pair, a, b, None, false);
        let bra_a = [0, 1, 2].map(|axis| Expansion::new(bra_pair, a, b, Some((Center::A, axis)), false));
        let bra_b = [0, 1, 2].map(|axis| Expansion::new(bra_pair, a, b, Some((Center::B, axis)), false));

        for ket_pair in &ket_pairs {
            let ket = Expansion::new(ket_pair, c, d, None, true);
            let ket_c = [0, 1, 2].map(|axis| Expansion::new(ket_pair, c, d, Some((Center::A, axis)), true));

            let (alpha, prefactor) = quartet_prefactor(bra_pair, ket_pair);
            coulomb.fill(
                lab + lcd + 1,
                alpha,
                &(bra_pair.product_center - ket_pair.product_center),
            );

            for kl in 0..ncd {
                ket_contraction(&ket, kl, &coulomb, lab + 1, &mut g);
                for (axis, g_c) in g_c.iter_mut().enumerate() {
                    ket_contraction(&ket_c[axis], kl, &coulomb, lab, g_c);
                }

                for ij in 0..nab {
                    let index = ij * ncd + kl;
                    for axis in 0..3 {
                        centers[0][axis][index] +=
                            prefactor * bra_contraction(&bra_a[axis], ij, &g, dim_plain);
                        centers[1][axis][index] +=
                            prefactor * bra_contraction(&bra_b[axis], ij, &g, dim_plain);
                        centers[2][axis][index] +=
                            prefactor * bra_contraction(&bra, ij, &g_c[axis], dim_ket);
                    }
                }
            }
        }
    }

    let bra_norms = pair_norms(a, b);
    let ket_norms = pair_norms(c, d);
    for center in centers.iter_mut().take(3) {
        for block in center.iter_mut() {
            normalize(block, &bra_norms, &ket_norms);
        }
    }

    for axis in 0..3 {
        for index in 0..size {
            centers[3][axis][index] =
                -(centers[0][axis][index] + centers[1][axis][index] + centers[2][axis][index]);
        }
    }

    EriDerivatives { centers }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use super::{eri_block, eri_derivative_block};
    use crate::basis::{ElectronShell, Shell};

    fn shell(angular: u32, exponents: &[f64], coefficients: &[f64], center: Vector3<f64>) -> Shell {
        Shell::new(
            &ElectronShell::new(angular, exponents.iter().copied(), coefficients.iter().copied()),
            center,
            0,
            0,
        )
    }

    fn sto_3g_hydrogen(z: f64) -> Shell {
        shell(
            0,
            &[3.42525091, 0.62391373, 0.1688554],
            &[0.15432897, 0.53532814, 0.44463454],
            Vector3::new(0.0, 0.0, z),
        )
    }

    #[test]
    fn hydrogen_molecule_reference_values() {
        // Szabo & Ostlund, table 3.x, H2 STO-3G at R = 1.4 bohr
        let (h1, h2) = (sto_3g_hydrogen(0.0), sto_3g_hydrogen(1.4));

        assert_relative_eq!(eri_block([&h1, &h1, &h1, &h1])[0], 0.7746, epsilon = 1e-4);
        assert_relative_eq!(eri_block([&h1, &h1, &h2, &h2])[0], 0.5697, epsilon = 1e-4);
        assert_relative_eq!(eri_block([&h2, &h1, &h1, &h1])[0], 0.4441, epsilon = 1e-4);
        assert_relative_eq!(eri_block([&h2, &h1, &h2, &h1])[0], 0.2970, epsilon = 1e-4);
    }

    fn mixed_shells() -> [Shell; 4] {
        [
            shell(1, &[1.1, 0.4], &[0.6, 0.5], Vector3::new(0.0, 0.1, 0.0)),
            shell(0, &[0.9], &[1.0], Vector3::new(0.8, 0.0, -0.3)),
            shell(2, &[0.7], &[1.0], Vector3::new(-0.2, 0.6, 0.5)),
            shell(1, &[1.5], &[1.0], Vector3::new(0.4, -0.7, 0.9)),
        ]
    }

    #[test]
    fn permutational_symmetry() {
        let [a, b, c, d] = mixed_shells();
        let (na, nb, nc, nd) = (a.n_functions(), b.n_functions(), c.n_functions(), d.n_functions());

        let abcd = eri_block([&a, &b, &c, &d]);
        let bacd = eri_block([&b, &a, &c, &d]);
        let cdab = eri_block([&c, &d, &a, &b]);
        let abdc = eri_block([&a, &b, &d, &c]);

        for i in 0..na {
            for j in 0..nb {
                for k in 0..nc {
                    for l in 0..nd {
                        let value = abcd[((i * nb + j) * nc + k) * nd + l];
                        assert_relative_eq!(value, bacd[((j * na + i) * nc + k) * nd + l], epsilon = 1e-12);
                        assert_relative_eq!(value, cdab[((k * nd + l) * na + i) * nb + j], epsilon = 1e-12);
                        assert_relative_eq!(value, abdc[((i * nb + j) * nd + l) * nc + k], epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let shells = mixed_shells();
        let derivatives = eri_derivative_block([&shells[0], &shells[1], &shells[2], &shells[3]]);
        let h = 1e-5;

        for center in 0..4 {
            for axis in 0..3 {
                let displaced = |step: f64| {
                    let mut moved = shells.clone();
                    moved[center].center[axis] += step;
                    eri_block([&moved[0], &moved[1], &moved[2], &moved[3]])
                };
                let (plus, minus) = (displaced(h), displaced(-h));

                for (index, analytic) in derivatives.centers[center][axis].iter().enumerate() {
                    let numeric = (plus[index] - minus[index]) / (2.0 * h);
                    assert_relative_eq!(*analytic, numeric, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn coulomb_self_repulsion_is_positive() {
        let shells = mixed_shells();
        for shell in &shells {
            let n = shell.n_functions();
            let block = eri_block([shell, shell, shell, shell]);
            for i in 0..n {
                for j in 0..n {
                    assert!(block[((i * n + j) * n + i) * n + j] > 0.0);
                }
            }
        }
    }
}
