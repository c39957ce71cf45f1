//! McMurchie Davidon integration scheme, one-electron part.
//! Reference:
//!
//! [1] Goings, J. Integrals. https://joshuagoings.com/2017/04/28/integrals/
//! [2] Helgaker, Jørgensen, Olsen. Molecular Electronic-Structure Theory, ch. 9.
use std::f64::consts::{PI, TAU};

use nalgebra::Vector3;

use crate::basis::Shell;

use super::hermite::{Center, CoulombTable, HermiteTable};

/// A point charge the electrons are attracted to.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PointCharge {
    pub charge: f64,
    pub position: Vector3<f64>,
}

/// Derivative of a shell pair block with respect to one cartesian coordinate of one of its centers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Displacement {
    pub(crate) center: Center,
    pub(crate) axis: usize,
}

/// Everything the one- and two-electron formulas need about one pair of primitives.
#[derive(Clone, Debug)]
pub(crate) struct PrimitivePair {
    /// exponent of the primitive on the first shell
    pub(crate) a: f64,
    /// exponent of the primitive on the second shell
    pub(crate) b: f64,
    pub(crate) p: f64,
    pub(crate) product_center: Vector3<f64>,
    /// product of both contraction coefficients
    pub(crate) weight: f64,
    pub(crate) tables: [HermiteTable; 3],
}

impl PrimitivePair {
    /// The Hermite coefficient E^{ij}_t along `axis`, differentiated if `displacement` acts on
    /// this axis.
    #[inline(always)]
    pub(crate) fn coefficient(
        &self,
        axis: usize,
        i: i32,
        j: i32,
        t: i32,
        displacement: Option<Displacement>,
    ) -> f64 {
        let table = &self.tables[axis];
        match displacement {
            Some(Displacement {
                center: Center::A,
                axis: d,
            }) if d == axis => {
                2.0 * self.a * table.get(i + 1, j, t) - i as f64 * table.get(i - 1, j, t)
            }
            Some(Displacement {
                center: Center::B,
                axis: d,
            }) if d == axis => {
                2.0 * self.b * table.get(i, j + 1, t) - j as f64 * table.get(i, j - 1, t)
            }
            _ => table.get(i, j, t),
        }
    }
}

/// All primitive pairs of two shells, with Hermite tables deep enough to raise the angular
/// momentum of the first shell by `extra_a` and of the second by `extra_b`.
pub(crate) fn primitive_pairs(
    shell_a: &Shell,
    shell_b: &Shell,
    extra_a: usize,
    extra_b: usize,
) -> Vec<PrimitivePair> {
    let diff = shell_a.center - shell_b.center;
    let imax = shell_a.angular as usize + extra_a;
    let jmax = shell_b.angular as usize + extra_b;

    let mut pairs = Vec::with_capacity(shell_a.n_primitives() * shell_b.n_primitives());
    for (&a, &ca) in shell_a.exponents.iter().zip(&shell_a.coefficients) {
        for (&b, &cb) in shell_b.exponents.iter().zip(&shell_b.coefficients) {
            pairs.push(PrimitivePair {
                a,
                b,
                p: a + b,
                product_center: product_center(shell_a.center, a, shell_b.center, b),
                weight: ca * cb,
                tables: [
                    HermiteTable::new(imax, jmax, a, b, diff.x),
                    HermiteTable::new(imax, jmax, a, b, diff.y),
                    HermiteTable::new(imax, jmax, a, b, diff.z),
                ],
            });
        }
    }
    pairs
}

#[inline(always)]
pub(crate) fn product_center(
    a_pos: Vector3<f64>,
    a_exp: f64,
    b_pos: Vector3<f64>,
    b_exp: f64,
) -> Vector3<f64> {
    (a_exp * a_pos + b_exp * b_pos) / (a_exp + b_exp)
}

/// Multiplies every element of an (n_a x n_b) block by the component normalization of its row
/// and column function.
pub(crate) fn apply_component_norms(shell_a: &Shell, shell_b: &Shell, block: &mut [f64]) {
    let nb = shell_b.n_functions();
    for (i, &norm_a) in shell_a.component_norms.iter().enumerate() {
        for (j, &norm_b) in shell_b.component_norms.iter().enumerate() {
            block[i * nb + j] *= norm_a * norm_b;
        }
    }
}

fn primitive_overlap(
    pair: &PrimitivePair,
    [i1, j1, k1]: [i32; 3],
    [i2, j2, k2]: [i32; 3],
    displacement: Option<Displacement>,
) -> f64 {
    pair.coefficient(0, i1, i2, 0, displacement)
        * pair.coefficient(1, j1, j2, 0, displacement)
        * pair.coefficient(2, k1, k2, 0, displacement)
        * (PI / pair.p).powi(3).sqrt()
}

/// One-dimensional kinetic factor -1/2 <i| d^2/dx^2 |j> in units of the Hermite prefactor.
#[inline(always)]
fn kinetic_1d(
    pair: &PrimitivePair,
    axis: usize,
    i: i32,
    j: i32,
    displacement: Option<Displacement>,
) -> f64 {
    let b = pair.b;
    let s = |j| pair.coefficient(axis, i, j, 0, displacement);

    -2.0 * b * b * s(j + 2) + b * (2 * j + 1) as f64 * s(j) - 0.5 * (j * (j - 1)) as f64 * s(j - 2)
}

fn primitive_kinetic(
    pair: &PrimitivePair,
    [i1, j1, k1]: [i32; 3],
    [i2, j2, k2]: [i32; 3],
    displacement: Option<Displacement>,
) -> f64 {
    let sx = pair.coefficient(0, i1, i2, 0, displacement);
    let sy = pair.coefficient(1, j1, j2, 0, displacement);
    let sz = pair.coefficient(2, k1, k2, 0, displacement);

    let tx = kinetic_1d(pair, 0, i1, i2, displacement);
    let ty = kinetic_1d(pair, 1, j1, j2, displacement);
    let tz = kinetic_1d(pair, 2, k1, k2, displacement);

    (tx * sy * sz + sx * ty * sz + sx * sy * tz) * (PI / pair.p).powi(3).sqrt()
}

fn primitive_nuclear(
    pair: &PrimitivePair,
    coulomb: &CoulombTable,
    [i1, j1, k1]: [i32; 3],
    [i2, j2, k2]: [i32; 3],
    displacement: Option<Displacement>,
) -> f64 {
    let extra = |axis| match displacement {
        Some(Displacement { axis: d, .. }) if d == axis => 1,
        _ => 0,
    };

    let mut sum = 0.0;
    for t in 0..=i1 + i2 + extra(0) {
        let ex = pair.coefficient(0, i1, i2, t, displacement);
        if ex == 0.0 {
            continue;
        }
        for u in 0..=j1 + j2 + extra(1) {
            let ey = pair.coefficient(1, j1, j2, u, displacement);
            if ey == 0.0 {
                continue;
            }
            for v in 0..=k1 + k2 + extra(2) {
                let ez = pair.coefficient(2, k1, k2, v, displacement);
                sum += ex * ey * ez * coulomb.get(t as usize, u as usize, v as usize);
            }
        }
    }

    TAU / pair.p * sum
}

/// Generic driver for one-electron blocks: loops primitive pairs and component pairs and
/// accumulates `primitive(pair, component_a, component_b)` into a normalized block.
fn one_electron_block(
    shell_a: &Shell,
    shell_b: &Shell,
    pairs: &[PrimitivePair],
    mut primitive: impl FnMut(&PrimitivePair, [i32; 3], [i32; 3]) -> f64,
) -> Vec<f64> {
    let nb = shell_b.n_functions();
    let mut block = vec![0.0; shell_a.n_functions() * nb];

    for pair in pairs {
        for (i, &component_a) in shell_a.components.iter().enumerate() {
            for (j, &component_b) in shell_b.components.iter().enumerate() {
                block[i * nb + j] += pair.weight * primitive(pair, component_a, component_b);
            }
        }
    }

    apply_component_norms(shell_a, shell_b, &mut block);
    block
}

pub(crate) fn overlap_block(shell_a: &Shell, shell_b: &Shell) -> Vec<f64> {
    let pairs = primitive_pairs(shell_a, shell_b, 0, 0);
    one_electron_block(shell_a, shell_b, &pairs, |pair, a, b| {
        primitive_overlap(pair, a, b, None)
    })
}

pub(crate) fn kinetic_block(shell_a: &Shell, shell_b: &Shell) -> Vec<f64> {
    let pairs = primitive_pairs(shell_a, shell_b, 0, 2);
    one_electron_block(shell_a, shell_b, &pairs, |pair, a, b| {
        primitive_kinetic(pair, a, b, None)
    })
}

/// Attraction of the pair density to a set of point charges: -sum_C Z_C <a| 1/|r - C| |b>.
pub(crate) fn nuclear_block(shell_a: &Shell, shell_b: &Shell, charges: &[PointCharge]) -> Vec<f64> {
    let pairs = primitive_pairs(shell_a, shell_b, 0, 0);
    let l = (shell_a.angular + shell_b.angular) as usize;
    let mut coulomb = CoulombTable::default();

    let nb = shell_b.n_functions();
    let mut block = vec![0.0; shell_a.n_functions() * nb];

    for pair in &pairs {
        for charge in charges {
            coulomb.fill(l, pair.p, &(pair.product_center - charge.position));
            let factor = -charge.charge * pair.weight;

            for (i, &component_a) in shell_a.components.iter().enumerate() {
                for (j, &component_b) in shell_b.components.iter().enumerate() {
                    block[i * nb + j] +=
                        factor * primitive_nuclear(pair, &coulomb, component_a, component_b, None);
                }
            }
        }
    }

    apply_component_norms(shell_a, shell_b, &mut block);
    block
}

/// Dipole integrals <a| r |b> about the origin, one block per cartesian direction.
pub(crate) fn dipole_block(shell_a: &Shell, shell_b: &Shell) -> [Vec<f64>; 3] {
    let pairs = primitive_pairs(shell_a, shell_b, 0, 0);

    [0, 1, 2].map(|direction| {
        one_electron_block(shell_a, shell_b, &pairs, |pair, a, b| {
            let factor = |axis: usize| {
                let table = &pair.tables[axis];
                if axis == direction {
                    // x = (x - P_x) + P_x, and (x - P_x) only survives against Λ_1
                    table.get(a[axis], b[axis], 1) + pair.product_center[axis] * table.get(a[axis], b[axis], 0)
                } else {
                    table.get(a[axis], b[axis], 0)
                }
            };

            factor(0) * factor(1) * factor(2) * (PI / pair.p).powi(3).sqrt()
        })
    })
}

/// d/dA of the overlap block, one block per cartesian axis. The derivative with respect to B is
/// the negative of this (translational invariance).
pub(crate) fn overlap_derivative_block(shell_a: &Shell, shell_b: &Shell) -> [Vec<f64>; 3] {
    let pairs = primitive_pairs(shell_a, shell_b, 1, 0);
    [0, 1, 2].map(|axis| {
        let displacement = Some(Displacement {
            center: Center::A,
            axis,
        });
        one_electron_block(shell_a, shell_b, &pairs, |pair, a, b| {
            primitive_overlap(pair, a, b, displacement)
        })
    })
}

/// d/dA of the kinetic block; d/dB is its negative.
pub(crate) fn kinetic_derivative_block(shell_a: &Shell, shell_b: &Shell) -> [Vec<f64>; 3] {
    let pairs = primitive_pairs(shell_a, shell_b, 1, 2);
    [0, 1, 2].map(|axis| {
        let displacement = Some(Displacement {
            center: Center::A,
            axis,
        });
        one_electron_block(shell_a, shell_b, &pairs, |pair, a, b| {
            primitive_kinetic(pair, a, b, displacement)
        })
    })
}

/// Derivatives of the attraction block of a single point charge with respect to the two basis
/// function centers, `(d/dA, d/dB)`. The derivative with respect to the charge position is
/// -(d/dA + d/dB).
pub(crate) fn nuclear_derivative_block(
    shell_a: &Shell,
    shell_b: &Shell,
    charge: &PointCharge,
) -> ([Vec<f64>; 3], [Vec<f64>; 3]) {
    let pairs = primitive_pairs(shell_a, shell_b, 1, 1);
    let l = (shell_a.angular + shell_b.angular + 1) as usize;
    let mut coulomb = CoulombTable::default();

    let nb = shell_b.n_functions();
    let size = shell_a.n_functions() * nb;
    let mut derivative_a = [vec![0.0; size], vec![0.0; size], vec![0.0; size]];
    let mut derivative_b = [vec![0.0; size], vec![0.0; size], vec![0.0; size]];

    for pair in &pairs {
        coulomb.fill(l, pair.p, &(pair.product_center - charge.position));
        let factor = -charge.charge * pair.weight;

        for (i, &component_a) in shell_a.components.iter().enumerate() {
            for (j, &component_b) in shell_b.components.iter().enumerate() {
                for axis in 0..3 {
                    for (center, target) in [
                        (Center::A, &mut derivative_a[axis]),
                        (Center::B, &mut derivative_b[axis]),
                    ] {
                        let displacement = Some(Displacement { center, axis });
                        target[i * nb + j] += factor
                            * primitive_nuclear(
                                pair,
                                &coulomb,
                                component_a,
                                component_b,
                                displacement,
                            );
                    }
                }
            }
        }
    }

    for block in derivative_a.iter_mut().chain(derivative_b.iter_mut()) {
        apply_component_norms(shell_a, shell_b, block);
    }

    (derivative_a, derivative_b)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use super::{
        dipole_block, kinetic_block, kinetic_derivative_block, nuclear_block,
        nuclear_derivative_block, overlap_block, overlap_derivative_block, PointCharge,
    };
    use crate::basis::{ElectronShell, Shell};

    fn shell(angular: u32, exponents: &[f64], coefficients: &[f64], center: Vector3<f64>) -> Shell {
        Shell::new(
            &ElectronShell::new(angular, exponents.iter().copied(), coefficients.iter().copied()),
            center,
            0,
            0,
        )
    }

    fn test_shells() -> Vec<Shell> {
        vec![
            shell(0, &[3.42525091, 0.62391373, 0.1688554], &[0.15432897, 0.53532814, 0.44463454], Vector3::new(0.0, 0.0, 0.0)),
            shell(1, &[1.2, 0.35], &[0.6, 0.5], Vector3::new(0.1, -0.3, 1.1)),
            shell(2, &[0.8], &[1.0], Vector3::new(-0.5, 0.2, 0.4)),
        ]
    }

    #[test]
    fn normalized_diagonal() {
        for shell in test_shells() {
            let block = overlap_block(&shell, &shell);
            let n = shell.n_functions();
            for i in 0..n {
                assert_relative_eq!(block[i * n + i], 1.0, epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn hydrogen_sto_3g_reference_values() {
        // Szabo & Ostlund, H2 at R = 1.4 bohr
        let coefficients = [0.15432897, 0.53532814, 0.44463454];
        let exponents = [3.42525091, 0.62391373, 0.1688554];
        let a = shell(0, &exponents, &coefficients, Vector3::new(0.0, 0.0, 0.0));
        let b = shell(0, &exponents, &coefficients, Vector3::new(0.0, 0.0, 1.4));

        assert_relative_eq!(overlap_block(&a, &b)[0], 0.6593, epsilon = 1e-4);
        assert_relative_eq!(kinetic_block(&a, &a)[0], 0.7600, epsilon = 1e-4);
        assert_relative_eq!(kinetic_block(&a, &b)[0], 0.2365, epsilon = 1e-4);

        let nuclei = [
            PointCharge { charge: 1.0, position: Vector3::new(0.0, 0.0, 0.0) },
            PointCharge { charge: 1.0, position: Vector3::new(0.0, 0.0, 1.4) },
        ];
        assert_relative_eq!(nuclear_block(&a, &a, &nuclei)[0], -1.2266 - 0.6538, epsilon = 1e-4);
        assert_relative_eq!(nuclear_block(&a, &b, &nuclei)[0], -0.5974 * 2.0, epsilon = 1e-4);
    }

    #[test]
    fn symmetric_blocks() {
        let shells = test_shells();
        let charges = [PointCharge { charge: 2.0, position: Vector3::new(0.3, 0.3, -0.2) }];

        for a in &shells {
            for b in &shells {
                let (na, nb) = (a.n_functions(), b.n_functions());
                let pairs = [
                    (overlap_block(a, b), overlap_block(b, a)),
                    (kinetic_block(a, b), kinetic_block(b, a)),
                    (nuclear_block(a, b, &charges), nuclear_block(b, a, &charges)),
                ];
                for (ab, ba) in pairs {
                    for i in 0..na {
                        for j in 0..nb {
                            assert_relative_eq!(ab[i * nb + j], ba[j * na + i], epsilon = 1e-12);
                        }
                    }
                }
            }
        }
    }

    /// Moves the center of a shell along one axis.
    fn displaced(shell: &Shell, axis: usize, h: f64) -> Shell {
        let mut moved = shell.clone();
        moved.center[axis] += h;
        moved
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let shells = test_shells();
        let charge = PointCharge { charge: 1.5, position: Vector3::new(0.2, -0.1, 0.6) };
        let h = 1e-5;

        for a in &shells {
            for b in &shells {
                let overlap = overlap_derivative_block(a, b);
                let kinetic = kinetic_derivative_block(a, b);
                let (nuclear_a, nuclear_b) = nuclear_derivative_block(a, b, &charge);

                for axis in 0..3 {
                    let (plus, minus) = (displaced(a, axis, h), displaced(a, axis, -h));
                    let numeric = |f: &dyn Fn(&Shell) -> Vec<f64>| {
                        let (p, m) = (f(&plus), f(&minus));
                        p.iter().zip(&m).map(|(p, m)| (p - m) / (2.0 * h)).collect::<Vec<_>>()
                    };

                    let s = numeric(&|x| overlap_block(x, b));
                    let t = numeric(&|x| kinetic_block(x, b));
                    let v = numeric(&|x| nuclear_block(x, b, &[charge]));

                    for k in 0..s.len() {
                        assert_relative_eq!(overlap[axis][k], s[k], epsilon = 1e-7);
                        assert_relative_eq!(kinetic[axis][k], t[k], epsilon = 1e-6);
                        assert_relative_eq!(nuclear_a[axis][k], v[k], epsilon = 1e-6);
                    }

                    let (plus, minus) = (displaced(b, axis, h), displaced(b, axis, -h));
                    let v_b = nuclear_block(a, &plus, &[charge])
                        .iter()
                        .zip(nuclear_block(a, &minus, &[charge]))
                        .map(|(p, m)| (p - m) / (2.0 * h))
                        .collect::<Vec<_>>();
                    for k in 0..v_b.len() {
                        assert_relative_eq!(nuclear_b[axis][k], v_b[k], epsilon = 1e-6);
                    }
                }
            }
        }
    }

    #[test]
    fn dipole_of_centered_s_function_is_its_center() {
        let s = shell(0, &[0.9], &[1.0], Vector3::new(0.3, -0.4, 1.2));
        let dipole = dipole_block(&s, &s);
        assert_relative_eq!(dipole[0][0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(dipole[1][0], -0.4, epsilon = 1e-12);
        assert_relative_eq!(dipole[2][0], 1.2, epsilon = 1e-12);
    }
}
