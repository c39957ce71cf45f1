//! Atom-centered integration grids with Becke partitioning.
//!
//! [1] A. D. Becke, J. Chem. Phys. 88, 2547 (1988).
use std::f64::consts::{PI, TAU};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{molecule::Molecule, periodic_table::ElementType};

/// Points with a smaller partitioned weight are dropped.
const WEIGHT_CUTOFF: f64 = 1e-15;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Gauss-Legendre radial points per atom.
    pub radial_points: usize,
    /// Gauss-Legendre points in cos θ.
    pub theta_points: usize,
    /// Equally spaced points in φ.
    pub phi_points: usize,
    /// Points per batch; a batch is the unit of work handed to a worker.
    pub batch_size: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            radial_points: 60,
            theta_points: 18,
            phi_points: 36,
            batch_size: 256,
        }
    }
}

/// A contiguous chunk of grid points belonging to one atom.
#[derive(Clone, Debug, PartialEq)]
pub struct GridBatch {
    pub atom: usize,
    pub points: Vec<Vector3<f64>>,
    pub weights: Vec<f64>,
}

impl GridBatch {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct MolecularGrid {
    batches: Vec<GridBatch>,
}

impl MolecularGrid {
    pub fn new(molecule: &Molecule, config: &GridConfig) -> Self {
        let (radial_nodes, radial_weights) = gauss_legendre(config.radial_points);
        let (theta_nodes, theta_weights) = gauss_legendre(config.theta_points);
        let phi_weight = TAU / config.phi_points as f64;

        let positions = molecule
            .atoms()
            .iter()
            .map(|atom| *atom.position())
            .collect::<Vec<_>>();
        let radii = molecule
            .atoms()
            .iter()
            .map(|atom| atom.element_type().bragg_radius())
            .collect::<Vec<_>>();

        let mut batches = Vec::new();
        let mut total = 0;

        for (atom_index, atom) in molecule.atoms().iter().enumerate() {
            let midpoint = becke_midpoint(atom.element_type());
            let mut points = Vec::new();
            let mut weights = Vec::new();

            for (&x, &wx) in radial_nodes.iter().zip(&radial_weights) {
                // r = r_m (1 + x) / (1 - x)
                let r = midpoint * (1.0 + x) / (1.0 - x);
                let dr = 2.0 * midpoint / (1.0 - x).powi(2);
                let radial_weight = wx * r * r * dr;

                for (&cos_theta, &wt) in theta_nodes.iter().zip(&theta_weights) {
                    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();

                    for k in 0..config.phi_points {
                        let phi = phi_weight * k as f64;
                        let direction =
                            Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
                        let point = atom.position() + r * direction;

                        let weight = radial_weight
                            * wt
                            * phi_weight
                            * becke_weight(&point, atom_index, &positions, &radii);
                        if weight.abs() < WEIGHT_CUTOFF {
                            continue;
                        }
                        points.push(point);
                        weights.push(weight);
                    }
                }
            }

            total += points.len();
            for (points, weights) in points
                .chunks(config.batch_size.max(1))
                .zip(weights.chunks(config.batch_size.max(1)))
            {
                batches.push(GridBatch {
                    atom: atom_index,
                    points: points.to_vec(),
                    weights: weights.to_vec(),
                });
            }
        }

        log::debug!("integration grid: {total} points in {} batches", batches.len());
        Self { batches }
    }

    pub fn batches(&self) -> &[GridBatch] {
        &self.batches
    }

    pub fn n_points(&self) -> usize {
        self.batches.iter().map(GridBatch::len).sum()
    }
}

/// Radial scale of the Becke mapping; half the Bragg radius except for hydrogen.
fn becke_midpoint(element: ElementType) -> f64 {
    match element {
        ElementType::H => element.bragg_radius(),
        _ => 0.5 * element.bragg_radius(),
    }
}

/// Becke's fuzzy cell weight of `atom` at `point`, with atomic size adjustment.
fn becke_weight(
    point: &Vector3<f64>,
    atom: usize,
    positions: &[Vector3<f64>],
    radii: &[f64],
) -> f64 {
    if positions.len() == 1 {
        return 1.0;
    }

    let distances = positions
        .iter()
        .map(|position| (point - position).norm())
        .collect::<Vec<_>>();

    let cell = |i: usize| {
        let mut product = 1.0;
        for j in 0..positions.len() {
            if i == j {
                continue;
            }
            let separation = (positions[i] - positions[j]).norm();
            let mu = (distances[i] - distances[j]) / separation;

            let chi = radii[i] / radii[j];
            let u = (chi - 1.0) / (chi + 1.0);
            let a = (u / (u * u - 1.0)).clamp(-0.5, 0.5);
            let nu = mu + a * (1.0 - mu * mu);

            product *= 0.5 * (1.0 - becke_step(nu));
            if product == 0.0 {
                break;
            }
        }
        product
    };

    let total = (0..positions.len()).map(cell).sum::<f64>();
    if total == 0.0 {
        0.0
    } else {
        cell(atom) / total
    }
}

/// Three times iterated f(x) = 3/2 x - 1/2 x^3.
fn becke_step(x: f64) -> f64 {
    let mut x = x;
    for _ in 0..3 {
        x = 1.5 * x - 0.5 * x * x * x;
    }
    x
}

/// Gauss-Legendre nodes and weights on [-1, 1], via Newton iteration on P_n.
pub(crate) fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];

    for i in 0..n.div_ceil(2) {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut derivative = 1.0;

        for _ in 0..100 {
            // P_n(x) and P_{n-1}(x) by recurrence
            let (mut p0, mut p1) = (1.0, x);
            for k in 2..=n {
                let p2 = ((2 * k - 1) as f64 * x * p1 - (k - 1) as f64 * p0) / k as f64;
                p0 = p1;
                p1 = p2;
            }
            derivative = n as f64 * (x * p1 - p0) / (x * x - 1.0);

            let step = p1 / derivative;
            x -= step;
            if step.abs() < 1e-15 {
                break;
            }
        }

        let weight = 2.0 / ((1.0 - x * x) * derivative * derivative);
        nodes[i] = -x;
        nodes[n - 1 - i] = x;
        weights[i] = weight;
        weights[n - 1 - i] = weight;
    }

    (nodes, weights)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{gauss_legendre, GridConfig, MolecularGrid};
    use crate::molecule;

    #[test]
    fn legendre_rule_integrates_polynomials() {
        let (nodes, weights) = gauss_legendre(7);
        assert_relative_eq!(weights.iter().sum::<f64>(), 2.0, epsilon = 1e-14);

        // exact up to degree 13
        let integral = nodes
            .iter()
            .zip(&weights)
            .map(|(x, w)| w * x.powi(12))
            .sum::<f64>();
        assert_relative_eq!(integral, 2.0 / 13.0, epsilon = 1e-13);

        for pair in nodes.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn integrates_gaussians_on_a_molecule() {
        let molecule = molecule! {
            O => (0.0, 0.0, 0.0),
            H => (0.0, 1.43, 1.1),
            H => (0.0, -1.43, 1.1),
        };
        let grid = MolecularGrid::new(&molecule, &GridConfig::default());
        assert!(grid.n_points() > 0);

        // a normalized gaussian on every atom: the integral counts the atoms
        let alpha: f64 = 1.3;
        let norm = (alpha / std::f64::consts::PI).powf(1.5);
        let mut integral = 0.0;
        for batch in grid.batches() {
            assert!(batch.len() <= GridConfig::default().batch_size);
            for (point, weight) in batch.points.iter().zip(&batch.weights) {
                integral += weight
                    * molecule
                        .atoms()
                        .iter()
                        .map(|atom| norm * (-alpha * (point - atom.position()).norm_squared()).exp())
                        .sum::<f64>();
            }
        }
        assert_relative_eq!(integral, 3.0, epsilon = 1e-5);
    }
}
