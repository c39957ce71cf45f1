//! Harmonic vibrational analysis.
//!
//! The cartesian Hessian comes from central differences of analytic gradients. It is mass
//! weighted, the rigid translations and rotations are projected out, and the rest is
//! diagonalized into harmonic wavenumbers and normal modes.
use log::{debug, info};
use nalgebra::{DMatrix, DVector, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    molecule::Molecule,
    optimizer::EnergySurface,
    units::{DALTON_TO_ELECTRON_MASS, HARTREE_TO_WAVENUMBER},
};

/// Rigid-body vectors shorter than this after orthogonalization are dependent, which happens for
/// the rotation about the axis of a linear molecule.
const RIGID_DEPENDENCE: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VibrationConfig {
    /// Cartesian displacement in bohr used for the central differences.
    pub displacement: f64,
}

impl Default for VibrationConfig {
    fn default() -> Self {
        Self { displacement: 5e-3 }
    }
}

impl VibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.displacement.is_finite() && self.displacement > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "finite difference displacement must be positive, got {}",
                self.displacement
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HarmonicAnalysis {
    /// Cartesian Hessian in hartree/bohr², symmetrized.
    pub hessian: DMatrix<f64>,
    /// Harmonic wavenumbers in cm⁻¹, ascending. Imaginary modes are reported as negative numbers.
    pub frequencies: Vec<f64>,
    /// Normalized cartesian displacements, one column per frequency.
    pub modes: DMatrix<f64>,
    /// Number of translations and rotations removed: 6, 5 for a linear molecule, 3 for an atom.
    pub rigid_modes: usize,
}

/// Central differences of the gradient of `surface` around `molecule`, symmetrized.
pub fn finite_difference_hessian<S: EnergySurface>(
    surface: &mut S,
    molecule: &Molecule,
    displacement: f64,
) -> Result<DMatrix<f64>> {
    let coordinates = molecule.coordinates();
    let dimension = coordinates.len();
    let mut hessian = DMatrix::zeros(dimension, dimension);

    for k in 0..dimension {
        let mut displaced = |shift: f64| {
            let mut moved = coordinates.clone();
            moved[k] += shift;
            surface.evaluate(&molecule.with_coordinates(&moved))
        };
        let plus = displaced(displacement)?;
        let minus = displaced(-displacement)?;
        if plus.gradient.len() != dimension || minus.gradient.len() != dimension {
            return Err(Error::InvalidInput(format!(
                "surface returned a gradient of length {} for {dimension} coordinates",
                plus.gradient.len()
            )));
        }
        hessian.set_column(k, &((plus.gradient - minus.gradient) / (2.0 * displacement)));
        debug!("hessian column {}/{dimension}", k + 1);
    }

    Ok((&hessian + hessian.transpose()) * 0.5)
}

/// Atomic masses in electron masses, one entry per cartesian coordinate.
fn coordinate_masses(molecule: &Molecule) -> DVector<f64> {
    DVector::from_iterator(
        3 * molecule.n_atoms(),
        molecule.atoms().iter().flat_map(|atom| {
            let mass = atom.element_type().isotope_mass() * DALTON_TO_ELECTRON_MASS;
            [mass; 3]
        }),
    )
}

/// Orthonormal translations and infinitesimal rotations about the center of mass, in mass
/// weighted coordinates, one per column.
pub fn rigid_body_modes(molecule: &Molecule) -> DMatrix<f64> {
    let masses = coordinate_masses(molecule);
    let roots = masses.map(f64::sqrt);
    let total = masses.iter().sum::<f64>() / 3.0;
    let center = molecule
        .atoms()
        .iter()
        .enumerate()
        .fold(Vector3::zeros(), |sum, (index, atom)| {
            sum + atom.position() * masses[3 * index]
        })
        / total;

    let mut candidates = Vec::with_capacity(6);
    for axis in 0..3 {
        candidates.push(DVector::from_fn(masses.len(), |i, _| {
            if i % 3 == axis {
                roots[i]
            } else {
                0.0
            }
        }));
    }
    for axis in [Vector3::x(), Vector3::y(), Vector3::z()] {
        let mut rotation = DVector::zeros(masses.len());
        for (index, atom) in molecule.atoms().iter().enumerate() {
            let moved = axis.cross(&(atom.position() - center));
            for k in 0..3 {
                rotation[3 * index + k] = moved[k] * roots[3 * index + k];
            }
        }
        candidates.push(rotation);
    }

    let mut basis: Vec<DVector<f64>> = Vec::with_capacity(6);
    for mut candidate in candidates {
        for vector in &basis {
            let overlap = vector.dot(&candidate);
            candidate.axpy(-overlap, vector, 1.0);
        }
        let norm = candidate.norm();
        if norm > RIGID_DEPENDENCE {
            basis.push(candidate / norm);
        }
    }
    DMatrix::from_columns(&basis)
}

/// Harmonic frequencies and normal modes of a cartesian Hessian.
pub fn harmonic_analysis(molecule: &Molecule, hessian: DMatrix<f64>) -> Result<HarmonicAnalysis> {
    let dimension = 3 * molecule.n_atoms();
    if hessian.shape() != (dimension, dimension) {
        return Err(Error::InvalidInput(format!(
            "hessian is {}x{}, molecule has {dimension} coordinates",
            hessian.nrows(),
            hessian.ncols()
        )));
    }

    let inverse_roots = coordinate_masses(molecule).map(|mass| mass.sqrt().recip());
    let weighted = DMatrix::from_fn(dimension, dimension, |i, j| {
        hessian[(i, j)] * inverse_roots[i] * inverse_roots[j]
    });

    // an orthonormal basis of the vibrational subspace: the unit eigenvectors of the projector
    let rigid = rigid_body_modes(molecule);
    let projector = DMatrix::identity(dimension, dimension) - &rigid * rigid.transpose();
    let split = SymmetricEigen::new(projector);
    let internal_columns = split
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, value)| **value > 0.5)
        .map(|(index, _)| split.eigenvectors.column(index).into_owned())
        .collect::<Vec<_>>();

    let (frequencies, modes) = if internal_columns.is_empty() {
        (Vec::new(), DMatrix::zeros(dimension, 0))
    } else {
        let internal = DMatrix::from_columns(&internal_columns);
        let reduced = internal.transpose() * &weighted * &internal;
        let eigen = SymmetricEigen::new(reduced);

        let mut order = (0..eigen.eigenvalues.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

        let frequencies = order
            .iter()
            .map(|&index| {
                let value = eigen.eigenvalues[index];
                value.signum() * value.abs().sqrt() * HARTREE_TO_WAVENUMBER
            })
            .collect::<Vec<_>>();
        let columns = order
            .iter()
            .map(|&index| {
                let cartesian = (&internal * eigen.eigenvectors.column(index))
                    .component_mul(&inverse_roots);
                let norm = cartesian.norm();
                cartesian / norm
            })
            .collect::<Vec<_>>();
        (frequencies, DMatrix::from_columns(&columns))
    };

    Ok(HarmonicAnalysis {
        hessian,
        frequencies,
        modes,
        rigid_modes: rigid.ncols(),
    })
}

/// Builds the Hessian on `surface` and analyzes it.
pub fn vibrational_analysis<S: EnergySurface>(
    surface: &mut S,
    molecule: &Molecule,
    config: &VibrationConfig,
) -> Result<HarmonicAnalysis> {
    config.validate()?;
    info!(
        "finite difference hessian: {} gradient evaluations",
        6 * molecule.n_atoms()
    );
    let hessian = finite_difference_hessian(surface, molecule, config.displacement)?;
    let analysis = harmonic_analysis(molecule, hessian)?;
    let imaginary = analysis.frequencies.iter().filter(|&&f| f < 0.0).count();
    if imaginary > 0 {
        info!("{imaginary} imaginary frequencies, not a minimum");
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{DVector, Rotation3, Vector3};

    use super::{harmonic_analysis, rigid_body_modes, vibrational_analysis, VibrationConfig};
    use crate::{
        atom::Atom,
        error::{Error, Result},
        molecule,
        molecule::Molecule,
        optimizer::{EnergySurface, ScfSurface, SurfacePoint},
        parallel::SerialCommunicator,
        scf::{ConvergenceCriteria, ScfConfig},
        testing,
        units::{DALTON_TO_ELECTRON_MASS, HARTREE_TO_WAVENUMBER},
    };

    /// Harmonic bonds E = sum 1/2 k (|r_i - r_j| - r0)².
    struct Springs {
        bonds: Vec<(usize, usize, f64, f64)>,
    }

    impl EnergySurface for Springs {
        fn evaluate(&mut self, molecule: &Molecule) -> Result<SurfacePoint> {
            let atoms = molecule.atoms();
            let mut energy = 0.0;
            let mut gradient = DVector::zeros(3 * atoms.len());
            for &(i, j, k, r0) in &self.bonds {
                let d = atoms[i].position() - atoms[j].position();
                let r = d.norm();
                energy += 0.5 * k * (r - r0).powi(2);
                let force = d * (k * (r - r0) / r);
                for axis in 0..3 {
                    gradient[3 * i + axis] += force[axis];
                    gradient[3 * j + axis] -= force[axis];
                }
            }
            Ok(SurfacePoint { energy, gradient })
        }
    }

    fn bent() -> Molecule {
        molecule! {
            O => (0.0, 0.0, 0.0),
            H => (0.0, 1.43, 1.1),
            H => (0.0, -1.43, 1.1)
        }
    }

    fn bent_springs(molecule: &Molecule) -> Springs {
        let distance = |i: usize, j: usize| {
            (molecule.atoms()[i].position() - molecule.atoms()[j].position()).norm()
        };
        Springs {
            bonds: vec![
                (0, 1, 0.5, distance(0, 1)),
                (0, 2, 0.5, distance(0, 2)),
                (1, 2, 0.1, distance(1, 2)),
            ],
        }
    }

    #[test]
    fn diatomic_spring_frequency() {
        let molecule = molecule! {
            H => (0.0, 0.0, 0.0),
            H => (0.0, 0.0, 1.4)
        };
        let k = 0.37;
        let mut surface = Springs {
            bonds: vec![(0, 1, k, 1.4)],
        };

        let analysis =
            vibrational_analysis(&mut surface, &molecule, &VibrationConfig::default()).unwrap();

        assert_eq!(analysis.rigid_modes, 5);
        assert_eq!(analysis.frequencies.len(), 1);
        let reduced_mass = 0.5 * 1.00782503207 * DALTON_TO_ELECTRON_MASS;
        let expected = (k / reduced_mass).sqrt() * HARTREE_TO_WAVENUMBER;
        assert_relative_eq!(analysis.frequencies[0], expected, max_relative = 1e-6);

        // the stretch moves the atoms against each other along the bond
        let mode = analysis.modes.column(0);
        assert_relative_eq!(mode[2], -mode[5], epsilon = 1e-8);
        assert_relative_eq!(mode[2].abs(), 0.5_f64.sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn bent_molecule_keeps_three_modes() {
        let molecule = bent();
        let analysis = vibrational_analysis(
            &mut bent_springs(&molecule),
            &molecule,
            &VibrationConfig::default(),
        )
        .unwrap();

        assert_eq!(analysis.rigid_modes, 6);
        assert_eq!(analysis.frequencies.len(), 3);
        assert!(analysis.frequencies.iter().all(|&f| f > 100.0));
        assert!(analysis.frequencies.windows(2).all(|pair| pair[0] <= pair[1]));

        // at a stationary point the rigid motions carry no curvature, so the vibrational
        // eigenvalues exhaust the trace of the mass weighted hessian
        let masses = [15.99491461956, 1.00782503207, 1.00782503207];
        let trace = (0..9)
            .map(|i| analysis.hessian[(i, i)] / (masses[i / 3] * DALTON_TO_ELECTRON_MASS))
            .sum::<f64>();
        let eigenvalues = analysis
            .frequencies
            .iter()
            .map(|f| (f / HARTREE_TO_WAVENUMBER).powi(2))
            .sum::<f64>();
        assert_relative_eq!(eigenvalues, trace, max_relative = 1e-4);
    }

    #[test]
    fn frequencies_do_not_depend_on_orientation() {
        let molecule = bent();
        let rotation = Rotation3::from_euler_angles(0.3, -1.1, 0.7);
        let rotated = Molecule::new(
            molecule
                .atoms()
                .iter()
                .map(|atom| {
                    let position = rotation * atom.position() + Vector3::new(0.4, -2.0, 1.0);
                    Atom::new(atom.element_type(), position)
                })
                .collect(),
        );

        let config = VibrationConfig::default();
        let reference = vibrational_analysis(&mut bent_springs(&molecule), &molecule, &config).unwrap();
        let turned = vibrational_analysis(&mut bent_springs(&rotated), &rotated, &config).unwrap();
        for (a, b) in reference.frequencies.iter().zip(&turned.frequencies) {
            assert_relative_eq!(*a, *b, max_relative = 1e-4);
        }
    }

    #[test]
    fn rigid_modes_are_orthonormal() {
        let rigid = rigid_body_modes(&bent());
        assert_eq!(rigid.ncols(), 6);
        assert_relative_eq!(
            rigid.transpose() * &rigid,
            nalgebra::DMatrix::identity(6, 6),
            epsilon = 1e-12
        );

        let atom = molecule! { He => (0.3, 0.0, -1.0) };
        let analysis = harmonic_analysis(&atom, nalgebra::DMatrix::zeros(3, 3)).unwrap();
        assert_eq!(analysis.rigid_modes, 3);
        assert!(analysis.frequencies.is_empty());
    }

    #[test]
    fn rejects_mismatched_hessian() {
        assert!(matches!(
            harmonic_analysis(&bent(), nalgebra::DMatrix::zeros(6, 6)),
            Err(Error::InvalidInput(_))
        ));
        let config = VibrationConfig { displacement: 0.0 };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn hydrogen_stretch_frequency() {
        let basis_set = testing::basis_set("STO-3G");
        let config = ScfConfig {
            convergence: ConvergenceCriteria {
                energy: 1e-11,
                density: 1e-9,
                residual: 1e-9,
                consecutive_cycles: 2,
            },
            ..Default::default()
        };
        let molecule = molecule! {
            H => (0.0, 0.0, -0.673),
            H => (0.0, 0.0, 0.673)
        };
        let mut surface = ScfSurface::new(&SerialCommunicator, &basis_set, &config);

        let analysis =
            vibrational_analysis(&mut surface, &molecule, &VibrationConfig::default()).unwrap();

        assert_eq!(analysis.rigid_modes, 5);
        assert_eq!(analysis.frequencies.len(), 1);
        // d²E/dR² = 0.572787 hartree/bohr² at R = 1.346 bohr
        assert_relative_eq!(analysis.frequencies[0], 5480.54, epsilon = 1.0);
    }
}
