//! Empirical dispersion corrections, added on top of the electronic energy and forces.
use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{molecule::Molecule, periodic_table::ElementType, units::ANGSTROM_TO_BOHR};

/// J nm^6 mol^-1 to hartree bohr^6.
const C6_TO_ATOMIC_UNITS: f64 = 17.34527758;

/// Energy and per-atom gradient of a dispersion model.
#[derive(Clone, Debug, PartialEq)]
pub struct DispersionTerm {
    pub energy: f64,
    pub gradient: Vec<Vector3<f64>>,
}

/// The contract of a dispersion correction library: a purely geometric, additive term.
pub trait Dispersion: Send + Sync + fmt::Debug {
    fn evaluate(&self, molecule: &Molecule) -> DispersionTerm;
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct NoDispersion;

impl Dispersion for NoDispersion {
    fn evaluate(&self, molecule: &Molecule) -> DispersionTerm {
        DispersionTerm {
            energy: 0.0,
            gradient: vec![Vector3::zeros(); molecule.n_atoms()],
        }
    }
}

/// Grimme's D2 correction.
///
/// [1] S. Grimme, J. Comput. Chem. 27, 1787 (2006).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GrimmeD2 {
    /// global scaling, depends on the functional
    pub s6: f64,
    /// steepness of the damping function
    pub damping: f64,
}

impl Default for GrimmeD2 {
    fn default() -> Self {
        Self {
            s6: 1.0,
            damping: 20.0,
        }
    }
}

/// (C6 in J nm^6 mol^-1, van der Waals radius R0 in angstrom)
fn d2_parameters(element: ElementType) -> (f64, f64) {
    use ElementType::*;
    match element {
        H => (0.14, 1.001),
        He => (0.08, 1.012),
        Li => (1.61, 0.825),
        Be => (1.61, 1.408),
        B => (3.13, 1.485),
        C => (1.75, 1.452),
        N => (1.23, 1.397),
        O => (0.70, 1.342),
        F => (0.75, 1.287),
        Ne => (0.63, 1.243),
        Na => (5.71, 1.144),
        Mg => (5.71, 1.364),
        Al => (10.79, 1.639),
        Si => (9.23, 1.716),
        P => (7.84, 1.705),
        S => (5.57, 1.683),
        Cl => (5.07, 1.639),
        Ar => (4.61, 1.595),
        K => (10.80, 1.485),
        Ca => (10.80, 1.474),
        Sc | Ti | V | Cr | Mn | Fe | Co | Ni | Cu | Zn => (10.80, 1.562),
        Ga => (16.99, 1.649),
        Ge => (17.10, 1.727),
        As => (16.37, 1.760),
        Se => (12.64, 1.771),
        Br => (12.47, 1.749),
        Kr => (12.01, 1.727),
    }
}

impl Dispersion for GrimmeD2 {
    fn evaluate(&self, molecule: &Molecule) -> DispersionTerm {
        let atoms = molecule.atoms();
        let parameters = atoms
            .iter()
            .map(|atom| {
                let (c6, r0) = d2_parameters(atom.element_type());
                (c6 * C6_TO_ATOMIC_UNITS, r0 * ANGSTROM_TO_BOHR)
            })
            .collect::<Vec<_>>();

        let mut energy = 0.0;
        let mut gradient = vec![Vector3::zeros(); atoms.len()];

        for i in 0..atoms.len() {
            for j in 0..i {
                let diff = atoms[i].position() - atoms[j].position();
                let r = diff.norm();
                let c6 = (parameters[i].0 * parameters[j].0).sqrt();
                let r_vdw = parameters[i].1 + parameters[j].1;

                let damping = 1.0 / (1.0 + (-self.damping * (r / r_vdw - 1.0)).exp());
                let d_damping = damping * (1.0 - damping) * self.damping / r_vdw;

                let r6 = r.powi(6);
                energy -= self.s6 * c6 * damping / r6;

                let d_energy = -self.s6 * c6 * (d_damping / r6 - 6.0 * damping / (r6 * r));
                let force = d_energy / r * diff;
                gradient[i] += force;
                gradient[j] -= force;
            }
        }

        DispersionTerm { energy, gradient }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum DispersionConfig {
    #[default]
    None,
    D2 {
        #[serde(default = "default_s6")]
        s6: f64,
        #[serde(default = "default_damping")]
        damping: f64,
    },
}

fn default_s6() -> f64 {
    GrimmeD2::default().s6
}

fn default_damping() -> f64 {
    GrimmeD2::default().damping
}

impl DispersionConfig {
    pub fn build(&self) -> Box<dyn Dispersion> {
        match *self {
            DispersionConfig::None => Box::new(NoDispersion),
            DispersionConfig::D2 { s6, damping } => Box::new(GrimmeD2 { s6, damping }),
        }
    }
}
