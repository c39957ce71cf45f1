use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    atom::Atom,
    error::{Error, Result},
};

/// Represents a molecule: positioned atoms plus the net charge and spin multiplicity of the
/// electronic state being computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    pub(crate) atoms: Vec<Atom>,
    pub(crate) charge: i32,
    pub(crate) multiplicity: u32,
}

impl Molecule {
    /// A neutral molecule in its lowest possible spin state.
    pub fn new(atoms: Vec<Atom>) -> Self {
        let electrons = atoms
            .iter()
            .map(|atom| atom.element_type.atomic_number())
            .sum::<u32>();
        let multiplicity = if electrons % 2 == 0 { 1 } else { 2 };

        Self {
            atoms,
            charge: 0,
            multiplicity,
        }
    }

    pub fn with_state(mut self, charge: i32, multiplicity: u32) -> Result<Self> {
        self.charge = charge;
        self.multiplicity = multiplicity;
        self.spin_occupations()?;
        Ok(self)
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// Returns the number of total electrons in the system
    pub fn n_electrons(&self) -> i64 {
        self.atoms
            .iter()
            .map(|atom| atom.element_type.atomic_number() as i64)
            .sum::<i64>()
            - self.charge as i64
    }

    /// Number of (alpha, beta) electrons for the configured charge and multiplicity.
    pub fn spin_occupations(&self) -> Result<(usize, usize)> {
        let electrons = self.n_electrons();
        let unpaired = self.multiplicity as i64 - 1;

        let invalid = || Error::InvalidElectronConfiguration {
            electrons,
            multiplicity: self.multiplicity,
        };

        if self.multiplicity == 0 || electrons < unpaired || (electrons - unpaired) % 2 != 0 {
            return Err(invalid());
        }

        let n_beta = (electrons - unpaired) / 2;
        Ok(((n_beta + unpaired) as usize, n_beta as usize))
    }

    pub fn nuclear_repulsion(&self) -> f64 {
        let n_atoms = self.atoms.len();

        let mut potential = 0.0;
        for atom_a in 0..n_atoms {
            for atom_b in atom_a + 1..n_atoms {
                let (a, b) = (&self.atoms[atom_a], &self.atoms[atom_b]);
                potential += a.nuclear_charge() * b.nuclear_charge() / (b.position - a.position).norm()
            }
        }
        potential
    }

    /// Derivative of [`Molecule::nuclear_repulsion`] with respect to every nuclear position.
    pub fn nuclear_repulsion_gradient(&self) -> Vec<Vector3<f64>> {
        let mut gradient = vec![Vector3::zeros(); self.atoms.len()];

        for (i, a) in self.atoms.iter().enumerate() {
            for (j, b) in self.atoms.iter().enumerate().skip(i + 1) {
                let diff = a.position - b.position;
                let distance = diff.norm();
                let term = -a.nuclear_charge() * b.nuclear_charge() / distance.powi(3) * diff;
                gradient[i] += term;
                gradient[j] -= term;
            }
        }

        gradient
    }

    /// Cartesian coordinates flattened to (x0, y0, z0, x1, ...).
    pub fn coordinates(&self) -> DVector<f64> {
        DVector::from_iterator(
            3 * self.atoms.len(),
            self.atoms.iter().flat_map(|atom| atom.position.iter().copied()),
        )
    }

    /// Same molecule with the atoms moved to `coordinates` (layout as in
    /// [`Molecule::coordinates`]).
    pub fn with_coordinates(&self, coordinates: &DVector<f64>) -> Self {
        assert_eq!(coordinates.len(), 3 * self.atoms.len());

        let atoms = self
            .atoms
            .iter()
            .enumerate()
            .map(|(i, atom)| Atom {
                position: Vector3::new(
                    coordinates[3 * i],
                    coordinates[3 * i + 1],
                    coordinates[3 * i + 2],
                ),
                ..*atom
            })
            .collect();

        Self {
            atoms,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use crate::molecule;

    #[test]
    fn electron_counts() {
        let water = molecule! {
            O => (0.0, 0.0, 0.0),
            H => (0.0, 1.43, 1.1),
            H => (0.0, -1.43, 1.1)
        };
        assert_eq!(water.n_electrons(), 10);
        assert_eq!(water.spin_occupations().unwrap(), (5, 5));

        let cation = water.clone().with_state(1, 2).unwrap();
        assert_eq!(cation.spin_occupations().unwrap(), (5, 4));

        assert!(water.clone().with_state(0, 2).is_err());
        assert!(water.with_state(0, 0).is_err());

        let hydrogen = molecule! { H => (0.0, 0.0, 0.0) };
        assert_eq!(hydrogen.multiplicity(), 2);
        assert_eq!(hydrogen.spin_occupations().unwrap(), (1, 0));
    }

    #[test]
    fn nuclear_repulsion_gradient_matches_finite_difference() {
        let molecule = molecule! {
            O => (0.0, 0.1, 0.0),
            H => (0.2, 1.43, 1.1),
            H => (0.0, -1.43, 1.0)
        };

        let gradient = molecule.nuclear_repulsion_gradient();
        let coordinates = molecule.coordinates();
        let h = 1e-5;

        for k in 0..coordinates.len() {
            let mut plus = coordinates.clone();
            plus[k] += h;
            let mut minus = coordinates.clone();
            minus[k] -= h;

            let numeric = (molecule.with_coordinates(&plus).nuclear_repulsion()
                - molecule.with_coordinates(&minus).nuclear_repulsion())
                / (2.0 * h);

            assert_relative_eq!(gradient[k / 3][k % 3], numeric, epsilon = 1e-7);
        }

        let total: Vector3<f64> = gradient.iter().sum();
        assert_relative_eq!(total.norm(), 0.0, epsilon = 1e-12);
    }
}
