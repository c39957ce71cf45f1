use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{atom::Atom, periodic_table::ElementType};

/// A basis set as published: for every element a list of contracted shells. Positions are only
/// attached once the basis is placed on a molecule (see [`super::AoBasis`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasisSet {
    name: String,
    atomic_mapping: HashMap<ElementType, AtomicBasis>,
}

impl BasisSet {
    /// Create a new basis set given mappings from element type to the basis of that element
    pub fn new(name: impl Into<String>, atomic_mapping: HashMap<ElementType, AtomicBasis>) -> Self {
        Self {
            name: name.into(),
            atomic_mapping,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the basis of a given atom, if it exists.
    pub fn for_atom(&self, atom: &Atom) -> Option<&AtomicBasis> {
        self.for_element(atom.element_type)
    }

    pub fn for_element(&self, element: ElementType) -> Option<&AtomicBasis> {
        self.atomic_mapping.get(&element)
    }

    /// Elements covered by this basis set, in atomic number order.
    pub fn elements(&self) -> Vec<ElementType> {
        let mut elements = self.atomic_mapping.keys().copied().collect::<Vec<_>>();
        elements.sort();
        elements
    }
}

/// Represents the shells for a single element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicBasis {
    pub(crate) shells: Vec<ElectronShell>,
}

impl AtomicBasis {
    pub fn shells(&self) -> &[ElectronShell] {
        &self.shells
    }

    /// Number of cartesian basis functions this element contributes.
    pub fn n_functions(&self) -> usize {
        self.shells.iter().map(ElectronShell::n_functions).sum()
    }
}

/// One contracted shell exactly as tabulated: coefficients refer to normalized primitives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElectronShell {
    pub(crate) angular_magnitude: u32,
    pub(crate) exponents: SmallVec<[f64; 6]>,
    pub(crate) coefficients: SmallVec<[f64; 6]>,
}

impl ElectronShell {
    pub fn new(
        angular_magnitude: u32,
        exponents: impl IntoIterator<Item = f64>,
        coefficients: impl IntoIterator<Item = f64>,
    ) -> Self {
        Self {
            angular_magnitude,
            exponents: exponents.into_iter().collect(),
            coefficients: coefficients.into_iter().collect(),
        }
    }

    pub fn angular_magnitude(&self) -> u32 {
        self.angular_magnitude
    }

    pub fn n_functions(&self) -> usize {
        let l = self.angular_magnitude as usize;
        (l + 1) * (l + 2) / 2
    }
}
