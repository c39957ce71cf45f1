use std::path::Path;

use nalgebra::Vector3;
use serde::Deserialize;

use crate::{
    atom::Atom,
    error::{Error, Result},
    molecule::Molecule,
    periodic_table::ElementType,
    units::ANGSTROM_TO_BOHR,
};

/// Represents a full molecule in a config file.
/// Either a bare list of positioned atoms (bohr, neutral, lowest spin) or an object that also sets
/// charge, multiplicity and length unit.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ConfigMolecule {
    Atoms(Vec<ConfigAtom>),
    Full {
        atoms: Vec<ConfigAtom>,
        #[serde(default)]
        charge: i32,
        multiplicity: Option<u32>,
        #[serde(default)]
        units: LengthUnit,
    },
}

#[derive(Deserialize)]
pub struct ConfigAtom {
    element: ElementType,
    position: Vec<f64>,
}

#[derive(Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    #[default]
    Bohr,
    Angstrom,
}

impl LengthUnit {
    fn scale(self) -> f64 {
        match self {
            LengthUnit::Bohr => 1.0,
            LengthUnit::Angstrom => ANGSTROM_TO_BOHR,
        }
    }
}

impl ConfigMolecule {
    /// Load a molecule from a `.json` or `.xyz` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Molecule> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("xyz") => parse_xyz(&contents),
            _ => serde_json::from_str::<ConfigMolecule>(&contents)
                .map_err(|e| Error::InvalidInput(format!("molecule: {e}")))?
                .try_into(),
        }
    }
}

fn build_atoms(config_atoms: Vec<ConfigAtom>, scale: f64) -> Result<Vec<Atom>> {
    config_atoms
        .into_iter()
        .map(|atom| {
            let &[x, y, z] = atom.position.as_slice() else {
                return Err(Error::InvalidInput(format!(
                    "{} needs exactly three coordinates, got {}",
                    atom.element,
                    atom.position.len()
                )));
            };

            Ok(Atom::new(atom.element, scale * Vector3::new(x, y, z)))
        })
        .collect()
}

impl TryFrom<ConfigMolecule> for Molecule {
    type Error = Error;

    fn try_from(value: ConfigMolecule) -> Result<Self> {
        match value {
            ConfigMolecule::Atoms(atoms) => Ok(Molecule::new(build_atoms(atoms, 1.0)?)),
            ConfigMolecule::Full {
                atoms,
                charge,
                multiplicity,
                units,
            } => {
                let molecule = Molecule::new(build_atoms(atoms, units.scale())?);
                let electrons = molecule.n_electrons() - charge as i64;
                let multiplicity = multiplicity.unwrap_or(if electrons % 2 == 0 { 1 } else { 2 });
                molecule.with_state(charge, multiplicity)
            }
        }
    }
}

/// Parses the XYZ format: atom count, comment line, then `symbol x y z` lines in angstrom.
pub fn parse_xyz(contents: &str) -> Result<Molecule> {
    let mut lines = contents.lines();

    let count = lines
        .next()
        .and_then(|line| line.trim().parse::<usize>().ok())
        .ok_or_else(|| Error::InvalidInput("xyz: first line must hold the atom count".into()))?;
    let _comment = lines.next();

    let mut atoms = Vec::with_capacity(count);
    for line in lines.filter(|line| !line.trim().is_empty()).take(count) {
        let mut fields = line.split_whitespace();
        let symbol = fields.next().unwrap_or_default();
        let element = ElementType::from_symbol(symbol)
            .ok_or_else(|| Error::InvalidInput(format!("xyz: unknown element `{symbol}`")))?;

        let coordinates = fields
            .take(3)
            .map(|field| field.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidInput(format!("xyz: {e} in `{line}`")))?;

        let &[x, y, z] = coordinates.as_slice() else {
            return Err(Error::InvalidInput(format!("xyz: missing coordinates in `{line}`")));
        };

        atoms.push(Atom::new(element, ANGSTROM_TO_BOHR * Vector3::new(x, y, z)));
    }

    if atoms.len() != count {
        return Err(Error::InvalidInput(format!(
            "xyz: expected {count} atoms, found {}",
            atoms.len()
        )));
    }

    Ok(Molecule::new(atoms))
}
