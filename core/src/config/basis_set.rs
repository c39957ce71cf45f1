use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use serde::Deserialize;

use crate::{
    basis::{AtomicBasis, BasisSet, ElectronShell},
    error::{Error, Result},
    periodic_table::ElementType,
};

/// A basis set in the Basis Set Exchange JSON schema.
#[derive(Deserialize)]
pub struct ConfigBasisSet {
    #[serde(default)]
    name: String,
    elements: HashMap<ElementType, ConfigElectronicConfiguration>,
}

#[derive(Deserialize)]
struct ConfigElectronicConfiguration {
    #[serde(default)]
    electron_shells: Vec<ConfigElectronShell>,
}

#[derive(Deserialize)]
struct ConfigElectronShell {
    function_type: String,
    angular_momentum: Vec<u32>,
    exponents: Vec<String>,
    coefficients: Vec<Vec<String>>,
}

impl ConfigBasisSet {
    pub fn load(path: impl AsRef<Path>) -> Result<BasisSet> {
        let file = File::open(path)?;
        let config: ConfigBasisSet = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::InvalidInput(format!("basis set: {e}")))?;
        config.try_into()
    }
}

fn parse_number(value: &str) -> Result<f64> {
    // Fortran style exponents show up in some exports
    value
        .trim()
        .replace(&['D', 'd'][..], "E")
        .parse::<f64>()
        .map_err(|_| Error::InvalidInput(format!("`{value}` is not a number")))
}

impl TryFrom<ConfigBasisSet> for BasisSet {
    type Error = Error;

    fn try_from(value: ConfigBasisSet) -> Result<Self> {
        let mut atomic_mapping = HashMap::with_capacity(value.elements.len());

        for (element, configuration) in value.elements {
            let mut element_atomic_basis = AtomicBasis::default();

            for electron_shell in &configuration.electron_shells {
                element_atomic_basis
                    .shells
                    .extend(split_shell(electron_shell).map_err(|e| match e {
                        Error::InvalidInput(message) => {
                            Error::InvalidInput(format!("{element}: {message}"))
                        }
                        other => other,
                    })?);
            }

            atomic_mapping.insert(element, element_atomic_basis);
        }

        Ok(Self::new(value.name, atomic_mapping))
    }
}

/// Turns one tabulated shell into plain single-angular-momentum shells. SP shells list one
/// coefficient row per angular momentum; general contractions list several rows for one angular
/// momentum.
fn split_shell(shell: &ConfigElectronShell) -> Result<Vec<ElectronShell>> {
    if shell.function_type != "gto" && !shell.function_type.starts_with("gto_") {
        return Err(Error::InvalidInput(format!(
            "unsupported function type `{}`",
            shell.function_type
        )));
    }

    let exponents = shell
        .exponents
        .iter()
        .map(|e| parse_number(e))
        .collect::<Result<Vec<_>>>()?;

    let angular_momenta = match shell.angular_momentum.as_slice() {
        [] => return Err(Error::InvalidInput("shell without angular momentum".into())),
        &[l] => vec![l; shell.coefficients.len()],
        several if several.len() == shell.coefficients.len() => several.to_vec(),
        _ => {
            return Err(Error::InvalidInput(
                "angular momenta and coefficient rows do not match".into(),
            ))
        }
    };

    let mut shells = Vec::with_capacity(angular_momenta.len());
    for (&l, row) in angular_momenta.iter().zip(&shell.coefficients) {
        if row.len() != exponents.len() {
            return Err(Error::InvalidInput(format!(
                "{} coefficients for {} exponents",
                row.len(),
                exponents.len()
            )));
        }

        let coefficients = row.iter().map(|c| parse_number(c)).collect::<Result<Vec<_>>>()?;

        // drop primitives that do not contribute to this contraction
        let (kept_exponents, kept_coefficients): (Vec<_>, Vec<_>) = exponents
            .iter()
            .zip(coefficients)
            .filter(|(_, c)| *c != 0.0)
            .map(|(&e, c)| (e, c))
            .unzip();

        shells.push(ElectronShell::new(l, kept_exponents, kept_coefficients));
    }

    Ok(shells)
}

#[cfg(test)]
mod tests {
    use crate::{periodic_table::ElementType, testing};

    #[test]
    fn sp_shells_are_split() {
        let basis_set = testing::basis_set("6-31G");
        let oxygen = basis_set.for_element(ElementType::O).unwrap();

        let angular = oxygen
            .shells()
            .iter()
            .map(|shell| shell.angular_magnitude())
            .collect::<Vec<_>>();
        assert_eq!(angular, vec![0, 0, 1, 0, 1]);
        assert_eq!(oxygen.n_functions(), 9);

        let hydrogen = basis_set.for_element(ElementType::H).unwrap();
        assert_eq!(hydrogen.n_functions(), 2);
    }

    #[test]
    fn rejects_malformed_shells() {
        let json = r#"{"elements":{"1":{"electron_shells":[{"function_type":"gto","angular_momentum":[0],"exponents":["1.0","x"],"coefficients":[["1.0","0.5"]]}]}}}"#;
        let config: super::ConfigBasisSet = serde_json::from_str(json).unwrap();
        assert!(crate::basis::BasisSet::try_from(config).is_err());

        let json = r#"{"elements":{"1":{"electron_shells":[{"function_type":"sto","angular_momentum":[0],"exponents":["1.0"],"coefficients":[["1.0"]]}]}}}"#;
        let config: super::ConfigBasisSet = serde_json::from_str(json).unwrap();
        assert!(crate::basis::BasisSet::try_from(config).is_err());
    }
}
