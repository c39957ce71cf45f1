//! Reference data shared by tests and benchmarks.
use crate::{
    basis::BasisSet,
    config::ConfigBasisSet,
    error::{Error, Result},
};

const STO_3G: &str = include_str!("../data/basis/STO-3G.json");
const B_6_31G: &str = include_str!("../data/basis/6-31G.json");

/// Builds a neutral molecule in its lowest spin state from `Element => (x, y, z)` pairs in bohr.
#[macro_export]
macro_rules! molecule {
    ($(
        $element:ident => ($x:expr, $y:expr, $z:expr)
    ),* $(,)?) => {
        $crate::molecule::Molecule::new(vec![
            $($crate::atom::Atom::new(
                $crate::periodic_table::ElementType::$element,
                ::nalgebra::Vector3::new($x, $y, $z),
            )),*
        ])
    };
}

/// One of the bundled basis sets, `STO-3G` or `6-31G`.
pub fn load_basis_set(name: &str) -> Result<BasisSet> {
    let json = match name {
        "STO-3G" => STO_3G,
        "6-31G" => B_6_31G,
        other => return Err(Error::InvalidInput(format!("no bundled basis set `{other}`"))),
    };

    let config: ConfigBasisSet = serde_json::from_str(json)
        .map_err(|e| Error::InvalidInput(format!("basis set {name}: {e}")))?;
    config.try_into()
}

/// Like [`load_basis_set`], panicking on unknown names.
pub fn basis_set(name: &str) -> BasisSet {
    match load_basis_set(name) {
        Ok(basis_set) => basis_set,
        Err(e) => panic!("{e}"),
    }
}

#[cfg(test)]
mod tests {
    use crate::periodic_table::ElementType;

    #[test]
    fn bundled_sets_load() {
        let sto = super::basis_set("STO-3G");
        assert_eq!(sto.name(), "STO-3G");
        assert_eq!(
            sto.elements(),
            vec![ElementType::H, ElementType::He, ElementType::C, ElementType::N, ElementType::O]
        );

        let split = super::basis_set("6-31G");
        assert_eq!(split.for_element(ElementType::Cl).unwrap().n_functions(), 13);
        assert!(super::load_basis_set("cc-pVDZ").is_err());
    }
}
