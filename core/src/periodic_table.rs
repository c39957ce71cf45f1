use std::fmt;

use serde::{Deserialize, Serialize};

use crate::units::ANGSTROM_TO_BOHR;

macro_rules! elements {
    ($($element:ident = $number:literal, $radius:literal, $mass:literal;)*) => {
        /// Chemical elements supported by the engine, discriminant = atomic number.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        #[repr(u8)]
        pub enum ElementType {
            $($element = $number),*
        }

        impl ElementType {
            pub const ALL: &'static [ElementType] = &[$(ElementType::$element),*];

            pub fn symbol(self) -> &'static str {
                match self {
                    $(ElementType::$element => stringify!($element)),*
                }
            }

            /// Bragg-Slater radius in angstrom.
            fn bragg_radius_angstrom(self) -> f64 {
                match self {
                    $(ElementType::$element => $radius),*
                }
            }

            /// Mass of the most abundant isotope in dalton.
            pub fn isotope_mass(self) -> f64 {
                match self {
                    $(ElementType::$element => $mass),*
                }
            }
        }
    };
}

elements! {
    H = 1, 0.35, 1.00782503207;
    He = 2, 1.40, 4.00260325415;
    Li = 3, 1.45, 7.01600455;
    Be = 4, 1.05, 9.0121822;
    B = 5, 0.85, 11.0093054;
    C = 6, 0.70, 12.0;
    N = 7, 0.65, 14.0030740048;
    O = 8, 0.60, 15.99491461956;
    F = 9, 0.50, 18.99840322;
    Ne = 10, 1.50, 19.9924401754;
    Na = 11, 1.80, 22.9897692809;
    Mg = 12, 1.50, 23.9850417;
    Al = 13, 1.25, 26.98153863;
    Si = 14, 1.10, 27.9769265325;
    P = 15, 1.00, 30.97376163;
    S = 16, 1.00, 31.972071;
    Cl = 17, 1.00, 34.96885268;
    Ar = 18, 1.80, 39.9623831225;
    K = 19, 2.20, 38.96370668;
    Ca = 20, 1.80, 39.96259098;
    Sc = 21, 1.60, 44.9559119;
    Ti = 22, 1.40, 47.9479463;
    V = 23, 1.35, 50.9439595;
    Cr = 24, 1.40, 51.9405075;
    Mn = 25, 1.40, 54.9380451;
    Fe = 26, 1.40, 55.9349375;
    Co = 27, 1.35, 58.933195;
    Ni = 28, 1.35, 57.9353429;
    Cu = 29, 1.35, 62.9295975;
    Zn = 30, 1.35, 63.9291422;
    Ga = 31, 1.30, 68.9255736;
    Ge = 32, 1.25, 73.9211778;
    As = 33, 1.15, 74.9215965;
    Se = 34, 1.15, 79.9165213;
    Br = 35, 1.15, 78.9183371;
    Kr = 36, 1.90, 83.911507;
}

impl ElementType {
    pub fn atomic_number(self) -> u32 {
        self as u32
    }

    pub fn from_atomic_number(number: u32) -> Option<Self> {
        Self::ALL.get((number as usize).checked_sub(1)?).copied()
    }

    /// Case-insensitive symbol lookup ("h", "He", "CL" all work).
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|element| element.symbol().eq_ignore_ascii_case(symbol.trim()))
    }

    /// Bragg-Slater radius in bohr, used to scale the radial integration grid.
    pub fn bragg_radius(self) -> f64 {
        self.bragg_radius_angstrom() * ANGSTROM_TO_BOHR
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl TryFrom<String> for ElementType {
    type Error = String;

    /// Accepts either a symbol or an atomic number ("8"), the latter being how Basis Set Exchange
    /// files key their elements.
    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parsed = match value.trim().parse::<u32>() {
            Ok(number) => Self::from_atomic_number(number),
            Err(_) => Self::from_symbol(&value),
        };

        parsed.ok_or_else(|| format!("unknown element `{value}`"))
    }
}

impl From<ElementType> for String {
    fn from(value: ElementType) -> Self {
        value.symbol().to_owned()
    }
}
