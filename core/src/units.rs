//! Conversion constants. The engine works in atomic units (bohr, hartree) throughout.

pub const BOHR_TO_ANGSTROM: f64 = 0.529_177_210_903;
pub const ANGSTROM_TO_BOHR: f64 = 1.0 / BOHR_TO_ANGSTROM;

/// Atomic unit of electric dipole moment in debye.
pub const AU_TO_DEBYE: f64 = 2.541_746_473;

/// Dalton (unified atomic mass unit) in electron masses.
pub const DALTON_TO_ELECTRON_MASS: f64 = 1_822.888_486_209;

/// Hartree in wavenumbers (cm⁻¹).
pub const HARTREE_TO_WAVENUMBER: f64 = 219_474.631_363_2;
