//! Exchange-correlation functionals and their numerical integration.
mod gga;
mod grid;
mod integrate;
mod lda;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

pub use grid::{GridBatch, GridConfig, MolecularGrid};
pub use integrate::{integrate, xc_gradient, XcMatrices};
pub(crate) use integrate::{integrate_batch, xc_gradient_batch};
pub use gga::Becke88Exchange;
pub use lda::{SlaterExchange, Vwn5Correlation};

/// Per-point output of a functional: energy density per volume, the spin resolved potential
/// dE/dρ_σ and, for gradient dependent functionals, dE/dσ for the invariants
/// σ = [∇ρ_α·∇ρ_α, ∇ρ_α·∇ρ_β, ∇ρ_β·∇ρ_β].
#[derive(Clone, Debug, PartialEq)]
pub struct XcValues {
    pub energy: Vec<f64>,
    pub potential: Vec<[f64; 2]>,
    pub sigma_potential: Vec<[f64; 3]>,
}

impl XcValues {
    pub fn zeros(points: usize) -> Self {
        Self {
            energy: vec![0.0; points],
            potential: vec![[0.0; 2]; points],
            sigma_potential: vec![[0.0; 3]; points],
        }
    }
}

/// The contract of an exchange-correlation functional library: per-point values from the spin
/// densities `[ρ_α, ρ_β]` and, when [`XcFunctional::needs_gradient`] is set, the gradient
/// invariants `sigma` on a set of grid points. Implementations add into `values`, so sums of
/// functionals can share one buffer.
pub trait XcFunctional: Send + Sync + fmt::Debug {
    /// Whether `evaluate` reads the density gradient invariants.
    fn needs_gradient(&self) -> bool {
        false
    }

    fn evaluate(&self, density: &[[f64; 2]], sigma: Option<&[[f64; 3]]>, values: &mut XcValues);
}

/// A weighted sum of functionals.
#[derive(Clone, Debug, Default)]
pub struct CombinedFunctional {
    parts: Vec<Arc<dyn XcFunctional>>,
}

impl CombinedFunctional {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, functional: impl XcFunctional + 'static) -> Self {
        self.parts.push(Arc::new(functional));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl XcFunctional for CombinedFunctional {
    fn needs_gradient(&self) -> bool {
        self.parts.iter().any(|part| part.needs_gradient())
    }

    fn evaluate(&self, density: &[[f64; 2]], sigma: Option<&[[f64; 3]]>, values: &mut XcValues) {
        for part in &self.parts {
            part.evaluate(density, sigma, values);
        }
    }
}

/// Named method presets. Each one fixes the exact-exchange fraction and the semilocal functional.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Coulomb interaction only, no exchange.
    Hartree,
    HartreeFock,
    /// Slater exchange only (Xα with α = 2/3).
    Slater,
    /// Slater exchange with VWN5 correlation.
    Svwn5,
    /// Becke's half-and-half: 1/2 exact exchange, 1/2 Slater exchange, VWN5 correlation.
    HalfAndHalf,
    /// Becke 88 gradient corrected exchange with VWN5 correlation.
    Bvwn5,
    Hybrid {
        exact_exchange: f64,
        slater: f64,
        vwn5: f64,
        #[serde(default)]
        becke88: f64,
    },
}

impl Default for Method {
    fn default() -> Self {
        Self::HartreeFock
    }
}

impl Method {
    /// (exact exchange fraction, slater scale, vwn5 scale, becke88 scale)
    fn weights(&self) -> (f64, f64, f64, f64) {
        match *self {
            Method::Hartree => (0.0, 0.0, 0.0, 0.0),
            Method::HartreeFock => (1.0, 0.0, 0.0, 0.0),
            Method::Slater => (0.0, 1.0, 0.0, 0.0),
            Method::Svwn5 => (0.0, 1.0, 1.0, 0.0),
            Method::HalfAndHalf => (0.5, 0.5, 1.0, 0.0),
            Method::Bvwn5 => (0.0, 0.0, 1.0, 1.0),
            Method::Hybrid {
                exact_exchange,
                slater,
                vwn5,
                becke88,
            } => (exact_exchange, slater, vwn5, becke88),
        }
    }

    /// The exact-exchange fraction.
    pub fn exact_exchange(&self) -> f64 {
        self.weights().0
    }

    /// The semilocal part, if any.
    pub fn functional(&self) -> Option<CombinedFunctional> {
        let (_, slater, vwn5, becke88) = self.weights();
        let mut functional = CombinedFunctional::new();
        if slater != 0.0 {
            functional = functional.with(SlaterExchange { scale: slater });
        }
        if becke88 != 0.0 {
            functional = functional.with(Becke88Exchange { scale: becke88 });
        }
        if vwn5 != 0.0 {
            functional = functional.with(Vwn5Correlation { scale: vwn5 });
        }
        (!functional.is_empty()).then_some(functional)
    }
}

#[cfg(test)]
mod tests {
    use super::{Method, XcFunctional};

    #[test]
    fn presets() {
        assert_eq!(Method::HartreeFock.exact_exchange(), 1.0);
        assert!(Method::HartreeFock.functional().is_none());
        assert!(Method::Hartree.functional().is_none());
        assert_eq!(Method::HalfAndHalf.exact_exchange(), 0.5);
        assert!(Method::Svwn5.functional().is_some());

        let method: Method = serde_json::from_str(r#""half_and_half""#).unwrap();
        assert_eq!(method, Method::HalfAndHalf);
        let method: Method =
            serde_json::from_str(r#"{"hybrid": {"exact_exchange": 0.25, "slater": 0.75, "vwn5": 1.0}}"#)
                .unwrap();
        assert_eq!(method.exact_exchange(), 0.25);
        assert!(!method.functional().unwrap().needs_gradient());

        assert!(Method::Bvwn5.functional().unwrap().needs_gradient());
        assert!(!Method::Svwn5.functional().unwrap().needs_gradient());
    }
}
