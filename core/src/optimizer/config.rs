use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// bohr
    pub initial_trust_radius: f64,
    pub min_trust_radius: f64,
    pub max_trust_radius: f64,
    /// Applied when the model predicted the energy change well and the step hit the radius.
    pub grow_factor: f64,
    /// Applied to the radius after a rejected step or a poor prediction.
    pub shrink_factor: f64,
    /// A step is rejected when the energy rises by more than this fraction of the predicted
    /// decrease.
    pub rejection_tolerance: f64,
    /// Consecutive rejected steps before giving up.
    pub max_rejections: usize,
    /// Largest cartesian gradient component at convergence, hartree/bohr.
    pub force_threshold: f64,
    /// Norm of the next proposed step at convergence, bohr.
    pub step_threshold: f64,
    pub max_steps: usize,
    /// Diagonal of the initial Hessian, hartree/bohr^2.
    pub initial_hessian: f64,
    /// Secant pairs kept for the Hessian update.
    pub history: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            initial_trust_radius: 0.3,
            min_trust_radius: 1e-3,
            max_trust_radius: 1.0,
            grow_factor: 2.0,
            shrink_factor: 0.25,
            rejection_tolerance: 0.01,
            max_rejections: 5,
            force_threshold: 4.5e-4,
            step_threshold: 1.8e-3,
            max_steps: 100,
            initial_hessian: 0.5,
            history: 10,
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        let radii = [self.min_trust_radius, self.initial_trust_radius, self.max_trust_radius];
        if radii.iter().any(|r| !r.is_finite() || *r <= 0.0) || radii.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidConfig(format!(
                "trust radii must satisfy 0 < min <= initial <= max, got {radii:?}"
            )));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) || self.grow_factor < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "need 0 < shrink_factor < 1 <= grow_factor, got {} and {}",
                self.shrink_factor, self.grow_factor
            )));
        }
        if self.max_rejections == 0 || self.max_steps == 0 {
            return Err(Error::InvalidConfig(
                "max_rejections and max_steps must be positive".into(),
            ));
        }
        if self.initial_hessian <= 0.0 || self.rejection_tolerance < 0.0 {
            return Err(Error::InvalidConfig(
                "initial_hessian must be positive and rejection_tolerance non-negative".into(),
            ));
        }
        Ok(())
    }
}
