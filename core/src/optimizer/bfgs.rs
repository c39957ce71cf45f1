use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// One accepted step and the gradient change it caused.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecantPair {
    pub step: DVector<f64>,
    pub gradient_change: DVector<f64>,
}

/// B += y y^T / (s^T y) - (B s)(B s)^T / (s^T B s). Skipped when the curvature condition
/// s^T y > 0 fails, which keeps B positive definite.
pub(crate) fn bfgs_update(hessian: &mut DMatrix<f64>, pair: &SecantPair) -> bool {
    let (s, y) = (&pair.step, &pair.gradient_change);
    let s_y = s.dot(y);
    let hs = &*hessian * s;
    let s_hs = s.dot(&hs);

    let tolerance = 1e-8 * s.norm() * y.norm().max(1.0);
    if !s_y.is_finite() || s_y <= tolerance || !s_hs.is_finite() || s_hs <= 0.0 {
        log::debug!("skipping Hessian update, s·y = {s_y:.3e}");
        return false;
    }

    *hessian += y * y.transpose() / s_y - &hs * hs.transpose() / s_hs;
    let symmetric = (&*hessian + hessian.transpose()) * 0.5;
    *hessian = symmetric;
    true
}

/// The scaled identity updated with every stored pair, oldest first.
pub(crate) fn approximate_hessian(
    dimension: usize,
    initial: f64,
    history: &VecDeque<SecantPair>,
) -> DMatrix<f64> {
    let mut hessian = DMatrix::identity(dimension, dimension) * initial;
    for pair in history {
        bfgs_update(&mut hessian, pair);
    }
    hessian
}

/// Newton step -B^-1 g, scaled back onto the trust radius when it is longer.
pub(crate) fn trust_region_step(
    hessian: &DMatrix<f64>,
    gradient: &DVector<f64>,
    radius: f64,
) -> DVector<f64> {
    let step = match hessian.clone().cholesky() {
        Some(cholesky) => -cholesky.solve(gradient),
        None => {
            log::warn!("approximate Hessian is not positive definite, taking a gradient step");
            -gradient
        }
    };

    let norm = step.norm();
    if norm > radius {
        step * (radius / norm)
    } else {
        step
    }
}

/// Energy change the quadratic model expects for `step`.
pub(crate) fn predicted_change(
    hessian: &DMatrix<f64>,
    gradient: &DVector<f64>,
    step: &DVector<f64>,
) -> f64 {
    gradient.dot(step) + 0.5 * step.dot(&(hessian * step))
}
