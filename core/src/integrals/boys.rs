//! The Boys function F_n(t) = int_0^1 u^(2n) exp(-t u^2) du.

use std::f64::consts::PI;

/// Above this argument F_0 is evaluated from its asymptotic form, which is exact to machine
/// precision there, and higher orders follow by (stable) upward recursion.
const ASYMPTOTIC_LIMIT: f64 = 36.0;

const SERIES_TOLERANCE: f64 = 1e-17;
const SERIES_MAX_TERMS: usize = 400;

/// Writes F_0(t), ..., F_n(t) into `values[..=n]`.
pub(crate) fn boys(n: usize, t: f64, values: &mut [f64]) {
    debug_assert!(values.len() > n);
    debug_assert!(t >= 0.0);

    let exp_t = (-t).exp();

    if t > ASYMPTOTIC_LIMIT {
        values[0] = 0.5 * (PI / t).sqrt();
        for m in 0..n {
            values[m + 1] = ((2 * m + 1) as f64 * values[m] - exp_t) / (2.0 * t);
        }
        return;
    }

    // series for the highest order, then downward recursion
    let mut term = 1.0 / (2 * n + 1) as f64;
    let mut sum = term;
    for k in 0..SERIES_MAX_TERMS {
        term *= 2.0 * t / (2 * n + 2 * k + 3) as f64;
        sum += term;
        if term < SERIES_TOLERANCE * sum {
            break;
        }
    }

    values[n] = exp_t * sum;
    for m in (0..n).rev() {
        values[m] = (2.0 * t * values[m + 1] + exp_t) / (2 * m + 1) as f64;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::boys;

    /// F_n(t) by composite Simpson integration.
    fn reference(n: usize, t: f64) -> f64 {
        let steps = 20_000;
        let h = 1.0 / steps as f64;
        let f = |u: f64| u.powi(2 * n as i32) * (-t * u * u).exp();

        let mut sum = f(0.0) + f(1.0);
        for k in 1..steps {
            let weight = if k % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * f(k as f64 * h);
        }
        sum * h / 3.0
    }

    #[test]
    fn matches_quadrature() {
        let mut values = [0.0; 12];
        for &t in &[0.0, 1e-8, 0.3, 1.0, 5.5, 17.0, 35.9, 36.1, 50.0, 120.0] {
            boys(11, t, &mut values);
            for (n, value) in values.iter().enumerate() {
                assert_relative_eq!(*value, reference(n, t), max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn zero_argument() {
        let mut values = [0.0; 5];
        boys(4, 0.0, &mut values);
        for (n, value) in values.iter().enumerate() {
            assert_relative_eq!(*value, 1.0 / (2 * n + 1) as f64, epsilon = 1e-15);
        }
    }
}
