use std::f64::consts::{FRAC_2_PI, PI};

/// (2n - 1)!!, with (-1)!! = 1.
pub(crate) fn double_factorial_odd(n: i32) -> f64 {
    (1..=2 * n - 1).step_by(2).map(|k| k as f64).product()
}

/// Normalization of a primitive x^i*y^j*z^k*exp(-alpha*r^2) with i + j + k = `angular`,
/// excluding the component dependent 1 / sqrt((2i-1)!!(2j-1)!!(2k-1)!!) factor.
pub(crate) fn radial_norm(exponent: f64, angular: u32) -> f64 {
    (FRAC_2_PI * exponent).powi(3).sqrt().sqrt() * (4.0 * exponent).powi(angular as i32).sqrt()
}

/// Component dependent part of the primitive normalization.
pub(crate) fn component_norm([i, j, k]: [i32; 3]) -> f64 {
    (double_factorial_odd(i) * double_factorial_odd(j) * double_factorial_odd(k))
        .sqrt()
        .recip()
}

/// Overlap of two unnormalized primitives x^l*exp(-a*r^2) and x^l*exp(-b*r^2) on the same center.
pub(crate) fn same_center_overlap(a: f64, b: f64, angular: u32) -> f64 {
    let p = a + b;
    double_factorial_odd(angular as i32) / (2.0 * p).powi(angular as i32) * (PI / p).powi(3).sqrt()
}

/// Generate all cartesian exponents (i, j, k) such that i + j + k = angular, in the order
/// xx, xy, xz, yy, yz, zz.
pub(crate) fn cartesian_components(angular: u32) -> Vec<[i32; 3]> {
    let l = angular as i32;
    let mut components = Vec::with_capacity(((l + 1) * (l + 2) / 2) as usize);

    for i in (0..=l).rev() {
        for j in (0..=l - i).rev() {
            components.push([i, j, l - i - j]);
        }
    }

    components
}

/// Evaluates x^n for small non-negative integer n; negative n yields zero (the derivative of a
/// constant polynomial term).
#[inline(always)]
pub(crate) fn monomial(x: f64, n: i32) -> f64 {
    match n {
        n if n < 0 => 0.0,
        0 => 1.0,
        1 => x,
        2 => x * x,
        n => x.powi(n),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{cartesian_components, component_norm, double_factorial_odd, radial_norm};

    #[test]
    fn component_ordering() {
        assert_eq!(cartesian_components(0), vec![[0, 0, 0]]);
        assert_eq!(cartesian_components(1), vec![[1, 0, 0], [0, 1, 0], [0, 0, 1]]);
        assert_eq!(
            cartesian_components(2),
            vec![[2, 0, 0], [1, 1, 0], [1, 0, 1], [0, 2, 0], [0, 1, 1], [0, 0, 2]]
        );
        assert_eq!(cartesian_components(3).len(), 10);
    }

    #[test]
    fn normalization_constants() {
        assert_eq!(double_factorial_odd(0), 1.0);
        assert_eq!(double_factorial_odd(3), 15.0);

        // s-type with exponent 1: (2/pi)^(3/4)
        assert_relative_eq!(radial_norm(1.0, 0), 0.7127054703549902, epsilon = 1e-14);
        assert_relative_eq!(component_norm([2, 0, 0]), 1.0 / 3f64.sqrt(), epsilon = 1e-14);
        assert_relative_eq!(component_norm([1, 1, 0]), 1.0, epsilon = 1e-14);
    }
}
