//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into `[min, max]`.
///
/// NaN values are passed through unchanged, callers must check finiteness
/// themselves if it matters.
pub fn clamp<T>(value: T, min: T, max: T) -> T 
where
    T: Float
{
    let mut ret = value;

    if ret > max {
        ret = max
    }
    if ret < min {
        ret = min
    }

    ret
}

/// Clamp a value into `[-limit, limit]`.
pub fn clamp_sym<T>(value: T, limit: T) -> T
where
    T: Float
{
    clamp(value, -limit, limit)
}

/// Wrap an angle into the range `(-pi, pi]`.
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: Float
{
    let pi_t: T = T::from(std::f64::consts::PI).unwrap_or_else(T::zero);
    let tau_t: T = pi_t + pi_t;

    // rem_euclid gives [0, 2pi), shift so that pi maps to pi rather than -pi
    let wrapped = pi_t - rem_euclid(pi_t - angle, tau_t);

    if wrapped <= -pi_t {
        wrapped + tau_t
    }
    else {
        wrapped
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
/// 
/// This function is taken from the std library as num is missing it.
///
/// In particular, the return value `r` satisfies `0.0 <= r < rhs.abs()` in
/// most cases. However, due to a floating point round-off error it can
/// result in `r == rhs.abs()`, violating the mathematical definition, if
/// `self` is much smaller than `rhs.abs()` in magnitude and `self < 0.0`.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    const PI: f64 = std::f64::consts::PI;
    const TAU: f64 = std::f64::consts::TAU;

    #[test]
    fn test_wrap_to_pi() {
        assert_relative_eq!(wrap_to_pi(0.5f64), 0.5, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(-0.5f64), -0.5, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(-PI), PI, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(TAU + 0.25), 0.25, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(-TAU - 0.25), -0.25, epsilon = 1e-12);
        assert_relative_eq!(wrap_to_pi(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(2.0, -1.0, 1.0), 1.0);
        assert_eq!(clamp(-2.0, -1.0, 1.0), -1.0);
        assert_eq!(clamp(0.3, -1.0, 1.0), 0.3);
        assert_eq!(clamp_sym(-5.0, 0.5), -0.5);
        assert!(clamp(std::f64::NAN, -1.0, 1.0).is_nan());
    }
}
