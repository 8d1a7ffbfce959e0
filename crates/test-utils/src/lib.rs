//! Shared test utilities for the xcube workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic cube generators
//! - Store parameter fixtures and temporary store roots
//! - Skip macros for tests needing external services
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your integration tests:
//!
//! ```ignore
//! use test_utils::{new_cube, require_env};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Macro to skip a test if an environment variable is not set.
///
/// Tests against external services (an S3 endpoint, a callback API) read
/// their location from the environment and are skipped when it is absent.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_env;
///
/// #[test]
/// fn test_s3_roundtrip() {
///     let endpoint = require_env!("XCUBE_TEST_S3_ENDPOINT");
///     // Test code using endpoint...
/// }
/// ```
#[macro_export]
macro_rules! require_env {
    ($name:expr) => {{
        match ::std::env::var($name) {
            Ok(value) if !value.is_empty() => value,
            _ => {
                eprintln!("SKIPPED: environment variable '{}' is not set.", $name);
                return;
            }
        }
    }};
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Macro asserting that two variables hold the same dimensions and values.
///
/// NaN values compare equal to each other.
#[macro_export]
macro_rules! assert_variables_eq {
    ($left:expr, $right:expr) => {{
        let left: &::xcube_core::store::Variable = &$left;
        let right: &::xcube_core::store::Variable = &$right;
        assert_eq!(left.dims, right.dims, "dimension names differ");
        assert_eq!(left.shape, right.shape, "shapes differ");
        for (i, (a, b)) in left.data.iter().zip(&right.data).enumerate() {
            if !(a == b || (a.is_nan() && b.is_nan())) {
                panic!("values differ at index {}: {} != {}", i, a, b);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_assert_variables_eq_treats_nan_as_equal() {
        let a = xcube_core::store::Variable::vector("x", vec![1.0, f64::NAN]);
        assert_variables_eq!(a, a.clone());
    }

    #[test]
    #[should_panic(expected = "values differ")]
    fn test_assert_variables_eq_fails() {
        let a = xcube_core::store::Variable::vector("x", vec![1.0, 2.0]);
        let b = xcube_core::store::Variable::vector("x", vec![1.0, 3.0]);
        assert_variables_eq!(a, b);
    }

    fn probe(reached: &mut bool) {
        let _value = require_env!("XCUBE_TEST_SURELY_UNSET_VARIABLE");
        *reached = true;
    }

    #[test]
    fn test_require_env_skips() {
        let mut reached = false;
        probe(&mut reached);
        assert!(!reached);
    }
}
