//! Math operations served by the API.
//!
//! Integer results are exact [`BigUint`] values; only the input ranges are
//! bounded.

use num_bigint::BigUint;
use thiserror::Error;

pub const MAX_FIBONACCI_N: u64 = 10_000;
pub const MAX_FACTORIAL_N: u64 = 1_000;
pub const MAX_ABS_BASE: f64 = 1e6;
pub const MAX_ABS_EXPONENT: f64 = 1_000.0;

#[derive(Error, Debug, PartialEq)]
pub enum MathError {
    #[error("{name} must be between {min} and {max}")]
    OutOfRange {
        name: &'static str,
        min: String,
        max: String,
    },
}

fn check_n(n: u64, max: u64) -> Result<(), MathError> {
    if n > max {
        return Err(MathError::OutOfRange {
            name: "n",
            min: "0".to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

/// The n-th Fibonacci number, with `fibonacci(0) == 0`.
pub fn fibonacci(n: u64) -> Result<BigUint, MathError> {
    check_n(n, MAX_FIBONACCI_N)?;

    let (mut a, mut b) = (BigUint::from(0u32), BigUint::from(1u32));
    for _ in 0..n {
        let next = &a + &b;
        a = std::mem::replace(&mut b, next);
    }
    Ok(a)
}

pub fn factorial(n: u64) -> Result<BigUint, MathError> {
    check_n(n, MAX_FACTORIAL_N)?;

    Ok((2..=n).fold(BigUint::from(1u32), |acc, i| acc * i))
}

/// `base` raised to `exponent`. May be infinite or NaN.
pub fn power(base: f64, exponent: f64) -> Result<f64, MathError> {
    if !(-MAX_ABS_BASE..=MAX_ABS_BASE).contains(&base) {
        return Err(MathError::OutOfRange {
            name: "base",
            min: (-MAX_ABS_BASE).to_string(),
            max: MAX_ABS_BASE.to_string(),
        });
    }
    if !(-MAX_ABS_EXPONENT..=MAX_ABS_EXPONENT).contains(&exponent) {
        return Err(MathError::OutOfRange {
            name: "exponent",
            min: (-MAX_ABS_EXPONENT).to_string(),
            max: MAX_ABS_EXPONENT.to_string(),
        });
    }
    Ok(base.powf(exponent))
}
