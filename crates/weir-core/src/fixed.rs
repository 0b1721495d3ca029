//! Integer fixed-point helpers.
//!
//! All protocol arithmetic is integer-only: monetary amounts are `u64` base
//! units, ratios are WAD-scaled `u128`. Every multiply/divide goes through
//! these checked helpers; intermediates are `u128`, and any overflow
//! surfaces as [`MathError::ArithmeticOverflow`] rather than wrapping.

use crate::constants::WAD;
use crate::error::MathError;

/// `a * b / denom` with a u128 intermediate.
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128, MathError> {
    if denom == 0 {
        return Err(MathError::DivisionByZero);
    }
    Ok(a.checked_mul(b).ok_or(MathError::ArithmeticOverflow)? / denom)
}

/// Product of two WAD-scaled values, WAD-scaled.
pub fn wad_mul(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div(a, b, WAD)
}

/// WAD-scaled quotient `a / b`.
pub fn wad_div(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div(a, WAD, b)
}

/// Scale a base-unit amount by a WAD factor: `amount * factor / WAD`.
///
/// Errors with [`MathError::ArithmeticOverflow`] if the result does not fit
/// back into `u64`.
pub fn scale_amount(amount: u64, factor_wad: u128) -> Result<u64, MathError> {
    let scaled = mul_div(amount as u128, factor_wad, WAD)?;
    u64::try_from(scaled).map_err(|_| MathError::ArithmeticOverflow)
}

/// Apply a basis-point fraction to a base-unit amount.
pub fn bps_of(amount: u64, bps: u128) -> Result<u64, MathError> {
    let scaled = mul_div(amount as u128, bps, crate::constants::BPS_PRECISION)?;
    u64::try_from(scaled).map_err(|_| MathError::ArithmeticOverflow)
}

/// Clamp a WAD value into `[lo, hi]`.
pub fn clamp_wad(value: u128, lo: u128, hi: u128) -> u128 {
    value.max(lo).min(hi)
}

/// Fixed-point exponentiation: computes `(base/precision)^exp` in fixed-point.
///
/// Uses binary exponentiation for O(log n) multiplications. `base` and the
/// return value are fixed-point with `precision` as denominator.
pub fn fixed_pow(base: u128, exp: u64, precision: u128) -> Result<u128, MathError> {
    if precision == 0 {
        return Err(MathError::DivisionByZero);
    }
    if exp == 0 {
        return Ok(precision); // (base/precision)^0 = 1.0
    }

    let mut result = precision;
    let mut b = base;
    let mut e = exp;

    while e > 0 {
        if e & 1 == 1 {
            result = result
                .checked_mul(b)
                .ok_or(MathError::ArithmeticOverflow)?
                / precision;
        }
        e >>= 1;
        if e > 0 {
            b = b
                .checked_mul(b)
                .ok_or(MathError::ArithmeticOverflow)?
                / precision;
        }
    }

    Ok(result)
}
