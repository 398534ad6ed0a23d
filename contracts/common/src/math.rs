//! Mathematical Utilities for the mUSD Migration Engine
//!
//! Checked fixed-point helpers for decimal scaling, fees, basis-point splits
//! and relative tolerance comparisons.

use crate::constants::precision::{BPS_DENOMINATOR, COMMON_DECIMALS, FULL_SCALE, RATIO_SCALE};
use crate::constants::rebalance::SPLIT_TOTAL_BPS;
use crate::errors::{MusdError, MusdResult};
use ethnum::U256;

/// Ratio of an asset with the given native decimals
///
/// ratio = 1e8 * 10^(18 - decimals)
pub fn ratio_for_decimals(decimals: u8) -> MusdResult<u128> {
    if decimals > COMMON_DECIMALS {
        return Err(MusdError::InvalidInput {
            param: "decimals",
            reason: "asset precision above common precision",
        });
    }
    let exponent = u32::from(COMMON_DECIMALS - decimals);
    10u128
        .checked_pow(exponent)
        .and_then(|factor| factor.checked_mul(RATIO_SCALE))
        .ok_or(MusdError::Overflow)
}

/// Convert a native amount into common (18 decimal) precision
pub fn to_scaled(amount: u128, ratio: u128) -> MusdResult<u128> {
    mul_div(amount, ratio, RATIO_SCALE)
}

/// Convert a common precision amount into native precision (rounds down)
pub fn to_native(scaled: u128, ratio: u128) -> MusdResult<u128> {
    mul_div(scaled, RATIO_SCALE, ratio)
}

/// a * b / denominator with a 256-bit intermediate, rounding down
///
/// Basket totals in common precision reach 1e26, so products against 1e18
/// fractions do not fit in u128.
pub fn mul_div(a: u128, b: u128, denominator: u128) -> MusdResult<u128> {
    if denominator == 0 {
        return Err(MusdError::DivisionByZero);
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / denominator);
    }

    let quotient = U256::from(a) * U256::from(b) / U256::from(denominator);
    if quotient > U256::from(u128::MAX) {
        return Err(MusdError::Overflow);
    }
    Ok(quotient.as_u128())
}

/// Multiply by a 1e18 fixed-point fraction, truncating
pub fn mul_truncate(amount: u128, fraction: u128) -> MusdResult<u128> {
    mul_div(amount, fraction, FULL_SCALE)
}

/// Divide producing a 1e18 fixed-point fraction
pub fn div_precisely(numerator: u128, denominator: u128) -> MusdResult<u128> {
    mul_div(numerator, FULL_SCALE, denominator)
}

/// amount * bps / 10000
pub fn apply_bps(amount: u128, bps: u16) -> MusdResult<u128> {
    amount
        .checked_mul(u128::from(bps))
        .ok_or(MusdError::Overflow)?
        .checked_div(BPS_DENOMINATOR)
        .ok_or(MusdError::DivisionByZero)
}

/// Minimum acceptable output given an expected output and a slippage bound
pub fn min_output(expected: u128, max_slippage_bps: u16) -> MusdResult<u128> {
    if u128::from(max_slippage_bps) > BPS_DENOMINATOR {
        return Err(MusdError::InvalidInput { param: "max_slippage_bps", reason: "above 100%" });
    }
    apply_bps(expected, (BPS_DENOMINATOR as u16) - max_slippage_bps)
}

/// Split an amount across two basis-point shares that must sum to 10000
///
/// Each share rounds down, so the two parts recover `amount` to within one
/// unit.
pub fn split_by_bps(amount: u128, splits_bps: [u16; 2]) -> MusdResult<[u128; 2]> {
    let total = splits_bps[0].checked_add(splits_bps[1]).ok_or(MusdError::Overflow)?;
    if total != SPLIT_TOTAL_BPS {
        return Err(MusdError::PreconditionViolation { reason: "splits must sum to 10000 bps" });
    }
    Ok([apply_bps(amount, splits_bps[0])?, apply_bps(amount, splits_bps[1])?])
}

/// Returns true if `actual` is within `tolerance_bps` of `expected`, relative
/// to the larger of the two
pub fn within_tolerance(actual: u128, expected: u128, tolerance_bps: u16) -> bool {
    let larger = actual.max(expected);
    let diff = actual.abs_diff(expected);
    match (
        diff.checked_mul(BPS_DENOMINATOR),
        larger.checked_mul(u128::from(tolerance_bps)),
    ) {
        (Some(lhs), Some(rhs)) => lhs <= rhs,
        // Values near u128::MAX: compare the scaled-down forms instead
        _ => diff / u128::from(tolerance_bps.max(1)) <= larger / BPS_DENOMINATOR,
    }
}

/// Relative difference in bps, rounded up (0 when both are zero)
pub fn relative_diff_bps(a: u128, b: u128) -> u128 {
    let larger = a.max(b);
    if larger == 0 {
        return 0;
    }
    let diff = a.abs_diff(b);
    match diff.checked_mul(BPS_DENOMINATOR) {
        Some(scaled) => scaled.div_ceil(larger),
        None => BPS_DENOMINATOR,
    }
}

/// Convert to a signed value for target distance arithmetic
pub fn to_signed(value: u128) -> MusdResult<i128> {
    i128::try_from(value).map_err(|_| MusdError::Overflow)
}

/// Checked sum of a slice
pub fn checked_sum(values: &[u128]) -> MusdResult<u128> {
    values
        .iter()
        .try_fold(0u128, |acc, &v| acc.checked_add(v))
        .ok_or(MusdError::Overflow)
}
