//! Validation Helpers
//!
//! Reusable guard functions shared by the basket engine, the rebalancer and
//! the migration state machine.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use musd_common::validation::{check, require_positive};
//!
//! check!(amount > 0, MusdError::ZeroAmount);
//! require_positive(amount)?;
//! ```

use crate::{
    errors::{MusdError, MusdResult},
    types::{Address, BasketFlags},
};

// ============ Validation Macro ============

/// Check a condition and return an error if it fails.
///
/// ```rust,ignore
/// check!(
///     split_total == 10_000,
///     MusdError::PreconditionViolation { reason: "splits must sum to 10000 bps" }
/// );
/// ```
#[macro_export]
macro_rules! check {
    ($condition:expr, $error:expr) => {
        if !($condition) {
            return Err($error);
        }
    };
}

pub use check;

// ============ Amount Checks ============

/// Require a non-zero amount
pub fn require_positive(value: u128) -> MusdResult<()> {
    if value == 0 {
        return Err(MusdError::ZeroAmount);
    }
    Ok(())
}

/// Require that an output meets the caller's minimum
pub fn require_min_output(actual: u128, minimum: u128) -> MusdResult<()> {
    if actual < minimum {
        return Err(MusdError::SlippageExceeded { minimum, actual });
    }
    Ok(())
}

/// Require sufficient balance for a debit
pub fn require_sufficient_balance(available: u128, requested: u128) -> MusdResult<()> {
    if available < requested {
        return Err(MusdError::InsufficientBalance { available, requested });
    }
    Ok(())
}

// ============ Authorization Checks ============

/// Require that the signer is the governor
pub fn require_admin(admin: Address, signer: Address) -> MusdResult<()> {
    if admin != signer {
        return Err(MusdError::AdminOnly);
    }
    Ok(())
}

/// Require a non-zero address
pub fn require_valid_address(address: Address, param: &'static str) -> MusdResult<()> {
    if address == [0u8; 32] {
        return Err(MusdError::InvalidInput { param, reason: "zero address" });
    }
    Ok(())
}

// ============ Basket State Checks ============

/// Require the basket is not paused
pub fn require_not_paused(is_paused: bool) -> MusdResult<()> {
    if is_paused {
        return Err(MusdError::ProtocolPaused);
    }
    Ok(())
}

/// Gate for mint and swap: fails with `Unhealthy` while recollateralising
pub fn require_healthy(flags: &BasketFlags) -> MusdResult<()> {
    if flags.failed {
        return Err(MusdError::BasketFailed);
    }
    if flags.undergoing_recol {
        return Err(MusdError::Unhealthy);
    }
    Ok(())
}

/// Gate for ratio redemptions: fails with `InRecol` while recollateralising
pub fn require_not_in_recol(flags: &BasketFlags) -> MusdResult<()> {
    if flags.undergoing_recol {
        return Err(MusdError::InRecol);
    }
    Ok(())
}
