//! Error Types for the mUSD Migration Engine
//!
//! Every failure is terminal for the atomic unit it occurs in. The caller
//! inspects the kind and its values and decides whether to retry.

use core::fmt;

use crate::types::Address;

/// Result type alias for engine operations
pub type MusdResult<T> = Result<T, MusdError>;

/// Main error enum for all engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusdError {
    // ============ Rebalance Errors ============
    /// A precondition of the requested operation does not hold
    PreconditionViolation { reason: &'static str },

    /// A swap or exchange returned less than the minimum accepted
    SlippageExceeded { minimum: u128, actual: u128 },

    /// A redemption needs more mAsset than the caller allowed
    MaxInputExceeded { maximum: u128, required: u128 },

    /// The funding account cannot cover a flash loan shortfall
    InsufficientFunding { required: u128, available: u128 },

    /// The lender was not repaid principal plus fee
    FlashLoanNotRepaid { owed: u128, repaid: u128 },

    /// The lender does not hold enough of the asset
    InsufficientLiquidity { available: u128, requested: u128 },

    // ============ Migration Errors ============
    /// The upgrade has already been executed
    AlreadyMigrated,

    /// The proposal delay has not elapsed yet
    TimelockNotElapsed { ready_at: u64, now: u64 },

    /// No upgrade has been proposed
    NoPendingMigration,

    /// The upgrade initialisation payload could not be decoded
    InvalidPayload,

    /// The live storage diverges from the expected snapshot
    StorageMismatch { field: &'static str, mismatches: u32 },

    // ============ Basket Gating Errors ============
    /// Mint or swap attempted while the basket is recollateralising
    Unhealthy,

    /// Ratio redemption attempted while the basket is recollateralising
    InRecol,

    /// Basket is paused
    ProtocolPaused,

    /// Basket has failed and only exact redemptions remain
    BasketFailed,

    // ============ Asset Errors ============
    /// Asset is not in the basket
    AssetNotFound { asset: Address },

    /// Asset is already in the basket
    AssetAlreadyExists { asset: Address },

    /// Basket already holds the maximum number of assets
    MaxAssetsReached { maximum: u32 },

    /// Asset still holds collateral and cannot be removed
    AssetNotEmpty { asset: Address, vault_balance: u128 },

    /// Operation would push an asset above its weight limit
    ExceedsWeightLimit { asset: Address, weight: u128, max_weight: u128 },

    /// Withdrawal would leave an asset below the minimum weight
    BelowWeightLimit { asset: Address, weight: u128, min_weight: u128 },

    /// Asset is not usable in its current status
    AssetNotNormal { asset: Address },

    // ============ Amount Errors ============
    /// Zero amount not allowed
    ZeroAmount,

    /// Insufficient balance for operation
    InsufficientBalance { available: u128, requested: u128 },

    // ============ Authorization Errors ============
    /// Caller is not authorized for this operation
    Unauthorized { expected: Address, actual: Address },

    /// Only the governor can perform this action
    AdminOnly,

    // ============ Math Errors ============
    /// Arithmetic overflow occurred
    Overflow,

    /// Arithmetic underflow occurred
    Underflow,

    /// Division by zero
    DivisionByZero,

    // ============ Input / State Errors ============
    /// Invalid input parameter
    InvalidInput { param: &'static str, reason: &'static str },

    /// Invalid state transition
    InvalidStateTransition,
}

impl MusdError {
    /// Returns a stable error code for logging/debugging
    pub fn code(&self) -> &'static str {
        match self {
            Self::PreconditionViolation { .. } => "E001_PRECONDITION",
            Self::SlippageExceeded { .. } => "E002_SLIPPAGE",
            Self::MaxInputExceeded { .. } => "E006_MAX_INPUT",
            Self::InsufficientFunding { .. } => "E003_INSUFFICIENT_FUNDING",
            Self::FlashLoanNotRepaid { .. } => "E004_FLASH_NOT_REPAID",
            Self::InsufficientLiquidity { .. } => "E005_INSUFFICIENT_LIQUIDITY",
            Self::AlreadyMigrated => "E010_ALREADY_MIGRATED",
            Self::TimelockNotElapsed { .. } => "E011_TIMELOCK",
            Self::NoPendingMigration => "E012_NO_PENDING_MIGRATION",
            Self::InvalidPayload => "E013_INVALID_PAYLOAD",
            Self::StorageMismatch { .. } => "E014_STORAGE_MISMATCH",
            Self::Unhealthy => "E020_UNHEALTHY",
            Self::InRecol => "E021_IN_RECOL",
            Self::ProtocolPaused => "E022_PAUSED",
            Self::BasketFailed => "E023_BASKET_FAILED",
            Self::AssetNotFound { .. } => "E030_ASSET_NOT_FOUND",
            Self::AssetAlreadyExists { .. } => "E031_ASSET_EXISTS",
            Self::MaxAssetsReached { .. } => "E032_MAX_ASSETS",
            Self::AssetNotEmpty { .. } => "E033_ASSET_NOT_EMPTY",
            Self::ExceedsWeightLimit { .. } => "E034_WEIGHT_LIMIT",
            Self::BelowWeightLimit { .. } => "E036_MIN_WEIGHT_LIMIT",
            Self::AssetNotNormal { .. } => "E035_ASSET_NOT_NORMAL",
            Self::ZeroAmount => "E040_ZERO_AMOUNT",
            Self::InsufficientBalance { .. } => "E041_INSUFFICIENT_BALANCE",
            Self::Unauthorized { .. } => "E050_UNAUTHORIZED",
            Self::AdminOnly => "E051_ADMIN_ONLY",
            Self::Overflow => "E060_OVERFLOW",
            Self::Underflow => "E061_UNDERFLOW",
            Self::DivisionByZero => "E062_DIV_ZERO",
            Self::InvalidInput { .. } => "E070_INVALID_INPUT",
            Self::InvalidStateTransition => "E071_INVALID_STATE",
        }
    }

    /// Returns true if an operator can fix the cause and try again
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TimelockNotElapsed { .. } => true,   // Wait for the delay
            Self::InsufficientFunding { .. } => true,  // Raise allowance
            Self::SlippageExceeded { .. } => true,     // Lower the loan percentage
            Self::InsufficientLiquidity { .. } => true, // Lower the loan percentage
            Self::StorageMismatch { .. } => true,      // Remediate and resolve the halt
            _ => false,
        }
    }
}

impl fmt::Display for MusdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreconditionViolation { reason } => write!(f, "precondition violated: {reason}"),
            Self::SlippageExceeded { minimum, actual } => {
                write!(f, "output {actual} below minimum {minimum}")
            }
            Self::MaxInputExceeded { maximum, required } => {
                write!(f, "redeem mAsset qty {required} > max quantity {maximum}")
            }
            Self::InsufficientFunding { required, available } => {
                write!(f, "funding account covers {available} of {required} shortfall")
            }
            Self::FlashLoanNotRepaid { owed, repaid } => {
                write!(f, "flash loan repaid {repaid} of {owed}")
            }
            Self::TimelockNotElapsed { ready_at, now } => {
                write!(f, "timelock not elapsed: ready at {ready_at}, now {now}")
            }
            Self::StorageMismatch { field, mismatches } => {
                write!(f, "storage mismatch on {field} ({mismatches} total)")
            }
            Self::Unhealthy => f.write_str("Unhealthy"),
            Self::InRecol => f.write_str("In recol"),
            Self::AlreadyMigrated => f.write_str("already upgraded"),
            other => f.write_str(other.code()),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MusdError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_error_codes_unique() {
        let errors = [
            MusdError::PreconditionViolation { reason: "x" },
            MusdError::SlippageExceeded { minimum: 1, actual: 0 },
            MusdError::InsufficientFunding { required: 1, available: 0 },
            MusdError::AlreadyMigrated,
            MusdError::TimelockNotElapsed { ready_at: 1, now: 0 },
            MusdError::Unhealthy,
            MusdError::InRecol,
            MusdError::StorageMismatch { field: "symbol", mismatches: 1 },
            MusdError::Overflow,
        ];

        let codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        let unique: BTreeSet<_> = codes.iter().collect();
        assert_eq!(codes.len(), unique.len(), "Error codes must be unique");
    }

    #[test]
    fn test_gating_messages() {
        assert_eq!(MusdError::Unhealthy.to_string(), "Unhealthy");
        assert_eq!(MusdError::InRecol.to_string(), "In recol");
        assert_eq!(MusdError::AlreadyMigrated.to_string(), "already upgraded");
    }

    #[test]
    fn test_recoverable() {
        assert!(MusdError::TimelockNotElapsed { ready_at: 10, now: 5 }.is_recoverable());
        assert!(!MusdError::AlreadyMigrated.is_recoverable());
    }
}
