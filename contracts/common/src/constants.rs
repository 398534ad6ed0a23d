//! Protocol Constants
//!
//! All magic numbers and configuration values for the mUSD migration engine.
//! Values mirror the live mUSD basket parameters at the time of the V2 to V3
//! upgrade.
//!
//! # Network Configuration
//!
//! Use feature flags to compile for different networks:
//! - `mainnet` - Production values (full one week upgrade delay)
//! - Default (no feature) - Testnet values (same delay, looser venue slippage)
//!
//! ```toml
//! # For mainnet deployment:
//! musd-common = { path = "...", features = ["mainnet"] }
//! ```

/// mAsset Token Metadata
pub mod token {
    /// Token name
    pub const NAME: &str = "mStable USD";
    /// Token symbol
    pub const SYMBOL: &str = "mUSD";
    /// Decimal places of the mAsset and of the common (scaled) precision
    pub const DECIMALS: u8 = 18;
}

/// Fixed-point scales
pub mod precision {
    /// 1e18 fixed point used for fees and weights (100% = FULL_SCALE)
    pub const FULL_SCALE: u128 = 1_000_000_000_000_000_000;

    /// Scale of the per-asset ratio (ratio = RATIO_SCALE * 10^(18 - decimals))
    pub const RATIO_SCALE: u128 = 100_000_000;

    /// Common decimals every asset balance is scaled to
    pub const COMMON_DECIMALS: u8 = 18;

    /// Basis points denominator
    pub const BPS_DENOMINATOR: u128 = 10_000;
}

/// Fee Configuration (1e18 fixed point)
pub mod fees {
    /// Swap fee (0.06%)
    pub const SWAP_FEE: u128 = 600_000_000_000_000;

    /// Redemption fee (0.03%)
    pub const REDEMPTION_FEE: u128 = 300_000_000_000_000;

    /// Maximum fee either parameter may be set to (1%)
    pub const MAX_FEE: u128 = 10_000_000_000_000_000;

    /// Cache size (3% of supply held un-lent)
    pub const CACHE_SIZE: u128 = 30_000_000_000_000_000;
}

/// Basket Limits
pub mod basket {
    /// Maximum number of assets in the basket
    pub const MAX_BASSETS: usize = 10;

    /// Default maximum weight of a single asset (100%)
    pub const DEFAULT_MAX_WEIGHT: u128 = super::precision::FULL_SCALE;

    /// Amplification coefficient applied by the upgrade (A = 135, stored * 100)
    pub const DEFAULT_AMP: u64 = 135 * 100;

    /// Invariant minimum weight (5%)
    pub const DEFAULT_MIN_WEIGHT_LIMIT: u128 = 50_000_000_000_000_000;

    /// Invariant maximum weight (65%)
    pub const DEFAULT_MAX_WEIGHT_LIMIT: u128 = 650_000_000_000_000_000;
}

/// Time Constants (seconds)
pub mod time {
    /// One day
    pub const ONE_DAY: u64 = 86_400;

    /// One week
    pub const ONE_WEEK: u64 = 7 * ONE_DAY;

    /// Mandatory delay between proposing and accepting an upgrade
    pub const UPGRADE_DELAY: u64 = ONE_WEEK;
}

/// Rebalancing Parameters
pub mod rebalance {
    /// Basis points that must be allocated across the two destination swaps
    pub const SPLIT_TOTAL_BPS: u16 = 10_000;

    /// Default loan percentage (full loan)
    pub const DEFAULT_LOAN_PERCENT: u8 = 100;

    /// Maximum slippage accepted on basket swaps (1%)
    pub const MAX_BASKET_SLIPPAGE_BPS: u16 = 100;

    /// Maximum slippage accepted on venue offloads
    /// - Mainnet: 1%
    /// - Testnet: 3% (thin test pools)
    #[cfg(feature = "mainnet")]
    pub const MAX_VENUE_SLIPPAGE_BPS: u16 = 100;
    #[cfg(not(feature = "mainnet"))]
    pub const MAX_VENUE_SLIPPAGE_BPS: u16 = 300;

    /// Relative tolerance for planner bookkeeping drift (0.1%)
    pub const PLANNER_DRIFT_TOLERANCE_BPS: u16 = 10;
}

/// Storage Validation Parameters
pub mod validation {
    /// Default relative tolerance for accruing fields (0.1%)
    pub const DEFAULT_TOLERANCE_BPS: u16 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_bounds() {
        assert!(fees::SWAP_FEE < fees::MAX_FEE);
        assert!(fees::REDEMPTION_FEE < fees::MAX_FEE);
    }

    #[test]
    fn test_weight_limits_ordered() {
        assert!(basket::DEFAULT_MIN_WEIGHT_LIMIT < basket::DEFAULT_MAX_WEIGHT_LIMIT);
        assert!(basket::DEFAULT_MAX_WEIGHT_LIMIT <= precision::FULL_SCALE);
    }

    #[test]
    fn test_upgrade_delay_is_one_week() {
        assert_eq!(time::UPGRADE_DELAY, 604_800);
    }
}
