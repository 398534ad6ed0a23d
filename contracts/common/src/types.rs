//! Core Types for the mUSD Migration Engine
//!
//! This module defines the basket data structures shared by the basket
//! engine, the rebalancer and the migration state machine.

use crate::{Vec, String};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::constants::{basket, precision};
use crate::errors::{MusdError, MusdResult};
use crate::math;

/// Type alias for addresses (32-byte hash)
pub type Address = [u8; 32];

/// Type alias for asset identifiers
pub type AssetId = Address;

/// Type alias for implementation identifiers behind the upgrade proxy
pub type ImplementationId = Address;

// ============ Asset Types ============

/// Status of a basket asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum AssetStatus {
    /// Asset is pegged and fully usable
    #[default]
    Normal,
    /// Asset has de-pegged below 1.0
    BrokenBelowPeg,
    /// Asset has de-pegged above 1.0
    BrokenAbovePeg,
    /// Asset issuer has blacklisted the basket
    Blacklisted,
    /// Asset is being liquidated out of the basket
    Liquidating,
    /// Asset liquidation failed
    Failed,
}

impl AssetStatus {
    /// Returns true if the asset is isolated from normal operations
    pub fn is_isolated(&self) -> bool {
        !matches!(self, AssetStatus::Normal)
    }
}

/// A single collateral asset (bAsset) in the basket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Asset {
    /// Token address
    pub addr: AssetId,
    /// Custody / lending platform integration holding the asset
    pub integrator: Address,
    /// Native decimal precision
    pub decimals: u8,
    /// Decimal-to-common-scale factor, fixed when the asset is added
    pub ratio: u128,
    /// Whether transfers of the token charge a fee
    pub has_tx_fee: bool,
    /// Current status
    pub status: AssetStatus,
    /// Maximum weight in the basket (1e18 = 100%)
    pub max_weight: u128,
    /// Amount held as collateral (native precision)
    pub vault_balance: u128,
}

impl Asset {
    /// Creates a new asset with an empty vault and its ratio derived from decimals
    pub fn new(addr: AssetId, integrator: Address, decimals: u8, has_tx_fee: bool) -> MusdResult<Self> {
        let ratio = math::ratio_for_decimals(decimals)?;
        Ok(Self {
            addr,
            integrator,
            decimals,
            ratio,
            has_tx_fee,
            status: AssetStatus::Normal,
            max_weight: basket::DEFAULT_MAX_WEIGHT,
            vault_balance: 0,
        })
    }

    /// Sets the initial vault balance (builder style)
    pub fn with_vault_balance(mut self, vault_balance: u128) -> Self {
        self.vault_balance = vault_balance;
        self
    }

    /// Vault balance in common (18 decimal) precision
    pub fn scaled_balance(&self) -> MusdResult<u128> {
        math::to_scaled(self.vault_balance, self.ratio)
    }

    /// Read-only state exposed to planners
    pub fn state(&self) -> AssetState {
        AssetState {
            balance: self.vault_balance,
            decimals: self.decimals,
            ratio: self.ratio,
            status: self.status,
        }
    }
}

/// Snapshot of one asset as seen through the basket engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AssetState {
    /// Vault balance (native precision)
    pub balance: u128,
    /// Native decimal precision
    pub decimals: u8,
    /// Decimal-to-common-scale factor
    pub ratio: u128,
    /// Current status
    pub status: AssetStatus,
}

impl AssetState {
    /// Vault balance in common precision
    pub fn scaled_balance(&self) -> MusdResult<u128> {
        math::to_scaled(self.balance, self.ratio)
    }
}

// ============ Basket Types ============

/// Basket-wide flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct BasketFlags {
    /// Basket composition is being corrected; mint/swap/ratio-redeem blocked
    pub undergoing_recol: bool,
    /// Basket has failed
    pub failed: bool,
}

/// Invariant configuration installed by the upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct InvariantConfig {
    /// Amplification coefficient (A * 100)
    pub a: u64,
    /// Minimum weight of any asset (1e18 = 100%)
    pub min_weight: u128,
    /// Maximum weight of any asset (1e18 = 100%)
    pub max_weight: u128,
}

impl Default for InvariantConfig {
    fn default() -> Self {
        Self {
            a: basket::DEFAULT_AMP,
            min_weight: basket::DEFAULT_MIN_WEIGHT_LIMIT,
            max_weight: basket::DEFAULT_MAX_WEIGHT_LIMIT,
        }
    }
}

impl InvariantConfig {
    /// Check the limits are ordered and within 100%
    pub fn validate(&self) -> MusdResult<()> {
        if self.a == 0 {
            return Err(MusdError::InvalidInput { param: "a", reason: "amplification must be positive" });
        }
        if self.min_weight > self.max_weight || self.max_weight > precision::FULL_SCALE {
            return Err(MusdError::InvalidInput { param: "limits", reason: "min must not exceed max <= 100%" });
        }
        Ok(())
    }
}

/// One-time initialisation data passed with the upgrade (borsh encoded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct UpgradeInit {
    /// Forge validator the new implementation consults
    pub forge_validator: Address,
    /// Invariant configuration to install
    pub config: InvariantConfig,
}

impl UpgradeInit {
    /// Encode as the opaque payload stored in a migration request
    pub fn encode(&self) -> MusdResult<Vec<u8>> {
        borsh::to_vec(self).map_err(|_| MusdError::InvalidPayload)
    }

    /// Decode an opaque payload
    pub fn decode(payload: &[u8]) -> MusdResult<Self> {
        borsh::from_slice(payload).map_err(|_| MusdError::InvalidPayload)
    }
}

// ============ Storage Snapshot ============

/// Per-asset fields of a storage snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AssetStorage {
    pub addr: AssetId,
    pub integrator: Address,
    pub decimals: u8,
    pub status: AssetStatus,
    pub ratio: u128,
    pub has_tx_fee: bool,
    pub vault_balance: u128,
}

impl From<&Asset> for AssetStorage {
    fn from(asset: &Asset) -> Self {
        Self {
            addr: asset.addr,
            integrator: asset.integrator,
            decimals: asset.decimals,
            status: asset.status,
            ratio: asset.ratio,
            has_tx_fee: asset.has_tx_fee,
            vault_balance: asset.vault_balance,
        }
    }
}

/// Read-only view of everything the storage validator compares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MassetStorage {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub swap_fee: u128,
    pub redemption_fee: u128,
    pub cache_size: u128,
    pub nexus: Address,
    pub forge_validator: Option<Address>,
    pub total_supply: u128,
    pub surplus: u128,
    pub assets: Vec<AssetStorage>,
    pub flags: BasketFlags,
    pub invariant_config: Option<InvariantConfig>,
    pub paused: bool,
}
