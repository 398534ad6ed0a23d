//! Storage/Invariant Validator
//!
//! Read-only comparison of the live basket storage against an expected
//! snapshot. Every divergence is collected into a [`ValidationReport`];
//! nothing here mutates state.
//!
//! ## Field classes
//!
//! | class | fields |
//! |-------|--------|
//! | exact | symbol, name, decimals, fees, cache size, nexus, forge validator, invariant config, per-asset address/integrator/decimals/status/ratio/tx-fee flag |
//! | exact, optional | per-asset vault balances, pause and recollateralisation flags |
//! | tolerance | total supply, surplus (relative, in bps) |

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use musd_common::{
    constants::{fees, token, validation::DEFAULT_TOLERANCE_BPS},
    errors::{MusdError, MusdResult},
    math::{ratio_for_decimals, within_tolerance},
    types::{Address, AssetId, AssetStatus, AssetStorage, InvariantConfig, MassetStorage, UpgradeInit},
};

// ============ Expectations ============

/// Expected immutable fields of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ExpectedAsset {
    pub addr: AssetId,
    pub integrator: Address,
    pub decimals: u8,
    pub status: AssetStatus,
    pub ratio: u128,
    pub has_tx_fee: bool,
}

impl ExpectedAsset {
    /// A normal asset without transfer fees, ratio derived from decimals
    pub fn normal(addr: AssetId, integrator: Address, decimals: u8) -> MusdResult<Self> {
        Ok(Self {
            addr,
            integrator,
            decimals,
            status: AssetStatus::Normal,
            ratio: ratio_for_decimals(decimals)?,
            has_tx_fee: false,
        })
    }
}

impl From<&AssetStorage> for ExpectedAsset {
    fn from(asset: &AssetStorage) -> Self {
        Self {
            addr: asset.addr,
            integrator: asset.integrator,
            decimals: asset.decimals,
            status: asset.status,
            ratio: asset.ratio,
            has_tx_fee: asset.has_tx_fee,
        }
    }
}

/// Snapshot the live storage is compared against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct StorageExpectations {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub swap_fee: u128,
    pub redemption_fee: u128,
    pub cache_size: u128,
    pub nexus: Address,
    pub forge_validator: Option<Address>,
    pub invariant_config: Option<InvariantConfig>,
    pub assets: Vec<ExpectedAsset>,
    /// Exact vault balances, when known
    pub vault_balances: Option<Vec<u128>>,
    pub total_supply: u128,
    pub surplus: u128,
    /// Relative tolerance for supply and surplus
    pub tolerance_bps: u16,
    pub paused: Option<bool>,
    pub undergoing_recol: Option<bool>,
}

impl StorageExpectations {
    /// Expectations for a pre-upgrade mUSD basket with the default fee
    /// parameters
    pub fn musd(nexus: Address, assets: Vec<ExpectedAsset>, total_supply: u128, surplus: u128) -> Self {
        Self {
            symbol: token::SYMBOL.to_string(),
            name: token::NAME.to_string(),
            decimals: token::DECIMALS,
            swap_fee: fees::SWAP_FEE,
            redemption_fee: fees::REDEMPTION_FEE,
            cache_size: fees::CACHE_SIZE,
            nexus,
            forge_validator: None,
            invariant_config: None,
            assets,
            vault_balances: None,
            total_supply,
            surplus,
            tolerance_bps: DEFAULT_TOLERANCE_BPS,
            paused: None,
            undergoing_recol: None,
        }
    }

    /// Capture the current storage as the expected state. Vault balances and
    /// flags are left unchecked.
    pub fn snapshot(storage: &MassetStorage) -> Self {
        Self {
            symbol: storage.symbol.clone(),
            name: storage.name.clone(),
            decimals: storage.decimals,
            swap_fee: storage.swap_fee,
            redemption_fee: storage.redemption_fee,
            cache_size: storage.cache_size,
            nexus: storage.nexus,
            forge_validator: storage.forge_validator,
            invariant_config: storage.invariant_config,
            assets: storage.assets.iter().map(ExpectedAsset::from).collect(),
            vault_balances: None,
            total_supply: storage.total_supply,
            surplus: storage.surplus,
            tolerance_bps: DEFAULT_TOLERANCE_BPS,
            paused: None,
            undergoing_recol: None,
        }
    }

    pub fn with_vault_balances(mut self, vault_balances: Vec<u128>) -> Self {
        self.vault_balances = Some(vault_balances);
        self
    }

    pub fn with_tolerance(mut self, tolerance_bps: u16) -> Self {
        self.tolerance_bps = tolerance_bps;
        self
    }

    /// Fields the one-time initialisation installs
    pub fn with_upgrade(mut self, init: &UpgradeInit) -> Self {
        self.forge_validator = Some(init.forge_validator);
        self.invariant_config = Some(init.config);
        self
    }

    /// Fields installed by an encoded initialisation payload
    pub fn with_upgrade_payload(self, payload: &[u8]) -> MusdResult<Self> {
        Ok(self.with_upgrade(&decode_upgrade(payload)?))
    }

    pub fn with_flags(mut self, paused: Option<bool>, undergoing_recol: Option<bool>) -> Self {
        self.paused = paused;
        self.undergoing_recol = undergoing_recol;
        self
    }

    /// Compare every field and collect all mismatches
    pub fn validate(&self, storage: &MassetStorage) -> ValidationReport {
        let mut report = ValidationReport::default();

        report.exact(StorageField::Symbol, None, &self.symbol, &storage.symbol);
        report.exact(StorageField::Name, None, &self.name, &storage.name);
        report.exact(StorageField::Decimals, None, &self.decimals, &storage.decimals);
        report.exact(StorageField::SwapFee, None, &self.swap_fee, &storage.swap_fee);
        report.exact(StorageField::RedemptionFee, None, &self.redemption_fee, &storage.redemption_fee);
        report.exact(StorageField::CacheSize, None, &self.cache_size, &storage.cache_size);
        report.exact(StorageField::Nexus, None, &self.nexus, &storage.nexus);
        report.exact(StorageField::ForgeValidator, None, &self.forge_validator, &storage.forge_validator);
        report.exact(StorageField::InvariantConfig, None, &self.invariant_config, &storage.invariant_config);

        report.exact(StorageField::AssetCount, None, &self.assets.len(), &storage.assets.len());
        for (i, (expected, actual)) in self.assets.iter().zip(&storage.assets).enumerate() {
            let index = Some(i as u32);
            report.exact(StorageField::AssetAddress, index, &expected.addr, &actual.addr);
            report.exact(StorageField::Integrator, index, &expected.integrator, &actual.integrator);
            report.exact(StorageField::AssetDecimals, index, &expected.decimals, &actual.decimals);
            report.exact(StorageField::Status, index, &expected.status, &actual.status);
            report.exact(StorageField::Ratio, index, &expected.ratio, &actual.ratio);
            report.exact(StorageField::HasTxFee, index, &expected.has_tx_fee, &actual.has_tx_fee);
        }
        if let Some(balances) = &self.vault_balances {
            report.exact(StorageField::AssetCount, None, &balances.len(), &storage.assets.len());
            for (i, (expected, actual)) in balances.iter().zip(&storage.assets).enumerate() {
                report.exact(StorageField::VaultBalance, Some(i as u32), expected, &actual.vault_balance);
            }
        }

        report.close(StorageField::TotalSupply, self.total_supply, storage.total_supply, self.tolerance_bps);
        report.close(StorageField::Surplus, self.surplus, storage.surplus, self.tolerance_bps);

        if let Some(paused) = self.paused {
            report.exact(StorageField::Paused, None, &paused, &storage.paused);
        }
        if let Some(recol) = self.undergoing_recol {
            report.exact(StorageField::UndergoingRecol, None, &recol, &storage.flags.undergoing_recol);
        }

        report
    }
}

/// Initialisation an upgrade payload installs; `InvalidPayload` when it
/// does not decode
pub fn decode_upgrade(payload: &[u8]) -> MusdResult<UpgradeInit> {
    UpgradeInit::decode(payload)
}

// ============ Report ============

/// Storage field a mismatch refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum StorageField {
    Symbol,
    Name,
    Decimals,
    SwapFee,
    RedemptionFee,
    CacheSize,
    Nexus,
    ForgeValidator,
    InvariantConfig,
    AssetCount,
    AssetAddress,
    Integrator,
    AssetDecimals,
    Status,
    Ratio,
    HasTxFee,
    VaultBalance,
    TotalSupply,
    Surplus,
    Paused,
    UndergoingRecol,
}

impl StorageField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::Name => "name",
            Self::Decimals => "decimals",
            Self::SwapFee => "swap_fee",
            Self::RedemptionFee => "redemption_fee",
            Self::CacheSize => "cache_size",
            Self::Nexus => "nexus",
            Self::ForgeValidator => "forge_validator",
            Self::InvariantConfig => "invariant_config",
            Self::AssetCount => "asset_count",
            Self::AssetAddress => "asset.addr",
            Self::Integrator => "asset.integrator",
            Self::AssetDecimals => "asset.decimals",
            Self::Status => "asset.status",
            Self::Ratio => "asset.ratio",
            Self::HasTxFee => "asset.has_tx_fee",
            Self::VaultBalance => "asset.vault_balance",
            Self::TotalSupply => "total_supply",
            Self::Surplus => "surplus",
            Self::Paused => "paused",
            Self::UndergoingRecol => "undergoing_recol",
        }
    }
}

/// One divergence between expected and live storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Mismatch {
    pub field: StorageField,
    /// Basket index for per-asset fields
    pub asset_index: Option<u32>,
    pub expected: String,
    pub actual: String,
}

/// Every mismatch found in one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct ValidationReport {
    pub mismatches: Vec<Mismatch>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn mismatches_for(&self, field: StorageField) -> Vec<&Mismatch> {
        self.mismatches.iter().filter(|m| m.field == field).collect()
    }

    /// `StorageMismatch` naming the first failing field
    pub fn to_error(&self) -> Option<MusdError> {
        self.mismatches.first().map(|first| MusdError::StorageMismatch {
            field: first.field.name(),
            mismatches: self.mismatches.len() as u32,
        })
    }

    pub fn into_result(self) -> MusdResult<Self> {
        match self.to_error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    fn exact<T: PartialEq + core::fmt::Debug>(&mut self, field: StorageField, asset_index: Option<u32>, expected: &T, actual: &T) {
        if expected != actual {
            self.push(field, asset_index, expected, actual);
        }
    }

    fn close(&mut self, field: StorageField, expected: u128, actual: u128, tolerance_bps: u16) {
        if !within_tolerance(actual, expected, tolerance_bps) {
            self.push(field, None, &expected, &actual);
        }
    }

    fn push<T: core::fmt::Debug>(&mut self, field: StorageField, asset_index: Option<u32>, expected: &T, actual: &T) {
        log::debug!("storage mismatch on {}: expected {:?}, actual {:?}", field.name(), expected, actual);
        self.mismatches.push(Mismatch {
            field,
            asset_index,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        });
    }
}
