//! Basket Manager - Reference mAsset Engine
//!
//! In-memory mAsset with a collateral basket of stablecoins (bAssets). It
//! implements the `BasketEngine` capability the rebalancer drives and the
//! `UpgradeTarget` the migration controller upgrades, with the same gating
//! rules the live basket enforces.
//!
//! ## Core Operations
//!
//! - **Mint / MintMulti**: Deposit bAssets, issue mAsset 1:1 in common precision
//! - **Swap**: Exchange one bAsset for another, swap fee credited to surplus
//! - **Redeem**: Burn mAsset for a single bAsset, redemption fee to surplus
//! - **RedeemExact**: Burn up to a maximum mAsset for exact bAsset amounts
//! - **RedeemMasset**: Burn mAsset for a proportional share of every bAsset
//! - **CollectInterest**: Platform interest credited to a vault
//!
//! ## Gating
//!
//! | state | mint / swap | redeem / redeem_masset | redeem_exact |
//! |---|---|---|---|
//! | recollateralising | `Unhealthy` | `InRecol` | allowed |
//! | paused | `ProtocolPaused` | `ProtocolPaused` | `ProtocolPaused` |
//!
//! Every operation stages its balance changes and commits only after all
//! checks pass, so a failed call leaves the basket untouched.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use musd_common::{
    access_control::{self, AccessControlState, Permission},
    check,
    constants::{basket, fees, token},
    errors::{MusdError, MusdResult},
    events::{EventLog, MusdEvent},
    interfaces::{BasketEngine, Revertible, StorageView, UpgradeTarget},
    math::{checked_sum, div_precisely, mul_div, mul_truncate, ratio_for_decimals, to_native, to_scaled},
    types::{
        Address, Asset, AssetId, AssetState, AssetStatus, AssetStorage, BasketFlags, ImplementationId,
        InvariantConfig, MassetStorage, UpgradeInit,
    },
    validation::{
        require_healthy, require_min_output, require_not_in_recol, require_not_paused, require_positive,
        require_sufficient_balance, require_valid_address,
    },
};

// ============ Masset State ============

/// The mAsset and its collateral basket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Masset {
    /// Token symbol
    pub symbol: String,
    /// Token name
    pub name: String,
    /// Token decimals
    pub decimals: u8,
    /// Collateral assets in basket order
    pub assets: Vec<Asset>,
    /// Basket-wide flags
    pub flags: BasketFlags,
    /// Whether mutating user operations are paused
    pub paused: bool,
    /// Governor and operator roles
    pub access: AccessControlState,
    /// Swap fee (1e18 = 100%)
    pub swap_fee: u128,
    /// Redemption fee (1e18 = 100%)
    pub redemption_fee: u128,
    /// Share of supply held un-lent (1e18 = 100%)
    pub cache_size: u128,
    /// System registry; the only caller allowed to collect interest
    pub nexus: Address,
    /// Forge validator installed by the upgrade
    pub forge_validator: Option<Address>,
    /// Invariant configuration installed by the upgrade
    pub invariant_config: Option<InvariantConfig>,
    /// Implementation currently behind the proxy
    pub implementation: ImplementationId,
    /// Total mAsset supply
    pub total_supply: u128,
    /// Fees accrued in mAsset terms, not yet distributed
    pub surplus: u128,
    /// Events emitted since the last drain
    pub events: EventLog,
}

impl Masset {
    /// Creates an empty basket governed by `governor`
    pub fn new(governor: Address, nexus: Address, implementation: ImplementationId) -> Self {
        Self {
            symbol: token::SYMBOL.into(),
            name: token::NAME.into(),
            decimals: token::DECIMALS,
            assets: Vec::new(),
            flags: BasketFlags::default(),
            paused: false,
            access: AccessControlState::new(governor),
            swap_fee: fees::SWAP_FEE,
            redemption_fee: fees::REDEMPTION_FEE,
            cache_size: fees::CACHE_SIZE,
            nexus,
            forge_validator: None,
            invariant_config: None,
            implementation,
            total_supply: 0,
            surplus: 0,
            events: EventLog::new(),
        }
    }

    /// Seeds the basket with pre-existing collateral. Supply is set to the
    /// scaled collateral value.
    pub fn with_assets(mut self, assets: Vec<Asset>) -> MusdResult<Self> {
        check!(
            assets.len() <= basket::MAX_BASSETS,
            MusdError::MaxAssetsReached { maximum: basket::MAX_BASSETS as u32 }
        );
        for (i, asset) in assets.iter().enumerate() {
            check!(
                asset.ratio == ratio_for_decimals(asset.decimals)?,
                MusdError::InvalidInput { param: "ratio", reason: "ratio does not match decimals" }
            );
            check!(
                !assets[..i].iter().any(|a| a.addr == asset.addr),
                MusdError::AssetAlreadyExists { asset: asset.addr }
            );
        }
        self.assets = assets;
        self.total_supply = self.total_scaled()?;
        Ok(self)
    }

    /// Overrides supply and surplus for a basket migrated from live state
    pub fn with_supply(mut self, total_supply: u128, surplus: u128) -> Self {
        self.total_supply = total_supply;
        self.surplus = surplus;
        self
    }

    // ============ Views ============

    /// Index of an asset in the basket
    pub fn index_of(&self, asset: &AssetId) -> Option<usize> {
        self.assets.iter().position(|a| a.addr == *asset)
    }

    /// Asset by id
    pub fn asset(&self, asset: &AssetId) -> MusdResult<&Asset> {
        let index = self.require_index(asset)?;
        Ok(&self.assets[index])
    }

    /// Sum of vault balances in common precision
    pub fn total_scaled(&self) -> MusdResult<u128> {
        let scaled = self.assets.iter().map(Asset::scaled_balance).collect::<MusdResult<Vec<_>>>()?;
        checked_sum(&scaled)
    }

    /// Whether the one-time upgrade initialisation has run
    pub fn is_migrated(&self) -> bool {
        self.invariant_config.is_some()
    }

    /// Move every emitted event out of the basket
    pub fn take_events(&mut self) -> EventLog {
        core::mem::take(&mut self.events)
    }

    fn require_index(&self, asset: &AssetId) -> MusdResult<usize> {
        self.index_of(asset).ok_or(MusdError::AssetNotFound { asset: *asset })
    }

    fn require_normal(&self, asset: &AssetId) -> MusdResult<usize> {
        let index = self.require_index(asset)?;
        check!(
            self.assets[index].status == AssetStatus::Normal,
            MusdError::AssetNotNormal { asset: *asset }
        );
        Ok(index)
    }

    fn vault_balances(&self) -> Vec<u128> {
        self.assets.iter().map(|a| a.vault_balance).collect()
    }

    fn commit_balances(&mut self, balances: Vec<u128>) {
        for (asset, balance) in self.assets.iter_mut().zip(balances) {
            asset.vault_balance = balance;
        }
    }

    /// Input weights must stay under their limit; after the upgrade output
    /// weights must also stay above the invariant minimum.
    fn check_weights(&self, balances: &[u128], inputs: &[usize], outputs: &[usize]) -> MusdResult<()> {
        let scaled = self
            .assets
            .iter()
            .zip(balances)
            .map(|(asset, &balance)| to_scaled(balance, asset.ratio))
            .collect::<MusdResult<Vec<_>>>()?;
        let total = checked_sum(&scaled)?;
        if total == 0 {
            return Ok(());
        }

        for &i in inputs {
            let weight = div_precisely(scaled[i], total)?;
            let max_weight = self.invariant_config.map_or(self.assets[i].max_weight, |c| c.max_weight);
            if weight > max_weight {
                return Err(MusdError::ExceedsWeightLimit { asset: self.assets[i].addr, weight, max_weight });
            }
        }

        if let Some(config) = self.invariant_config {
            for &o in outputs {
                let weight = div_precisely(scaled[o], total)?;
                if weight < config.min_weight {
                    return Err(MusdError::BelowWeightLimit {
                        asset: self.assets[o].addr,
                        weight,
                        min_weight: config.min_weight,
                    });
                }
            }
        }
        Ok(())
    }

    // ============ Minting ============

    /// Deposit a single bAsset and mint mAsset
    pub fn mint(&mut self, input: &AssetId, amount: u128, min_output: u128, recipient: Address) -> MusdResult<u128> {
        self.mint_inputs(&[(*input, amount)], min_output, recipient)
    }

    /// Deposit several bAssets and mint mAsset for their combined value
    pub fn mint_multi(&mut self, inputs: &[(AssetId, u128)], min_output: u128, recipient: Address) -> MusdResult<u128> {
        self.mint_inputs(inputs, min_output, recipient)
    }

    fn mint_inputs(&mut self, inputs: &[(AssetId, u128)], min_output: u128, recipient: Address) -> MusdResult<u128> {
        require_healthy(&self.flags)?;
        require_not_paused(self.paused)?;
        check!(!inputs.is_empty(), MusdError::InvalidInput { param: "inputs", reason: "no inputs" });

        let mut balances = self.vault_balances();
        let mut credited = Vec::with_capacity(inputs.len());
        let mut minted_each = Vec::with_capacity(inputs.len());
        for (asset, amount) in inputs {
            require_positive(*amount)?;
            let index = self.require_normal(asset)?;
            balances[index] = balances[index].checked_add(*amount).ok_or(MusdError::Overflow)?;
            minted_each.push(to_scaled(*amount, self.assets[index].ratio)?);
            credited.push(index);
        }
        let minted = checked_sum(&minted_each)?;

        require_min_output(minted, min_output)?;
        self.check_weights(&balances, &credited, &[])?;
        let total_supply = self.total_supply.checked_add(minted).ok_or(MusdError::Overflow)?;

        self.commit_balances(balances);
        self.total_supply = total_supply;
        for ((input, input_amount), masset_amount) in inputs.iter().zip(minted_each) {
            self.events.emit(MusdEvent::Minted { recipient, input: *input, input_amount: *input_amount, masset_amount });
        }
        log::debug!("minted {} mAsset from {} input(s)", minted, inputs.len());
        Ok(minted)
    }

    // ============ Swapping ============

    /// Swap `amount` of `input` for `output`. The swap fee is taken in
    /// common precision from the output and credited to surplus.
    pub fn swap(
        &mut self,
        input: &AssetId,
        output: &AssetId,
        amount: u128,
        min_output: u128,
        recipient: Address,
    ) -> MusdResult<u128> {
        require_healthy(&self.flags)?;
        require_not_paused(self.paused)?;
        check!(input != output, MusdError::InvalidInput { param: "output", reason: "input and output are the same" });
        require_positive(amount)?;

        let i = self.require_normal(input)?;
        let o = self.require_normal(output)?;

        let scaled_in = to_scaled(amount, self.assets[i].ratio)?;
        let fee = mul_truncate(scaled_in, self.swap_fee)?;
        let output_amount = to_native(scaled_in - fee, self.assets[o].ratio)?;

        let mut balances = self.vault_balances();
        balances[i] = balances[i].checked_add(amount).ok_or(MusdError::Overflow)?;
        balances[o] = balances[o].checked_sub(output_amount).ok_or(MusdError::InsufficientLiquidity {
            available: balances[o],
            requested: output_amount,
        })?;
        require_min_output(output_amount, min_output)?;
        self.check_weights(&balances, &[i], &[o])?;
        let surplus = self.surplus.checked_add(fee).ok_or(MusdError::Overflow)?;

        self.commit_balances(balances);
        self.surplus = surplus;
        self.events.emit(MusdEvent::Swapped {
            recipient,
            input: *input,
            output: *output,
            input_amount: amount,
            output_amount,
            fee,
        });
        log::debug!("swapped {} in for {} out, fee {}", amount, output_amount, fee);
        Ok(output_amount)
    }

    // ============ Redemption ============

    /// Burn `masset_amount` for a single bAsset
    pub fn redeem(&mut self, output: &AssetId, masset_amount: u128, min_output: u128, recipient: Address) -> MusdResult<u128> {
        require_not_in_recol(&self.flags)?;
        require_not_paused(self.paused)?;
        require_positive(masset_amount)?;
        require_sufficient_balance(self.total_supply, masset_amount)?;

        let o = self.require_normal(output)?;
        let fee = mul_truncate(masset_amount, self.redemption_fee)?;
        let output_amount = to_native(masset_amount - fee, self.assets[o].ratio)?;

        let mut balances = self.vault_balances();
        balances[o] = balances[o].checked_sub(output_amount).ok_or(MusdError::InsufficientLiquidity {
            available: balances[o],
            requested: output_amount,
        })?;
        require_min_output(output_amount, min_output)?;
        self.check_weights(&balances, &[], &[o])?;
        let surplus = self.surplus.checked_add(fee).ok_or(MusdError::Overflow)?;

        self.commit_balances(balances);
        self.total_supply -= masset_amount;
        self.surplus = surplus;
        self.events.emit(MusdEvent::Redeemed { recipient, output: *output, masset_amount, output_amount, fee });
        Ok(output_amount)
    }

    /// Burn at most `max_masset` for exact bAsset amounts. Still available
    /// while the basket is recollateralising.
    pub fn redeem_exact(&mut self, outputs: &[(AssetId, u128)], max_masset: u128, recipient: Address) -> MusdResult<u128> {
        require_not_paused(self.paused)?;
        check!(!outputs.is_empty(), MusdError::InvalidInput { param: "outputs", reason: "no outputs" });

        let mut balances = self.vault_balances();
        let mut debited = Vec::with_capacity(outputs.len());
        let mut scaled_each = Vec::with_capacity(outputs.len());
        for (asset, amount) in outputs {
            require_positive(*amount)?;
            let index = self.require_index(asset)?;
            balances[index] = balances[index].checked_sub(*amount).ok_or(MusdError::InsufficientLiquidity {
                available: balances[index],
                requested: *amount,
            })?;
            scaled_each.push(to_scaled(*amount, self.assets[index].ratio)?);
            debited.push(index);
        }
        let scaled_out = checked_sum(&scaled_each)?;
        let fee = mul_truncate(scaled_out, self.redemption_fee)?;
        let required = scaled_out.checked_add(fee).ok_or(MusdError::Overflow)?;

        check!(required <= max_masset, MusdError::MaxInputExceeded { maximum: max_masset, required });
        require_sufficient_balance(self.total_supply, required)?;
        self.check_weights(&balances, &[], &debited)?;
        let surplus = self.surplus.checked_add(fee).ok_or(MusdError::Overflow)?;

        self.commit_balances(balances);
        self.total_supply -= required;
        self.surplus = surplus;
        self.events.emit(MusdEvent::RedeemedMulti {
            recipient,
            outputs: outputs.to_vec(),
            masset_amount: required,
            fee,
        });
        Ok(required)
    }

    /// Burn `masset_amount` for a proportional share of every bAsset
    pub fn redeem_masset(&mut self, masset_amount: u128, min_outputs: &[u128], recipient: Address) -> MusdResult<Vec<u128>> {
        require_not_in_recol(&self.flags)?;
        require_not_paused(self.paused)?;
        require_positive(masset_amount)?;
        check!(
            min_outputs.len() == self.assets.len(),
            MusdError::InvalidInput { param: "min_outputs", reason: "one minimum per asset required" }
        );
        require_sufficient_balance(self.total_supply, masset_amount)?;

        let fee = mul_truncate(masset_amount, self.redemption_fee)?;
        let net = masset_amount - fee;
        let total = self.total_scaled()?;
        check!(total > 0, MusdError::InsufficientLiquidity { available: 0, requested: net });

        let mut balances = self.vault_balances();
        let mut amounts = Vec::with_capacity(self.assets.len());
        for (i, asset) in self.assets.iter().enumerate() {
            let share = mul_div(asset.scaled_balance()?, net, total)?;
            let amount = to_native(share, asset.ratio)?;
            require_min_output(amount, min_outputs[i])?;
            balances[i] = balances[i].checked_sub(amount).ok_or(MusdError::InsufficientLiquidity {
                available: balances[i],
                requested: amount,
            })?;
            amounts.push(amount);
        }
        let surplus = self.surplus.checked_add(fee).ok_or(MusdError::Overflow)?;

        self.commit_balances(balances);
        self.total_supply -= masset_amount;
        self.surplus = surplus;
        let outputs = self.assets.iter().map(|a| a.addr).zip(amounts.iter().copied()).collect();
        self.events.emit(MusdEvent::RedeemedMulti { recipient, outputs, masset_amount, fee });
        Ok(amounts)
    }

    // ============ Interest ============

    /// Credit platform interest to a vault and mint the matching supply.
    /// Only the nexus may call.
    pub fn collect_interest(&mut self, caller: Address, asset: &AssetId, amount: u128) -> MusdResult<u128> {
        check!(caller == self.nexus, MusdError::Unauthorized { expected: self.nexus, actual: caller });
        require_not_paused(self.paused)?;
        let index = self.require_index(asset)?;

        let scaled = to_scaled(amount, self.assets[index].ratio)?;
        let vault_balance = self.assets[index].vault_balance.checked_add(amount).ok_or(MusdError::Overflow)?;
        let total_supply = self.total_supply.checked_add(scaled).ok_or(MusdError::Overflow)?;

        self.assets[index].vault_balance = vault_balance;
        self.total_supply = total_supply;
        self.events.emit(MusdEvent::InterestCollected { asset: *asset, amount, new_supply: total_supply });
        Ok(total_supply)
    }

    // ============ Admin Operations ============

    /// Pause user operations
    pub fn pause(&mut self, caller: Address) -> MusdResult<()> {
        access_control::require_permission(&self.access, &caller, Permission::Pause)?;
        check!(!self.paused, MusdError::InvalidStateTransition);
        self.paused = true;
        self.events.emit(MusdEvent::Paused { by: caller });
        log::info!("basket paused");
        Ok(())
    }

    /// Resume user operations
    pub fn unpause(&mut self, caller: Address) -> MusdResult<()> {
        access_control::require_permission(&self.access, &caller, Permission::Unpause)?;
        check!(self.paused, MusdError::InvalidStateTransition);
        self.paused = false;
        self.events.emit(MusdEvent::Unpaused { by: caller });
        log::info!("basket unpaused");
        Ok(())
    }

    /// Add an empty asset at the end of the basket. Allowed while paused.
    pub fn add_asset(&mut self, caller: Address, asset: Asset) -> MusdResult<usize> {
        access_control::require_permission(&self.access, &caller, Permission::ManageBasket)?;
        check!(
            self.assets.len() < basket::MAX_BASSETS,
            MusdError::MaxAssetsReached { maximum: basket::MAX_BASSETS as u32 }
        );
        check!(self.index_of(&asset.addr).is_none(), MusdError::AssetAlreadyExists { asset: asset.addr });
        check!(
            asset.ratio == ratio_for_decimals(asset.decimals)?,
            MusdError::InvalidInput { param: "ratio", reason: "ratio does not match decimals" }
        );
        check!(
            asset.vault_balance == 0,
            MusdError::InvalidInput { param: "vault_balance", reason: "new assets start empty" }
        );

        let index = self.assets.len();
        self.events.emit(MusdEvent::AssetAdded { asset: asset.addr, integrator: asset.integrator, index: index as u32 });
        log::info!("asset added at index {}", index);
        self.assets.push(asset);
        Ok(index)
    }

    /// Remove an empty asset. The last asset moves into its slot.
    pub fn remove_asset(&mut self, caller: Address, asset: &AssetId) -> MusdResult<()> {
        access_control::require_permission(&self.access, &caller, Permission::ManageBasket)?;
        let index = self.require_index(asset)?;
        let vault_balance = self.assets[index].vault_balance;
        check!(vault_balance == 0, MusdError::AssetNotEmpty { asset: *asset, vault_balance });

        self.assets.swap_remove(index);
        self.events.emit(MusdEvent::AssetRemoved { asset: *asset });
        log::info!("asset removed from index {}", index);
        Ok(())
    }

    /// Set the maximum weight of each listed asset
    pub fn set_weight_limits(&mut self, caller: Address, assets: &[AssetId], max_weights: &[u128]) -> MusdResult<()> {
        access_control::require_permission(&self.access, &caller, Permission::ManageBasket)?;
        check!(
            assets.len() == max_weights.len(),
            MusdError::InvalidInput { param: "max_weights", reason: "length mismatch" }
        );

        let mut indices = Vec::with_capacity(assets.len());
        for (asset, &weight) in assets.iter().zip(max_weights) {
            check!(
                weight <= musd_common::constants::precision::FULL_SCALE,
                MusdError::InvalidInput { param: "max_weights", reason: "weight above 100%" }
            );
            indices.push(self.require_index(asset)?);
        }
        for (index, &weight) in indices.into_iter().zip(max_weights) {
            self.assets[index].max_weight = weight;
        }

        self.events.emit(MusdEvent::WeightLimitsUpdated { assets: assets.to_vec(), max_weights: max_weights.to_vec() });
        Ok(())
    }

    /// Update swap and redemption fees
    pub fn set_fees(&mut self, caller: Address, swap_fee: u128, redemption_fee: u128) -> MusdResult<()> {
        access_control::require_permission(&self.access, &caller, Permission::ManageBasket)?;
        check!(swap_fee <= fees::MAX_FEE, MusdError::InvalidInput { param: "swap_fee", reason: "above maximum fee" });
        check!(
            redemption_fee <= fees::MAX_FEE,
            MusdError::InvalidInput { param: "redemption_fee", reason: "above maximum fee" }
        );
        self.swap_fee = swap_fee;
        self.redemption_fee = redemption_fee;
        Ok(())
    }

    /// Return an isolated asset to normal. Recollateralisation ends once no
    /// asset remains isolated.
    pub fn negate_isolation(&mut self, caller: Address, asset: &AssetId) -> MusdResult<()> {
        access_control::require_permission(&self.access, &caller, Permission::NegateIsolation)?;
        let index = self.require_index(asset)?;

        self.assets[index].status = AssetStatus::Normal;
        self.flags.undergoing_recol = self.assets.iter().any(|a| a.status.is_isolated());
        self.events.emit(MusdEvent::IsolationNegated { asset: *asset, undergoing_recol: self.flags.undergoing_recol });
        log::info!("isolation negated, undergoing_recol = {}", self.flags.undergoing_recol);
        Ok(())
    }

    // ============ Upgrade ============

    /// One-time initialisation run by the new implementation. Installs the
    /// forge validator and invariant configuration and starts
    /// recollateralisation.
    pub fn initialize_upgrade(&mut self, init: &UpgradeInit) -> MusdResult<()> {
        check!(!self.is_migrated(), MusdError::AlreadyMigrated);
        init.config.validate()?;
        require_valid_address(init.forge_validator, "forge_validator")?;

        self.forge_validator = Some(init.forge_validator);
        self.invariant_config = Some(init.config);
        self.flags.undergoing_recol = true;
        Ok(())
    }
}

// ============ Capability Implementations ============

impl BasketEngine for Masset {
    fn asset_state(&self, asset: &AssetId) -> MusdResult<AssetState> {
        Ok(self.asset(asset)?.state())
    }

    fn assets(&self) -> Vec<Asset> {
        self.assets.clone()
    }

    fn flags(&self) -> BasketFlags {
        self.flags
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn swap(&mut self, input: &AssetId, output: &AssetId, amount: u128, min_output: u128, recipient: Address) -> MusdResult<u128> {
        Masset::swap(self, input, output, amount, min_output, recipient)
    }

    fn mint(&mut self, input: &AssetId, amount: u128, min_output: u128, recipient: Address) -> MusdResult<u128> {
        Masset::mint(self, input, amount, min_output, recipient)
    }

    fn redeem(&mut self, output: &AssetId, masset_amount: u128, min_output: u128, recipient: Address) -> MusdResult<u128> {
        Masset::redeem(self, output, masset_amount, min_output, recipient)
    }

    fn redeem_exact(&mut self, outputs: &[(AssetId, u128)], max_masset: u128, recipient: Address) -> MusdResult<u128> {
        Masset::redeem_exact(self, outputs, max_masset, recipient)
    }

    fn pause(&mut self, caller: Address) -> MusdResult<()> {
        Masset::pause(self, caller)
    }

    fn unpause(&mut self, caller: Address) -> MusdResult<()> {
        Masset::unpause(self, caller)
    }

    fn add_asset(&mut self, caller: Address, asset: Asset) -> MusdResult<usize> {
        Masset::add_asset(self, caller, asset)
    }

    fn remove_asset(&mut self, caller: Address, asset: &AssetId) -> MusdResult<()> {
        Masset::remove_asset(self, caller, asset)
    }

    fn set_weight_limits(&mut self, caller: Address, assets: &[AssetId], max_weights: &[u128]) -> MusdResult<()> {
        Masset::set_weight_limits(self, caller, assets, max_weights)
    }

    fn negate_isolation(&mut self, caller: Address, asset: &AssetId) -> MusdResult<()> {
        Masset::negate_isolation(self, caller, asset)
    }
}

impl UpgradeTarget for Masset {
    fn implementation(&self) -> ImplementationId {
        self.implementation
    }

    fn upgrade_to_and_call(&mut self, implementation: ImplementationId, payload: &[u8]) -> MusdResult<()> {
        let init = UpgradeInit::decode(payload)?;
        check!(
            implementation != self.implementation,
            MusdError::InvalidInput { param: "implementation", reason: "already the current implementation" }
        );
        self.initialize_upgrade(&init)?;
        self.implementation = implementation;
        Ok(())
    }
}

impl StorageView for Masset {
    fn storage(&self) -> MassetStorage {
        MassetStorage {
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            decimals: self.decimals,
            swap_fee: self.swap_fee,
            redemption_fee: self.redemption_fee,
            cache_size: self.cache_size,
            nexus: self.nexus,
            forge_validator: self.forge_validator,
            total_supply: self.total_supply,
            surplus: self.surplus,
            assets: self.assets.iter().map(AssetStorage::from).collect(),
            flags: self.flags,
            invariant_config: self.invariant_config,
            paused: self.paused,
        }
    }
}

impl Revertible for Masset {
    type Checkpoint = Masset;

    fn checkpoint(&self) -> Masset {
        self.clone()
    }

    fn revert_to(&mut self, checkpoint: Masset) {
        *self = checkpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use musd_common::constants::precision::FULL_SCALE;
    use musd_common::types::InvariantConfig;
    use proptest::prelude::*;

    const GOVERNOR: Address = [1u8; 32];
    const OPERATOR: Address = [2u8; 32];
    const NEXUS: Address = [3u8; 32];
    const IMPL_V2: ImplementationId = [4u8; 32];
    const IMPL_V3: ImplementationId = [5u8; 32];
    const VALIDATOR: Address = [6u8; 32];
    const USER: Address = [7u8; 32];
    const INTEGRATOR: Address = [9u8; 32];

    const SUSD: AssetId = [10u8; 32];
    const USDC: AssetId = [11u8; 32];
    const USDT: AssetId = [12u8; 32];
    const DAI: AssetId = [13u8; 32];

    fn units(amount: u128, decimals: u8) -> u128 {
        amount * 10u128.pow(u32::from(decimals))
    }

    fn asset(addr: AssetId, decimals: u8, whole: u128) -> Asset {
        Asset::new(addr, INTEGRATOR, decimals, false)
            .unwrap()
            .with_vault_balance(units(whole, decimals))
    }

    /// Four assets holding 1,000,000 each
    fn create_test_basket() -> Masset {
        let mut masset = Masset::new(GOVERNOR, NEXUS, IMPL_V2)
            .with_assets(vec![
                asset(SUSD, 18, 1_000_000),
                asset(USDC, 6, 1_000_000),
                asset(USDT, 6, 1_000_000),
                asset(DAI, 18, 1_000_000),
            ])
            .unwrap();
        access_control::grant_role(&mut masset.access, GOVERNOR, OPERATOR, access_control::Role::Operator).unwrap();
        masset
    }

    fn upgrade_payload() -> Vec<u8> {
        UpgradeInit { forge_validator: VALIDATOR, config: InvariantConfig::default() }.encode().unwrap()
    }

    // ============ Mint Tests ============

    #[test]
    fn test_mint_success() {
        let mut masset = create_test_basket();
        let supply_before = masset.total_supply;

        let minted = masset.mint(&USDC, units(10_000, 6), units(9_999, 18), USER).unwrap();

        assert_eq!(minted, units(10_000, 18));
        assert_eq!(masset.total_supply, supply_before + minted);
        assert_eq!(masset.asset(&USDC).unwrap().vault_balance, units(1_010_000, 6));
        assert!(masset.events.has_events());
    }

    #[test]
    fn test_mint_slippage_protection() {
        let mut masset = create_test_basket();
        let result = masset.mint(&USDC, units(10_000, 6), units(10_001, 18), USER);
        assert!(matches!(result, Err(MusdError::SlippageExceeded { .. })));
        assert_eq!(masset, create_test_basket());
    }

    #[test]
    fn test_mint_multi() {
        let mut masset = create_test_basket();
        let minted = masset
            .mint_multi(&[(USDC, units(100, 6)), (DAI, units(50, 18))], units(150, 18), USER)
            .unwrap();
        assert_eq!(minted, units(150, 18));
        assert_eq!(masset.events.len(), 2);
    }

    #[test]
    fn test_mint_exceeds_weight_limit() {
        let mut masset = create_test_basket();
        masset.set_weight_limits(GOVERNOR, &[USDC], &[FULL_SCALE / 4]).unwrap();

        let result = masset.mint(&USDC, units(1, 6), 0, USER);
        assert!(matches!(result, Err(MusdError::ExceedsWeightLimit { .. })));
    }

    // ============ Swap Tests ============

    #[test]
    fn test_swap_charges_fee_to_surplus() {
        let mut masset = create_test_basket();

        let out = masset.swap(&USDC, &USDT, units(10_000, 6), units(9_990, 6), USER).unwrap();

        // 0.06% of 10,000
        assert_eq!(out, units(9_994, 6));
        assert_eq!(masset.surplus, units(6, 18));
        assert_eq!(masset.asset(&USDC).unwrap().vault_balance, units(1_010_000, 6));
        assert_eq!(masset.asset(&USDT).unwrap().vault_balance, units(1_000_000, 6) - units(9_994, 6));
    }

    #[test]
    fn test_swap_slippage_protection() {
        let mut masset = create_test_basket();
        let result = masset.swap(&USDC, &USDT, units(10_000, 6), units(10_001, 6), USER);
        assert!(matches!(result, Err(MusdError::SlippageExceeded { .. })));
    }

    #[test]
    fn test_swap_insufficient_liquidity() {
        let mut masset = create_test_basket();
        let result = masset.swap(&USDC, &USDT, units(2_000_000, 6), 0, USER);
        assert!(matches!(result, Err(MusdError::InsufficientLiquidity { .. })));
        assert_eq!(masset, create_test_basket());
    }

    #[test]
    fn test_swap_into_zero_weight_asset_blocked() {
        let mut masset = create_test_basket();
        masset.set_weight_limits(GOVERNOR, &[DAI], &[0]).unwrap();

        let result = masset.swap(&DAI, &USDC, units(1, 18), 0, USER);
        assert!(matches!(result, Err(MusdError::ExceedsWeightLimit { .. })));

        // Taking DAI out is still possible
        assert!(masset.swap(&USDC, &DAI, units(1, 6), 0, USER).is_ok());
    }

    #[test]
    fn test_swap_same_asset_rejected() {
        let mut masset = create_test_basket();
        assert!(matches!(
            masset.swap(&USDC, &USDC, 1, 0, USER),
            Err(MusdError::InvalidInput { .. })
        ));
    }

    // ============ Redeem Tests ============

    #[test]
    fn test_redeem_single() {
        let mut masset = create_test_basket();
        let supply_before = masset.total_supply;

        assert!(matches!(
            masset.redeem(&USDC, units(10_000, 18), units(10_001, 6), USER),
            Err(MusdError::SlippageExceeded { .. })
        ));

        let out = masset.redeem(&USDC, units(10_000, 18), units(9_990, 6), USER).unwrap();
        assert_eq!(out, units(9_997, 6));
        assert_eq!(masset.total_supply, supply_before - units(10_000, 18));
        assert_eq!(masset.surplus, units(3, 18));
    }

    #[test]
    fn test_redeem_exact_max_quantity() {
        let mut masset = create_test_basket();

        let result = masset.redeem_exact(&[(USDC, units(10_000, 6))], units(9_999, 18), USER);
        assert!(matches!(result, Err(MusdError::MaxInputExceeded { .. })));

        let burned = masset.redeem_exact(&[(USDC, units(10_000, 6))], units(10_010, 18), USER).unwrap();
        assert_eq!(burned, units(10_003, 18));
    }

    #[test]
    fn test_redeem_masset_proportional() {
        let mut masset = create_test_basket();

        let too_high = vec![units(2_501, 18), units(2_501, 6), units(2_501, 6), units(2_501, 18)];
        assert!(matches!(
            masset.redeem_masset(units(10_000, 18), &too_high, USER),
            Err(MusdError::SlippageExceeded { .. })
        ));

        let minimums = vec![units(2_490, 18), units(2_490, 6), units(2_490, 6), units(2_490, 18)];
        let amounts = masset.redeem_masset(units(10_000, 18), &minimums, USER).unwrap();

        // 9,997 net split four ways
        assert_eq!(amounts[0], 2_499_250_000_000_000_000_000);
        assert_eq!(amounts[1], 2_499_250_000);
    }

    // ============ Gating Tests ============

    #[test]
    fn test_paused_blocks_user_operations() {
        let mut masset = create_test_basket();
        masset.pause(OPERATOR).unwrap();

        assert_eq!(masset.mint(&USDC, 1, 0, USER), Err(MusdError::ProtocolPaused));
        assert_eq!(masset.swap(&USDC, &DAI, 1, 0, USER), Err(MusdError::ProtocolPaused));
        assert_eq!(masset.redeem(&USDC, 1, 0, USER), Err(MusdError::ProtocolPaused));
        assert_eq!(masset.redeem_exact(&[(USDC, 1)], 1, USER), Err(MusdError::ProtocolPaused));
        assert_eq!(masset.collect_interest(NEXUS, &USDC, 1), Err(MusdError::ProtocolPaused));

        // Basket administration continues while paused
        assert!(masset.set_weight_limits(GOVERNOR, &[USDC], &[FULL_SCALE]).is_ok());
        assert_eq!(masset.pause(OPERATOR), Err(MusdError::InvalidStateTransition));
    }

    #[test]
    fn test_recol_gating_after_upgrade() {
        let mut masset = create_test_basket();
        masset.upgrade_to_and_call(IMPL_V3, &upgrade_payload()).unwrap();
        assert!(masset.flags.undergoing_recol);

        assert_eq!(masset.mint(&USDC, units(1, 6), 0, USER), Err(MusdError::Unhealthy));
        assert_eq!(masset.mint_multi(&[(USDC, units(1, 6))], 0, USER), Err(MusdError::Unhealthy));
        assert_eq!(masset.swap(&USDC, &DAI, units(1, 6), 0, USER), Err(MusdError::Unhealthy));
        assert_eq!(masset.redeem(&USDC, units(1, 18), 0, USER), Err(MusdError::InRecol));
        assert_eq!(masset.redeem_masset(units(1, 18), &[0, 0, 0, 0], USER), Err(MusdError::InRecol));

        // Exact-asset redemption remains open
        assert!(masset.redeem_exact(&[(USDC, units(1, 6))], units(2, 18), USER).is_ok());
    }

    #[test]
    fn test_negate_isolation_ends_recol() {
        let mut masset = create_test_basket();
        masset.upgrade_to_and_call(IMPL_V3, &upgrade_payload()).unwrap();

        assert!(masset.negate_isolation(USER, &SUSD).is_err());
        masset.negate_isolation(OPERATOR, &SUSD).unwrap();

        assert!(!masset.flags.undergoing_recol);
        assert!(masset.mint(&USDC, units(10_000, 6), 0, USER).is_ok());
    }

    #[test]
    fn test_isolated_asset_keeps_recol() {
        let mut masset = create_test_basket();
        masset.upgrade_to_and_call(IMPL_V3, &upgrade_payload()).unwrap();
        masset.assets[1].status = AssetStatus::BrokenBelowPeg;

        masset.negate_isolation(GOVERNOR, &SUSD).unwrap();
        assert!(masset.flags.undergoing_recol);

        masset.negate_isolation(GOVERNOR, &USDC).unwrap();
        assert!(!masset.flags.undergoing_recol);
    }

    // ============ Upgrade Tests ============

    #[test]
    fn test_upgrade_installs_config() {
        let mut masset = create_test_basket();
        masset.upgrade_to_and_call(IMPL_V3, &upgrade_payload()).unwrap();

        assert_eq!(masset.implementation(), IMPL_V3);
        assert_eq!(masset.forge_validator, Some(VALIDATOR));
        let config = masset.invariant_config.unwrap();
        assert_eq!(config.a, 13_500);
        assert_eq!(config.min_weight, 50_000_000_000_000_000);
        assert_eq!(config.max_weight, 650_000_000_000_000_000);
    }

    #[test]
    fn test_upgrade_only_once() {
        let mut masset = create_test_basket();
        masset.upgrade_to_and_call(IMPL_V3, &upgrade_payload()).unwrap();

        let init = UpgradeInit { forge_validator: VALIDATOR, config: InvariantConfig::default() };
        assert_eq!(masset.initialize_upgrade(&init), Err(MusdError::AlreadyMigrated));
        assert_eq!(masset.upgrade_to_and_call([8u8; 32], &upgrade_payload()), Err(MusdError::AlreadyMigrated));
        assert_eq!(MusdError::AlreadyMigrated.to_string(), "already upgraded");
    }

    #[test]
    fn test_upgrade_bad_payload_leaves_state() {
        let mut masset = create_test_basket();
        let before = masset.clone();

        assert_eq!(masset.upgrade_to_and_call(IMPL_V3, &[1, 2, 3]), Err(MusdError::InvalidPayload));

        let bad_config = UpgradeInit {
            forge_validator: VALIDATOR,
            config: InvariantConfig { a: 0, ..InvariantConfig::default() },
        };
        assert!(masset.upgrade_to_and_call(IMPL_V3, &bad_config.encode().unwrap()).is_err());
        assert_eq!(masset, before);
    }

    #[test]
    fn test_invariant_limits_apply_after_upgrade() {
        let mut masset = create_test_basket();
        masset.upgrade_to_and_call(IMPL_V3, &upgrade_payload()).unwrap();
        masset.negate_isolation(GOVERNOR, &SUSD).unwrap();

        // Draining USDC below 5% of the basket
        let result = masset.redeem(&USDC, units(970_000, 18), 0, USER);
        assert!(matches!(result, Err(MusdError::BelowWeightLimit { .. })));
    }

    // ============ Admin Tests ============

    #[test]
    fn test_add_asset() {
        let mut masset = create_test_basket();
        let tusd = Asset::new([14u8; 32], INTEGRATOR, 18, false).unwrap();

        assert_eq!(masset.add_asset(OPERATOR, tusd.clone()), Err(MusdError::AdminOnly));
        assert_eq!(masset.add_asset(GOVERNOR, tusd.clone()).unwrap(), 4);
        assert_eq!(
            masset.add_asset(GOVERNOR, tusd),
            Err(MusdError::AssetAlreadyExists { asset: [14u8; 32] })
        );
    }

    #[test]
    fn test_add_asset_max_reached() {
        let mut masset = create_test_basket();
        for i in 0..6u8 {
            masset.add_asset(GOVERNOR, Asset::new([20 + i; 32], INTEGRATOR, 18, false).unwrap()).unwrap();
        }
        let result = masset.add_asset(GOVERNOR, Asset::new([40u8; 32], INTEGRATOR, 18, false).unwrap());
        assert_eq!(result, Err(MusdError::MaxAssetsReached { maximum: 10 }));
    }

    #[test]
    fn test_remove_asset_swaps_last_into_slot() {
        let mut masset = create_test_basket();

        assert!(matches!(masset.remove_asset(GOVERNOR, &USDC), Err(MusdError::AssetNotEmpty { .. })));

        masset.assets[1].vault_balance = 0;
        masset.remove_asset(GOVERNOR, &USDC).unwrap();

        let order: Vec<AssetId> = masset.assets.iter().map(|a| a.addr).collect();
        assert_eq!(order, vec![SUSD, DAI, USDT]);
        assert_eq!(masset.index_of(&DAI), Some(1));
    }

    #[test]
    fn test_set_fees_bounds() {
        let mut masset = create_test_basket();
        assert!(masset.set_fees(GOVERNOR, 0, 0).is_ok());
        assert!(masset.set_fees(GOVERNOR, fees::MAX_FEE + 1, 0).is_err());
    }

    #[test]
    fn test_collect_interest_only_nexus() {
        let mut masset = create_test_basket();
        assert!(matches!(
            masset.collect_interest(USER, &USDC, 1),
            Err(MusdError::Unauthorized { .. })
        ));

        let supply = masset.collect_interest(NEXUS, &USDC, units(100, 6)).unwrap();
        assert_eq!(supply, units(4_000_100, 18));
    }

    // ============ Capability Tests ============

    #[test]
    fn test_storage_view() {
        let masset = create_test_basket();
        let storage = masset.storage();

        assert_eq!(storage.symbol, "mUSD");
        assert_eq!(storage.name, "mStable USD");
        assert_eq!(storage.assets.len(), 4);
        assert_eq!(storage.assets[1].ratio, 100_000_000 * 1_000_000_000_000);
        assert_eq!(storage.forge_validator, None);
    }

    #[test]
    fn test_checkpoint_and_revert() {
        let mut masset = create_test_basket();
        let checkpoint = masset.checkpoint();

        masset.swap(&USDC, &USDT, units(100, 6), 0, USER).unwrap();
        assert_ne!(masset, create_test_basket());

        masset.revert_to(checkpoint);
        assert_eq!(masset, create_test_basket());
    }

    #[test]
    fn test_scaled_balances_through_trait() {
        let masset = create_test_basket();
        let balances = BasketEngine::scaled_balances(&masset).unwrap();
        assert_eq!(balances, vec![units(1_000_000, 18); 4]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Swap(usize, usize, u128),
        Mint(usize, u128),
        Redeem(usize, u128),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4, 0usize..4, 1u128..50_000).prop_map(|(i, o, a)| Op::Swap(i, o, a)),
            (0usize..4, 1u128..50_000).prop_map(|(i, a)| Op::Mint(i, a)),
            (0usize..4, 1u128..50_000).prop_map(|(o, a)| Op::Redeem(o, a)),
        ]
    }

    proptest! {
        #[test]
        fn prop_collateral_backs_supply_and_surplus(ops in proptest::collection::vec(op_strategy(), 1..30)) {
            let mut masset = create_test_basket();
            let ids = [SUSD, USDC, USDT, DAI];
            let decimals = [18u8, 6, 6, 18];

            for op in ops {
                // Failed operations must leave no trace, successful ones keep the backing
                let before = masset.clone();
                let result = match op {
                    Op::Swap(i, o, a) => masset.swap(&ids[i], &ids[o], units(a, decimals[i]), 0, USER).map(|_| ()),
                    Op::Mint(i, a) => masset.mint(&ids[i], units(a, decimals[i]), 0, USER).map(|_| ()),
                    Op::Redeem(o, a) => masset.redeem(&ids[o], units(a, 18), 0, USER).map(|_| ()),
                };
                if result.is_err() {
                    prop_assert_eq!(&masset, &before);
                }
                prop_assert!(masset.total_scaled().unwrap() >= masset.total_supply + masset.surplus);
            }
        }
    }
}
