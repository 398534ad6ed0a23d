//! Capability Interfaces
//!
//! The engine never binds to a concrete basket, lender or exchange. Each
//! external system is reached through one of these traits and handed to the
//! operation that needs it as an explicit `&mut` handle.

use crate::Vec;
use crate::errors::MusdResult;
use crate::types::{Address, Asset, AssetId, AssetState, BasketFlags, ImplementationId, MassetStorage};

/// The basket engine that holds collateral and issues the mAsset
pub trait BasketEngine {
    /// Balance, precision and status of one asset
    fn asset_state(&self, asset: &AssetId) -> MusdResult<AssetState>;

    /// All assets in basket order
    fn assets(&self) -> Vec<Asset>;

    /// Basket-wide flags
    fn flags(&self) -> BasketFlags;

    /// Whether the basket is paused
    fn is_paused(&self) -> bool;

    /// Swap `amount` of `input` for `output`; returns the output amount
    fn swap(
        &mut self,
        input: &AssetId,
        output: &AssetId,
        amount: u128,
        min_output: u128,
        recipient: Address,
    ) -> MusdResult<u128>;

    /// Deposit `amount` of `input` and mint the mAsset; returns the minted amount
    fn mint(&mut self, input: &AssetId, amount: u128, min_output: u128, recipient: Address) -> MusdResult<u128>;

    /// Redeem an mAsset quantity into a single asset; returns the asset amount
    fn redeem(&mut self, output: &AssetId, masset_amount: u128, min_output: u128, recipient: Address) -> MusdResult<u128>;

    /// Redeem exact asset amounts; returns the mAsset burned
    fn redeem_exact(&mut self, outputs: &[(AssetId, u128)], max_masset: u128, recipient: Address) -> MusdResult<u128>;

    /// Pause every mutating entrypoint
    fn pause(&mut self, caller: Address) -> MusdResult<()>;

    /// Lift the pause
    fn unpause(&mut self, caller: Address) -> MusdResult<()>;

    /// Add an asset; returns its index
    fn add_asset(&mut self, caller: Address, asset: Asset) -> MusdResult<usize>;

    /// Remove an empty asset
    fn remove_asset(&mut self, caller: Address, asset: &AssetId) -> MusdResult<()>;

    /// Set per-asset maximum weights (1e18 = 100%)
    fn set_weight_limits(&mut self, caller: Address, assets: &[AssetId], max_weights: &[u128]) -> MusdResult<()>;

    /// Clear an asset's isolation after recollateralisation
    fn negate_isolation(&mut self, caller: Address, asset: &AssetId) -> MusdResult<()>;

    /// Vault balances of every asset in common precision, basket order
    fn scaled_balances(&self) -> MusdResult<Vec<u128>> {
        self.assets().iter().map(Asset::scaled_balance).collect()
    }
}

/// Lender that funds a loan for the duration of one callback
pub trait FlashLender {
    /// Fee charged on a loan of `amount`
    fn flash_fee(&self, asset: &AssetId, amount: u128) -> MusdResult<u128>;

    /// Largest loan currently available
    fn max_flash_loan(&self, asset: &AssetId) -> u128;

    /// Lend `amount`, run the borrower callback, and require principal plus
    /// fee back before returning. Returns the fee charged.
    fn flash_loan(&mut self, asset: &AssetId, amount: u128, borrower: &mut dyn FlashBorrower) -> MusdResult<u128>;
}

/// Continuation executed while a flash loan is outstanding
pub trait FlashBorrower {
    /// Use the loan and return the amount handed back to the lender
    fn on_flash_loan(&mut self, asset: &AssetId, amount: u128, fee: u128) -> MusdResult<u128>;
}

/// External liquidity pool
pub trait LiquidityVenue {
    /// Exchange `amount_in` of `input` for `output`; fails below `min_output`
    fn exchange(&mut self, input: &AssetId, output: &AssetId, amount_in: u128, min_output: u128) -> MusdResult<u128>;
}

/// Pre-approved account that covers flash loan shortfalls
pub trait FundingSource {
    /// Remaining amount the engine may pull
    fn allowance(&self, asset: &AssetId) -> u128;

    /// Balance held by the account
    fn balance(&self, asset: &AssetId) -> u128;

    /// Pull `amount`; fails with `InsufficientFunding`
    fn pull(&mut self, asset: &AssetId, amount: u128) -> MusdResult<()>;

    /// Return surplus proceeds to the account
    fn refund(&mut self, asset: &AssetId, amount: u128) -> MusdResult<()>;
}

/// Proxy whose backing implementation can be replaced
pub trait UpgradeTarget {
    /// Current implementation
    fn implementation(&self) -> ImplementationId;

    /// Point at `implementation` and run the one-time initialisation payload
    fn upgrade_to_and_call(&mut self, implementation: ImplementationId, payload: &[u8]) -> MusdResult<()>;
}

/// Read-only access to the storage the validator compares
pub trait StorageView {
    fn storage(&self) -> MassetStorage;
}

/// State that can be restored when an atomic unit fails
pub trait Revertible {
    type Checkpoint;

    /// Capture the current state
    fn checkpoint(&self) -> Self::Checkpoint;

    /// Restore a previously captured state
    fn revert_to(&mut self, checkpoint: Self::Checkpoint);
}

/// Run `f` against `state`, restoring the checkpoint if it fails
pub fn atomically<S, T, F>(state: &mut S, f: F) -> MusdResult<T>
where
    S: Revertible + ?Sized,
    F: FnOnce(&mut S) -> MusdResult<T>,
{
    let checkpoint = state.checkpoint();
    let result = f(state);
    if let Err(e) = &result {
        log::debug!("atomic unit failed with {}, restoring checkpoint", e.code());
        state.revert_to(checkpoint);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MusdError;

    #[derive(Debug, Default)]
    struct Counter {
        value: u128,
    }

    impl Revertible for Counter {
        type Checkpoint = u128;

        fn checkpoint(&self) -> u128 {
            self.value
        }

        fn revert_to(&mut self, checkpoint: u128) {
            self.value = checkpoint;
        }
    }

    #[test]
    fn test_atomically_commits_on_success() {
        let mut counter = Counter::default();
        atomically(&mut counter, |c| {
            c.value += 5;
            Ok(())
        })
        .unwrap();
        assert_eq!(counter.value, 5);
    }

    #[test]
    fn test_atomically_reverts_on_failure() {
        let mut counter = Counter { value: 3 };
        let result: MusdResult<()> = atomically(&mut counter, |c| {
            c.value += 5;
            Err(MusdError::Unhealthy)
        });
        assert_eq!(result, Err(MusdError::Unhealthy));
        assert_eq!(counter.value, 3);
    }
}
