//! Simulated Counterparties
//!
//! In-memory lender, liquidity venue and funding account. They implement the
//! same capability traits production adapters do and are what rehearsals and
//! tests run the flash-loan engine against.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use musd_common::{
    check,
    errors::{MusdError, MusdResult},
    interfaces::{FlashBorrower, FlashLender, FundingSource, LiquidityVenue, Revertible},
    math::{apply_bps, ratio_for_decimals, to_native, to_scaled},
    types::AssetId,
    validation::{require_min_output, require_positive},
};

// ============ Flash Lender ============

/// Outstanding loan tracking for a single flash loan at a time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FlashLoanState {
    /// Principal currently lent out
    pub outstanding: u128,
    /// Total fees collected
    pub fees_collected: u128,
    /// Number of loans served
    pub loans: u32,
    /// Whether a borrower callback is running
    pub in_callback: bool,
}

impl FlashLoanState {
    /// True when nothing is lent out
    pub fn is_balanced(&self) -> bool {
        self.outstanding == 0 && !self.in_callback
    }
}

/// Lender charging a flat fee plus a bps fee on each loan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SimulatedLender {
    /// Lendable liquidity per asset
    pub liquidity: BTreeMap<AssetId, u128>,
    /// Flat fee in the loan asset's native units
    pub flat_fee: u128,
    /// Proportional fee in bps
    pub fee_bps: u16,
    pub state: FlashLoanState,
}

impl SimulatedLender {
    pub fn new(flat_fee: u128, fee_bps: u16) -> Self {
        Self { flat_fee, fee_bps, ..Self::default() }
    }

    /// Deposit lendable liquidity
    pub fn with_liquidity(mut self, asset: AssetId, amount: u128) -> Self {
        *self.liquidity.entry(asset).or_default() += amount;
        self
    }
}

impl FlashLender for SimulatedLender {
    fn flash_fee(&self, _asset: &AssetId, amount: u128) -> MusdResult<u128> {
        apply_bps(amount, self.fee_bps)?.checked_add(self.flat_fee).ok_or(MusdError::Overflow)
    }

    fn max_flash_loan(&self, asset: &AssetId) -> u128 {
        self.liquidity.get(asset).copied().unwrap_or_default()
    }

    fn flash_loan(&mut self, asset: &AssetId, amount: u128, borrower: &mut dyn FlashBorrower) -> MusdResult<u128> {
        check!(
            !self.state.in_callback,
            MusdError::InvalidInput { param: "flash_loan", reason: "nested flash loans not allowed" }
        );
        require_positive(amount)?;
        let available = self.max_flash_loan(asset);
        check!(available >= amount, MusdError::InsufficientLiquidity { available, requested: amount });

        let fee = self.flash_fee(asset, amount)?;
        let owed = amount.checked_add(fee).ok_or(MusdError::Overflow)?;

        self.liquidity.insert(*asset, available - amount);
        self.state.outstanding = amount;
        self.state.in_callback = true;

        let result = borrower.on_flash_loan(asset, amount, fee);
        self.state.in_callback = false;

        // A failed loan leaves the lender as it was before lending
        let repaid = match result.and_then(|repaid| {
            check!(repaid >= owed, MusdError::FlashLoanNotRepaid { owed, repaid });
            Ok(repaid)
        }) {
            Ok(repaid) => repaid,
            Err(e) => {
                self.liquidity.insert(*asset, available);
                self.state.outstanding = 0;
                return Err(e);
            }
        };

        self.liquidity.insert(*asset, available - amount + repaid);
        self.state.outstanding = 0;
        self.state.fees_collected = self.state.fees_collected.saturating_add(fee);
        self.state.loans += 1;
        Ok(fee)
    }
}

impl Revertible for SimulatedLender {
    type Checkpoint = SimulatedLender;

    fn checkpoint(&self) -> Self::Checkpoint {
        self.clone()
    }

    fn revert_to(&mut self, checkpoint: Self::Checkpoint) {
        *self = checkpoint;
    }
}

// ============ Liquidity Venue ============

/// Reserve of one asset held by a venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Reserve {
    pub ratio: u128,
    pub amount: u128,
}

/// Venue quoting every pair at par, scaled by a fixed execution rate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SimulatedVenue {
    /// Venue identifier reported in events
    pub id: u8,
    /// Output paid per unit of par value, in bps (10000 = at par, above
    /// 10000 pays a premium)
    pub rate_bps: u16,
    pub reserves: BTreeMap<AssetId, Reserve>,
}

impl SimulatedVenue {
    pub fn new(id: u8, rate_bps: u16) -> Self {
        Self { id, rate_bps, reserves: BTreeMap::new() }
    }

    /// Add reserves of an asset with the given native decimals
    pub fn with_reserve(mut self, asset: AssetId, decimals: u8, amount: u128) -> MusdResult<Self> {
        let ratio = ratio_for_decimals(decimals)?;
        let reserve = self.reserves.entry(asset).or_insert(Reserve { ratio, amount: 0 });
        reserve.amount = reserve.amount.checked_add(amount).ok_or(MusdError::Overflow)?;
        Ok(self)
    }

    /// Output the venue would pay for `amount_in`
    pub fn quote(&self, input: &AssetId, output: &AssetId, amount_in: u128) -> MusdResult<u128> {
        let reserve_in = self.reserve(input)?;
        let reserve_out = self.reserve(output)?;
        let par = to_native(to_scaled(amount_in, reserve_in.ratio)?, reserve_out.ratio)?;
        apply_bps(par, self.rate_bps)
    }

    fn reserve(&self, asset: &AssetId) -> MusdResult<Reserve> {
        self.reserves.get(asset).copied().ok_or(MusdError::AssetNotFound { asset: *asset })
    }
}

impl LiquidityVenue for SimulatedVenue {
    fn exchange(&mut self, input: &AssetId, output: &AssetId, amount_in: u128, min_output: u128) -> MusdResult<u128> {
        require_positive(amount_in)?;
        check!(input != output, MusdError::InvalidInput { param: "output", reason: "input and output are the same" });

        let amount_out = self.quote(input, output, amount_in)?;
        let available = self.reserve(output)?.amount;
        check!(available >= amount_out, MusdError::InsufficientLiquidity { available, requested: amount_out });
        require_min_output(amount_out, min_output)?;

        let reserve_in = self.reserves.get_mut(input).ok_or(MusdError::AssetNotFound { asset: *input })?;
        reserve_in.amount = reserve_in.amount.checked_add(amount_in).ok_or(MusdError::Overflow)?;
        if let Some(reserve_out) = self.reserves.get_mut(output) {
            reserve_out.amount -= amount_out;
        }
        Ok(amount_out)
    }
}

impl Revertible for SimulatedVenue {
    type Checkpoint = SimulatedVenue;

    fn checkpoint(&self) -> Self::Checkpoint {
        self.clone()
    }

    fn revert_to(&mut self, checkpoint: Self::Checkpoint) {
        *self = checkpoint;
    }
}

// ============ Funding Account ============

/// Balance and engine allowance of one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FundingLine {
    pub balance: u128,
    pub allowance: u128,
}

/// Pre-approved account covering flash loan shortfalls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FundingAccount {
    pub lines: BTreeMap<AssetId, FundingLine>,
}

impl FundingAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fund an asset and approve the engine to pull up to `allowance`
    pub fn with_line(mut self, asset: AssetId, balance: u128, allowance: u128) -> Self {
        self.lines.insert(asset, FundingLine { balance, allowance });
        self
    }
}

impl FundingSource for FundingAccount {
    fn allowance(&self, asset: &AssetId) -> u128 {
        self.lines.get(asset).map_or(0, |l| l.allowance)
    }

    fn balance(&self, asset: &AssetId) -> u128 {
        self.lines.get(asset).map_or(0, |l| l.balance)
    }

    fn pull(&mut self, asset: &AssetId, amount: u128) -> MusdResult<()> {
        let line = self.lines.entry(*asset).or_default();
        let available = line.balance.min(line.allowance);
        check!(available >= amount, MusdError::InsufficientFunding { required: amount, available });
        line.balance -= amount;
        line.allowance -= amount;
        Ok(())
    }

    fn refund(&mut self, asset: &AssetId, amount: u128) -> MusdResult<()> {
        let line = self.lines.entry(*asset).or_default();
        line.balance = line.balance.checked_add(amount).ok_or(MusdError::Overflow)?;
        Ok(())
    }
}

impl Revertible for FundingAccount {
    type Checkpoint = FundingAccount;

    fn checkpoint(&self) -> Self::Checkpoint {
        self.clone()
    }

    fn revert_to(&mut self, checkpoint: Self::Checkpoint) {
        *self = checkpoint;
    }
}
