//! Direct Swap Planner
//!
//! Plans bounded swaps between two basket assets that move both toward a
//! target balance without overshooting either.
//!
//! ## Algorithm
//!
//! ```text
//! diff_in  = target - balance_in
//! diff_out = balance_out - effective_target   (0 when phasing the output out)
//! amount   = min(diff_in, diff_out)
//! ```
//!
//! A non-positive amount is a no-op. The amount is in common precision and is
//! rescaled to the native precision of the input asset before it is sent to
//! the basket.
//!
//! ## Bookkeeping
//!
//! The planner keeps its own scaled balances, captured once from the basket,
//! and moves them by exactly `amount` after each swap. Realised swap fees are
//! ignored, so the bookkeeping drifts from the basket by the fees paid;
//! `drift_bps` measures that drift against the live basket.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use musd_common::{
    constants::rebalance::{MAX_BASKET_SLIPPAGE_BPS, PLANNER_DRIFT_TOLERANCE_BPS},
    errors::{MusdError, MusdResult},
    events::{EventLog, MusdEvent},
    interfaces::BasketEngine,
    math::{min_output, relative_diff_bps, to_native, to_signed},
    types::{Address, AssetId},
};

// ============ Types ============

/// Planner's view of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Holding {
    pub asset: AssetId,
    /// Fixed decimal ratio of the asset
    pub ratio: u128,
    /// Bookkept balance in common precision
    pub scaled: u128,
}

/// A planned swap into the basket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SwapPlan {
    /// Asset sent into the basket
    pub input: AssetId,
    /// Asset taken out of the basket
    pub output: AssetId,
    /// Bounded amount in common precision
    pub scaled_amount: u128,
    /// Amount of `input` in its native precision
    pub input_amount: u128,
    /// Minimum accepted `output` in its native precision
    pub min_output: u128,
}

/// Result of an executed plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct SwapOutcome {
    pub plan: SwapPlan,
    /// Amount of `output` the basket returned
    pub output_amount: u128,
}

/// Planner configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct PlannerConfig {
    /// Slippage bound used to derive `min_output`
    pub max_slippage_bps: u16,
    /// Bookkeeping drift accepted by `check_drift`
    pub drift_tolerance_bps: u16,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: MAX_BASKET_SLIPPAGE_BPS,
            drift_tolerance_bps: PLANNER_DRIFT_TOLERANCE_BPS,
        }
    }
}

// ============ Planner ============

/// Bookkeeping planner for direct basket swaps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct DirectSwapPlanner {
    pub config: PlannerConfig,
    holdings: Vec<Holding>,
    events: EventLog,
}

impl DirectSwapPlanner {
    /// Capture the scaled balances of every basket asset
    pub fn from_basket<B: BasketEngine + ?Sized>(basket: &B, config: PlannerConfig) -> MusdResult<Self> {
        let holdings = basket
            .assets()
            .iter()
            .map(|a| Ok(Holding { asset: a.addr, ratio: a.ratio, scaled: a.scaled_balance()? }))
            .collect::<MusdResult<Vec<_>>>()?;
        Ok(Self { config, holdings, events: EventLog::new() })
    }

    /// Bookkept holdings
    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    /// Bookkept scaled balance of an asset
    pub fn balance_of(&self, asset: &AssetId) -> MusdResult<u128> {
        Ok(self.holding(asset)?.scaled)
    }

    /// Events of executed swaps
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    fn holding(&self, asset: &AssetId) -> MusdResult<&Holding> {
        self.holdings
            .iter()
            .find(|h| h.asset == *asset)
            .ok_or(MusdError::AssetNotFound { asset: *asset })
    }

    fn holding_mut(&mut self, asset: &AssetId) -> MusdResult<&mut Holding> {
        self.holdings
            .iter_mut()
            .find(|h| h.asset == *asset)
            .ok_or(MusdError::AssetNotFound { asset: *asset })
    }

    /// Plan a swap of `input` into the basket for `output`.
    ///
    /// With `phase_out_output` the output's target is treated as zero, so the
    /// swap drains it as far as the input's distance allows. Returns `None`
    /// when the bounded amount is not positive.
    pub fn plan(&self, input: &AssetId, output: &AssetId, target: u128, phase_out_output: bool) -> MusdResult<Option<SwapPlan>> {
        if input == output {
            return Err(MusdError::InvalidInput { param: "output", reason: "input and output are the same" });
        }
        let holding_in = self.holding(input)?;
        let holding_out = self.holding(output)?;

        let effective_target = if phase_out_output { 0 } else { target };
        let diff_in = to_signed(target)? - to_signed(holding_in.scaled)?;
        let diff_out = to_signed(holding_out.scaled)? - to_signed(effective_target)?;
        let amount = diff_in.min(diff_out);

        if amount <= 0 {
            log::debug!("no swap needed: diff_in {}, diff_out {}", diff_in, diff_out);
            return Ok(None);
        }

        let scaled_amount = amount as u128;
        let input_amount = to_native(scaled_amount, holding_in.ratio)?;
        if input_amount == 0 {
            return Ok(None);
        }
        let expected_output = to_native(scaled_amount, holding_out.ratio)?;

        Ok(Some(SwapPlan {
            input: *input,
            output: *output,
            scaled_amount,
            input_amount,
            min_output: min_output(expected_output, self.config.max_slippage_bps)?,
        }))
    }

    /// Submit a plan to the basket and move the bookkeeping by the planned
    /// amount.
    pub fn execute<B: BasketEngine + ?Sized>(&mut self, basket: &mut B, plan: &SwapPlan, recipient: Address) -> MusdResult<SwapOutcome> {
        let input_after = self.balance_of(&plan.input)?.checked_add(plan.scaled_amount).ok_or(MusdError::Overflow)?;
        let output_after = self.balance_of(&plan.output)?.checked_sub(plan.scaled_amount).ok_or(MusdError::Underflow)?;

        let output_amount = basket.swap(&plan.input, &plan.output, plan.input_amount, plan.min_output, recipient)?;

        self.holding_mut(&plan.input)?.scaled = input_after;
        self.holding_mut(&plan.output)?.scaled = output_after;
        self.events.emit(MusdEvent::DirectSwap {
            input: plan.input,
            output: plan.output,
            scaled_amount: plan.scaled_amount,
            input_amount: plan.input_amount,
        });
        log::info!("direct swap: {} scaled in, {} out", plan.scaled_amount, output_amount);
        Ok(SwapOutcome { plan: *plan, output_amount })
    }

    /// Plan and execute in one step; `None` when there is nothing to do
    pub fn balance<B: BasketEngine + ?Sized>(
        &mut self,
        basket: &mut B,
        input: &AssetId,
        output: &AssetId,
        target: u128,
        phase_out_output: bool,
        recipient: Address,
    ) -> MusdResult<Option<SwapOutcome>> {
        match self.plan(input, output, target, phase_out_output)? {
            Some(plan) => self.execute(basket, &plan, recipient).map(Some),
            None => Ok(None),
        }
    }

    /// Largest relative divergence between bookkeeping and the live basket,
    /// in bps (rounded up)
    pub fn drift_bps<B: BasketEngine + ?Sized>(&self, basket: &B) -> MusdResult<u128> {
        let mut worst = 0;
        for holding in &self.holdings {
            let live = basket.asset_state(&holding.asset)?.scaled_balance()?;
            worst = worst.max(relative_diff_bps(holding.scaled, live));
        }
        Ok(worst)
    }

    /// Fail when bookkeeping drift exceeds the configured tolerance
    pub fn check_drift<B: BasketEngine + ?Sized>(&self, basket: &B) -> MusdResult<u128> {
        let drift = self.drift_bps(basket)?;
        if drift > u128::from(self.config.drift_tolerance_bps) {
            log::warn!("planner drift {} bps above tolerance {}", drift, self.config.drift_tolerance_bps);
            return Err(MusdError::PreconditionViolation { reason: "planner bookkeeping drifted beyond tolerance" });
        }
        Ok(drift)
    }
}
