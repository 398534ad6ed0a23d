//! Flash-Loan Rebalance Engine
//!
//! Tops an underweight loan asset up to its target by borrowing it, swapping
//! the loan into two overweight destination assets through the basket, and
//! selling those destination assets back into the loan asset on two external
//! venues to repay the lender.
//!
//! ## Sequence
//!
//! 1. Size the loan: `(target - balance) * pct / 100` in native precision
//! 2. Split it by bps across the two destinations
//! 3. Borrow; the lender calls back into the engine
//! 4. Swap each split into its destination through the basket
//! 5. Offload each destination on its venue back into the loan asset
//! 6. Cover any shortfall from the funding account, refund any surplus
//! 7. Repay principal plus fee
//!
//! Steps 3 to 7 are one atomic unit. Basket, lender, venues and funding
//! account are checkpointed before the loan and restored if any step fails.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use musd_common::{
    check,
    constants::rebalance::{DEFAULT_LOAN_PERCENT, MAX_BASKET_SLIPPAGE_BPS, MAX_VENUE_SLIPPAGE_BPS},
    errors::{MusdError, MusdResult},
    events::{EventLog, MusdEvent},
    interfaces::{BasketEngine, FlashBorrower, FlashLender, FundingSource, LiquidityVenue, Revertible},
    math::{checked_sum, min_output, split_by_bps, to_native, to_scaled},
    types::{Address, AssetId},
};

// ============ Request & Configuration ============

/// What to rebalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RebalanceRequest {
    /// Underweight asset borrowed and pushed into the basket
    pub loan_asset: AssetId,
    /// Target balance of the loan asset in common precision
    pub target: u128,
    /// Overweight assets taken out of the basket
    pub destinations: [AssetId; 2],
    /// Share of the loan swapped into each destination (sum 10000)
    pub splits_bps: [u16; 2],
    /// Scale the loan down when venues lack depth (1..=100)
    pub loan_percent: u8,
}

impl RebalanceRequest {
    pub fn new(loan_asset: AssetId, target: u128, destinations: [AssetId; 2], splits_bps: [u16; 2]) -> Self {
        Self { loan_asset, target, destinations, splits_bps, loan_percent: DEFAULT_LOAN_PERCENT }
    }

    pub fn with_loan_percent(mut self, loan_percent: u8) -> Self {
        self.loan_percent = loan_percent;
        self
    }
}

/// Slippage bounds applied to each step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RebalanceConfig {
    /// Bound on basket swaps (step 4)
    pub max_basket_slippage_bps: u16,
    /// Bound on venue exchanges (step 5)
    pub max_venue_slippage_bps: u16,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            max_basket_slippage_bps: MAX_BASKET_SLIPPAGE_BPS,
            max_venue_slippage_bps: MAX_VENUE_SLIPPAGE_BPS,
        }
    }
}

// ============ Plan & Result ============

/// Sized loan, computed before any external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FlashLoanPlan {
    pub loan_asset: AssetId,
    /// Loan in the loan asset's native precision
    pub loan_amount: u128,
    pub destinations: [AssetId; 2],
    pub splits_bps: [u16; 2],
    /// `loan_amount * bps / 10000` per destination
    pub split_amounts: [u128; 2],
    /// Fee quoted by the lender
    pub lender_fee: u128,
    /// Shortfall if every step executes at par: the lender fee
    pub expected_shortfall: u128,
}

impl FlashLoanPlan {
    /// Rounding remainder of the split, kept by the engine toward repayment
    pub fn split_dust(&self) -> u128 {
        self.loan_amount - self.split_amounts[0] - self.split_amounts[1]
    }
}

/// Outcome of a completed rebalance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RebalanceResult {
    pub loan_asset: AssetId,
    pub loan_amount: u128,
    pub lender_fee: u128,
    pub splits_bps: [u16; 2],
    /// Loan asset swapped into the basket per destination
    pub swapped: [u128; 2],
    /// Destination assets the basket returned
    pub basket_outputs: [u128; 2],
    /// Loan asset returned by each venue
    pub venue_proceeds: [u128; 2],
    /// Venue proceeds plus split dust
    pub recovered: u128,
    /// Pulled from the funding account
    pub shortfall: u128,
    /// Refunded to the funding account
    pub surplus: u128,
    /// Scaled basket value before the loan
    pub value_before: u128,
    /// Scaled basket value after repayment
    pub value_after: u128,
    pub balances_before: Vec<u128>,
    pub balances_after: Vec<u128>,
    pub events: EventLog,
}

impl RebalanceResult {
    /// Scaled value the basket gained (fees and rounding kept by the basket)
    pub fn value_gained(&self) -> i128 {
        self.value_after as i128 - self.value_before as i128
    }
}

// ============ Callback ============

#[derive(Debug, Clone, Copy, Default)]
struct Execution {
    swapped: [u128; 2],
    basket_outputs: [u128; 2],
    venue_proceeds: [u128; 2],
    recovered: u128,
    shortfall: u128,
    surplus: u128,
}

/// Steps 4 to 7, run while the loan is outstanding
struct RebalanceCallback<'a, B: ?Sized, V, F: ?Sized> {
    basket: &'a mut B,
    venues: &'a mut [V; 2],
    funding: &'a mut F,
    plan: &'a FlashLoanPlan,
    config: &'a RebalanceConfig,
    recipient: Address,
    execution: Option<Execution>,
    events: EventLog,
}

impl<B, V, F> FlashBorrower for RebalanceCallback<'_, B, V, F>
where
    B: BasketEngine + ?Sized,
    V: LiquidityVenue,
    F: FundingSource + ?Sized,
{
    fn on_flash_loan(&mut self, asset: &AssetId, amount: u128, fee: u128) -> MusdResult<u128> {
        let plan = self.plan;
        check!(
            *asset == plan.loan_asset && amount == plan.loan_amount,
            MusdError::PreconditionViolation { reason: "lender funded a different loan than planned" }
        );

        let loan_ratio = self.basket.asset_state(&plan.loan_asset)?.ratio;
        let mut execution = Execution::default();
        let mut destination_ratios = [0u128; 2];

        // Step 4: loan asset into the basket, destinations out
        for i in 0..2 {
            let split = plan.split_amounts[i];
            if split == 0 {
                continue;
            }
            let destination = plan.destinations[i];
            destination_ratios[i] = self.basket.asset_state(&destination)?.ratio;

            let expected = to_native(to_scaled(split, loan_ratio)?, destination_ratios[i])?;
            let minimum = min_output(expected, self.config.max_basket_slippage_bps)?;
            let output = self.basket.swap(&plan.loan_asset, &destination, split, minimum, self.recipient)?;

            log::debug!("basket swap {}: {} in, {} out", i, split, output);
            self.events.emit(MusdEvent::Swapped {
                recipient: self.recipient,
                input: plan.loan_asset,
                output: destination,
                input_amount: split,
                output_amount: output,
                fee: expected.saturating_sub(output),
            });
            execution.swapped[i] = split;
            execution.basket_outputs[i] = output;
        }

        // Step 5: destinations back into the loan asset on their venues
        for i in 0..2 {
            let output = execution.basket_outputs[i];
            if output == 0 {
                continue;
            }
            let destination = plan.destinations[i];
            let expected = to_native(to_scaled(output, destination_ratios[i])?, loan_ratio)?;
            let minimum = min_output(expected, self.config.max_venue_slippage_bps)?;
            let proceeds = self.venues[i].exchange(&destination, &plan.loan_asset, output, minimum)?;

            log::debug!("venue {} offload: {} in, {} proceeds", i, output, proceeds);
            self.events.emit(MusdEvent::VenueExchange {
                venue: i as u8,
                input: destination,
                output: plan.loan_asset,
                input_amount: output,
                output_amount: proceeds,
            });
            execution.venue_proceeds[i] = proceeds;
        }

        // Step 6: settle the difference with the funding account
        execution.recovered = checked_sum(&[execution.venue_proceeds[0], execution.venue_proceeds[1], plan.split_dust()])?;
        let owed = amount.checked_add(fee).ok_or(MusdError::Overflow)?;
        if execution.recovered < owed {
            execution.shortfall = owed - execution.recovered;
            log::info!("pulling shortfall {} from funding account", execution.shortfall);
            self.funding.pull(&plan.loan_asset, execution.shortfall)?;
        } else if execution.recovered > owed {
            execution.surplus = execution.recovered - owed;
            log::info!("refunding surplus {} to funding account", execution.surplus);
            self.funding.refund(&plan.loan_asset, execution.surplus)?;
        }

        // Step 7: hand principal plus fee back to the lender
        self.execution = Some(execution);
        Ok(owed)
    }
}

// ============ Engine ============

/// Flash-loan funded basket rebalancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct FlashRebalancer {
    pub config: RebalanceConfig,
    /// Address the engine trades as
    pub operator: Address,
}

impl FlashRebalancer {
    pub fn new(operator: Address) -> Self {
        Self { config: RebalanceConfig::default(), operator }
    }

    pub fn with_config(mut self, config: RebalanceConfig) -> Self {
        self.config = config;
        self
    }

    /// Steps 1 and 2. Reads the basket and the lender's fee quote only.
    pub fn plan<B, L>(&self, basket: &B, lender: &L, request: &RebalanceRequest) -> MusdResult<FlashLoanPlan>
    where
        B: BasketEngine + ?Sized,
        L: FlashLender + ?Sized,
    {
        check!(
            (1..=100).contains(&request.loan_percent),
            MusdError::PreconditionViolation { reason: "loan percentage must be within 1..=100" }
        );
        check!(
            !request.destinations.contains(&request.loan_asset) && request.destinations[0] != request.destinations[1],
            MusdError::PreconditionViolation { reason: "destinations must differ from each other and the loan asset" }
        );
        // Validates the bps sum before any amount is computed
        split_by_bps(0, request.splits_bps)?;

        let loan_state = basket.asset_state(&request.loan_asset)?;
        let target = to_native(request.target, loan_state.ratio)?;
        check!(
            target > loan_state.balance,
            MusdError::PreconditionViolation { reason: "loan asset already at or above target" }
        );

        let loan_amount = (target - loan_state.balance)
            .checked_mul(u128::from(request.loan_percent))
            .ok_or(MusdError::Overflow)?
            / 100;
        check!(loan_amount > 0, MusdError::PreconditionViolation { reason: "loan rounds to zero" });

        let split_amounts = split_by_bps(loan_amount, request.splits_bps)?;
        let lender_fee = lender.flash_fee(&request.loan_asset, loan_amount)?;

        Ok(FlashLoanPlan {
            loan_asset: request.loan_asset,
            loan_amount,
            destinations: request.destinations,
            splits_bps: request.splits_bps,
            split_amounts,
            lender_fee,
            expected_shortfall: lender_fee,
        })
    }

    /// Run the full sequence as one atomic unit
    pub fn rebalance<B, L, V, F>(
        &self,
        basket: &mut B,
        lender: &mut L,
        venues: &mut [V; 2],
        funding: &mut F,
        request: &RebalanceRequest,
    ) -> MusdResult<RebalanceResult>
    where
        B: BasketEngine + Revertible,
        L: FlashLender + Revertible,
        V: LiquidityVenue + Revertible,
        F: FundingSource + Revertible,
    {
        let plan = self.plan(&*basket, &*lender, request)?;
        let available = lender.max_flash_loan(&plan.loan_asset);
        check!(
            available >= plan.loan_amount,
            MusdError::InsufficientLiquidity { available, requested: plan.loan_amount }
        );

        let balances_before = basket.scaled_balances()?;
        let value_before = checked_sum(&balances_before)?;
        log::info!(
            "rebalance: borrowing {} split {:?} into {:?}",
            plan.loan_amount,
            plan.split_amounts,
            plan.splits_bps
        );

        let basket_checkpoint = basket.checkpoint();
        let lender_checkpoint = lender.checkpoint();
        let venue_checkpoints = [venues[0].checkpoint(), venues[1].checkpoint()];
        let funding_checkpoint = funding.checkpoint();

        let mut callback = RebalanceCallback {
            basket: &mut *basket,
            venues: &mut *venues,
            funding: &mut *funding,
            plan: &plan,
            config: &self.config,
            recipient: self.operator,
            execution: None,
            events: EventLog::new(),
        };
        let loan = lender.flash_loan(&plan.loan_asset, plan.loan_amount, &mut callback);
        let RebalanceCallback { execution, events: step_events, .. } = callback;

        let settled = loan.and_then(|fee| {
            let execution = execution.ok_or(MusdError::InvalidStateTransition)?;
            let balances_after = basket.scaled_balances()?;
            Ok((fee, execution, balances_after))
        });

        let (lender_fee, execution, balances_after) = match settled {
            Ok(settled) => settled,
            Err(e) => {
                log::warn!("rebalance failed ({}), restoring every participant", e.code());
                basket.revert_to(basket_checkpoint);
                lender.revert_to(lender_checkpoint);
                let [first, second] = venue_checkpoints;
                venues[0].revert_to(first);
                venues[1].revert_to(second);
                funding.revert_to(funding_checkpoint);
                return Err(e);
            }
        };

        let mut events = EventLog::new();
        events.emit(MusdEvent::FlashLoan {
            loan_asset: plan.loan_asset,
            amount: plan.loan_amount,
            fee: lender_fee,
            shortfall: execution.shortfall,
        });
        let mut step_events = step_events;
        events.append(&mut step_events);

        let value_after = checked_sum(&balances_after)?;
        log::info!(
            "rebalance complete: recovered {}, shortfall {}, surplus {}",
            execution.recovered,
            execution.shortfall,
            execution.surplus
        );

        Ok(RebalanceResult {
            loan_asset: plan.loan_asset,
            loan_amount: plan.loan_amount,
            lender_fee,
            splits_bps: plan.splits_bps,
            swapped: execution.swapped,
            basket_outputs: execution.basket_outputs,
            venue_proceeds: execution.venue_proceeds,
            recovered: execution.recovered,
            shortfall: execution.shortfall,
            surplus: execution.surplus,
            value_before,
            value_after,
            balances_before,
            balances_after,
            events,
        })
    }
}
