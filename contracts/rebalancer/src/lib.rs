//! mUSD Rebalancer
//!
//! Moves the mUSD basket toward equal weights ahead of, and during, the
//! V2 to V3 migration.
//!
//! ## Key Features
//!
//! - **Weight Targets**: Equal-weight target and signed distance per asset
//! - **Direct Swap Planner**: Bounded basket swaps that never overshoot the
//!   target, with bookkeeping drift checks against the live basket
//! - **Flash-Loan Rebalancer**: Borrow the underweight asset, push it through
//!   the basket, offload the overweight assets on two venues and repay, all
//!   as one atomic unit
//! - **Simulated Counterparties**: In-memory lender, venues and funding
//!   account for rehearsals
//!
//! Every external system is reached through the capability traits in
//! `musd_common::interfaces`.

pub mod weights;
pub mod planner;
pub mod flash;
pub mod simulated;

pub use weights::{compute_targets, equal_weight_target, overweight_splits, target_distances, weights_bps, WeightTargets};
pub use planner::{DirectSwapPlanner, Holding, PlannerConfig, SwapOutcome, SwapPlan};
pub use flash::{FlashLoanPlan, FlashRebalancer, RebalanceConfig, RebalanceRequest, RebalanceResult};
pub use simulated::{FlashLoanState, FundingAccount, FundingLine, Reserve, SimulatedLender, SimulatedVenue};
