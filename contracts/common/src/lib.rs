//! mUSD Common Library
//!
//! Shared types, constants, and utilities for the mUSD basket migration and
//! rebalancing engine.
//!
//! ## Key Features
//!
//! - **Decimal Scaling**: Fixed asset ratios (`1e8 * 10^(18 - decimals)`) and
//!   checked conversion between native and common precision
//! - **Basis-Point Math**: Loan splits, slippage bounds and relative tolerance
//! - **Capability Traits**: Basket engine, flash lender, liquidity venues,
//!   funding account and upgrade proxy are all injected through `interfaces`
//! - **Event Log**: Typed events carried inside outcome objects
//! - **Access Control**: Governor and operator roles
//!
//! This crate is `no_std` compatible when built without the default `std`
//! feature.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

// Re-export Vec and String for submodules based on feature
#[cfg(not(feature = "std"))]
pub use alloc::{string::String, vec::Vec};
#[cfg(feature = "std")]
pub use std::{string::String, vec::Vec};

pub mod constants;
pub mod errors;
pub mod types;
pub mod math;
pub mod events;
pub mod validation;
pub mod access_control;
pub mod interfaces;

// Re-exports for convenience
pub use constants::*;
pub use errors::*;
pub use types::*;
pub use math::*;
pub use events::*;
pub use validation::*;
pub use access_control::*;
pub use interfaces::*;
