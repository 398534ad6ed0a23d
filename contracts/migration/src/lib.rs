//! mUSD Migration
//!
//! Timelocked upgrade of the mUSD basket from V2 to V3.
//!
//! ## Key Features
//!
//! - **Delayed Proxy Admin**: One upgrade request, one week delay, executes
//!   at most once; SHA-256 request hash over implementation and payload
//! - **State Machine**: Propose, pause, accept, clear isolation and unpause,
//!   each gated on the previous phase
//! - **Storage Validator**: Every transition is checked against an expected
//!   snapshot; a mismatch halts the machine until the admin resolves it
//! - **Injected Clock**: The timelock compares timestamps from a `Clock`

pub mod clock;
pub mod proxy_admin;
pub mod storage_validator;
pub mod controller;

pub use clock::{Clock, ManualClock, SystemClock};
pub use proxy_admin::{request_hash, AcceptedUpgrade, DelayedProxyAdmin, MigrationRequest};
pub use storage_validator::{ExpectedAsset, Mismatch, StorageExpectations, StorageField, ValidationReport};
pub use controller::{MigrationConfig, MigrationController, MigrationPhase, MigrationResult};
