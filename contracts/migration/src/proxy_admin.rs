//! Delayed Proxy Admin
//!
//! Holds a single upgrade request for the basket proxy and releases it once
//! the mandatory delay has passed.
//!
//! ## Lifecycle
//!
//! ```text
//! propose ──► pending ──(now >= proposed_at + delay)──► accept ──► executed
//! ```
//!
//! A request is never cancelled or replaced, and it executes at most once.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use musd_common::{
    check,
    errors::{MusdError, MusdResult},
    interfaces::{atomically, Revertible, UpgradeTarget},
    types::{Address, ImplementationId},
    validation::{require_admin, require_valid_address},
};

/// SHA-256 over the implementation id and the initialisation payload
pub fn request_hash(implementation: &ImplementationId, payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(implementation);
    hasher.update((payload.len() as u64).to_le_bytes());
    hasher.update(payload);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// A proposed upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MigrationRequest {
    /// Implementation the proxy will point at
    pub implementation: ImplementationId,
    /// Encoded one-time initialisation call
    pub payload: Vec<u8>,
    /// Timestamp of the proposal
    pub proposed_at: u64,
    /// Delay fixed when the request was made
    pub delay: u64,
    /// Set once, when the request is accepted
    pub executed: bool,
}

impl MigrationRequest {
    /// Earliest timestamp the request can be accepted at
    pub fn ready_at(&self) -> MusdResult<u64> {
        self.proposed_at.checked_add(self.delay).ok_or(MusdError::Overflow)
    }

    pub fn is_ready(&self, now: u64) -> bool {
        self.ready_at().is_ok_and(|ready_at| now >= ready_at)
    }

    pub fn request_hash(&self) -> [u8; 32] {
        request_hash(&self.implementation, &self.payload)
    }
}

/// Outcome of an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AcceptedUpgrade {
    pub request_hash: [u8; 32],
    pub previous: ImplementationId,
    pub implementation: ImplementationId,
    pub accepted_at: u64,
}

/// Timelocked admin of the basket proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct DelayedProxyAdmin {
    /// Only address allowed to propose and accept
    pub admin: Address,
    /// Delay applied to new requests
    pub upgrade_delay: u64,
    request: Option<MigrationRequest>,
}

impl DelayedProxyAdmin {
    pub fn new(admin: Address, upgrade_delay: u64) -> Self {
        Self { admin, upgrade_delay, request: None }
    }

    pub fn request(&self) -> Option<&MigrationRequest> {
        self.request.as_ref()
    }

    /// Whether the stored request has already been accepted
    pub fn is_executed(&self) -> bool {
        self.request.as_ref().is_some_and(|r| r.executed)
    }

    /// Record an upgrade request starting the delay at `now`
    pub fn propose(
        &mut self,
        caller: Address,
        implementation: ImplementationId,
        payload: Vec<u8>,
        now: u64,
    ) -> MusdResult<&MigrationRequest> {
        require_admin(self.admin, caller)?;
        check!(self.request.is_none(), MusdError::InvalidStateTransition);
        require_valid_address(implementation, "implementation")?;
        check!(!payload.is_empty(), MusdError::InvalidPayload);

        let request = MigrationRequest { implementation, payload, proposed_at: now, delay: self.upgrade_delay, executed: false };
        log::info!("upgrade proposed at {}, ready at {:?}", now, request.ready_at());
        Ok(self.request.insert(request))
    }

    /// Point the proxy at the requested implementation and run its
    /// initialisation. The target is restored if initialisation fails.
    pub fn accept<T>(&mut self, caller: Address, target: &mut T, now: u64) -> MusdResult<AcceptedUpgrade>
    where
        T: UpgradeTarget + Revertible + ?Sized,
    {
        require_admin(self.admin, caller)?;
        let request = self.request.as_mut().ok_or(MusdError::NoPendingMigration)?;
        check!(!request.executed, MusdError::AlreadyMigrated);
        let ready_at = request.ready_at()?;
        check!(now >= ready_at, MusdError::TimelockNotElapsed { ready_at, now });

        let previous = target.implementation();
        atomically(target, |t| t.upgrade_to_and_call(request.implementation, &request.payload))?;
        request.executed = true;

        log::info!("upgrade accepted at {}", now);
        Ok(AcceptedUpgrade {
            request_hash: request.request_hash(),
            previous,
            implementation: request.implementation,
            accepted_at: now,
        })
    }
}
