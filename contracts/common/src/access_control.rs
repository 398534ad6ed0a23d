//! Access Control Module
//!
//! Role-based access control for the basket and its upgrade.
//!
//! ## Roles
//!
//! - **Governor**: structural basket changes, fees and weight limits
//! - **Operator**: pause, unpause and isolation clearing around the migration
//!
//! The governor holds every permission an operator holds.

use crate::{Vec, MusdError, MusdResult};
use crate::types::Address;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// Basket roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum Role {
    /// Governor - can do anything
    Governor,
    /// Operator - can pause, unpause and negate isolation
    Operator,
}

impl Role {
    /// Get role priority (higher = more powerful)
    pub fn priority(&self) -> u8 {
        match self {
            Role::Governor => 100,
            Role::Operator => 60,
        }
    }
}

/// Permission types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Add or remove assets, set weight limits
    ManageBasket,
    /// Pause the basket
    Pause,
    /// Unpause the basket
    Unpause,
    /// Clear an asset's isolation after recollateralisation
    NegateIsolation,
}

impl Permission {
    /// Get minimum role required for this permission
    pub fn min_role(&self) -> Role {
        match self {
            Permission::Pause | Permission::Unpause | Permission::NegateIsolation => Role::Operator,
            _ => Role::Governor,
        }
    }
}

/// Role assignment for an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct RoleAssignment {
    /// Address with the role
    pub address: Address,
    /// Assigned role
    pub role: Role,
    /// Who granted the role
    pub granted_by: Address,
}

/// Access control state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct AccessControlState {
    /// Governor address
    pub governor: Address,
    /// Role assignments
    pub roles: Vec<RoleAssignment>,
}

impl AccessControlState {
    /// Create new access control state with a governor
    pub fn new(governor: Address) -> Self {
        let mut roles = Vec::new();
        roles.push(RoleAssignment { address: governor, role: Role::Governor, granted_by: governor });
        Self { governor, roles }
    }
}

// ============================================================================
// Core Access Control Functions
// ============================================================================

/// Check if address has a specific role
pub fn has_role(state: &AccessControlState, address: &Address, role: Role) -> bool {
    state.roles.iter().any(|r| r.address == *address && r.role == role)
}

/// Check if address has permission for action
pub fn has_permission(state: &AccessControlState, address: &Address, permission: Permission) -> bool {
    let min_priority = permission.min_role().priority();
    state
        .roles
        .iter()
        .any(|r| r.address == *address && r.role.priority() >= min_priority)
}

/// Fail unless the signer holds the permission
pub fn require_permission(state: &AccessControlState, signer: &Address, permission: Permission) -> MusdResult<()> {
    if has_permission(state, signer, permission) {
        return Ok(());
    }
    match permission.min_role() {
        Role::Governor => Err(MusdError::AdminOnly),
        Role::Operator => Err(MusdError::Unauthorized { expected: state.governor, actual: *signer }),
    }
}

/// Grant a role to an address (governor only)
pub fn grant_role(state: &mut AccessControlState, granter: Address, grantee: Address, role: Role) -> MusdResult<()> {
    if granter != state.governor {
        return Err(MusdError::AdminOnly);
    }
    if has_role(state, &grantee, role) {
        return Ok(());
    }
    state.roles.push(RoleAssignment { address: grantee, role, granted_by: granter });
    log::info!("granted {:?} role", role);
    Ok(())
}

/// Revoke a role from an address (governor only; the governor role is permanent)
pub fn revoke_role(state: &mut AccessControlState, revoker: Address, target: Address, role: Role) -> MusdResult<()> {
    if revoker != state.governor {
        return Err(MusdError::AdminOnly);
    }
    if target == state.governor && role == Role::Governor {
        return Err(MusdError::InvalidInput { param: "target", reason: "cannot revoke governor" });
    }
    let before = state.roles.len();
    state.roles.retain(|r| !(r.address == target && r.role == role));
    if state.roles.len() < before {
        log::info!("revoked {:?} role", role);
    }
    Ok(())
}
