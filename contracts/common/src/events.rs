//! Engine Events
//!
//! Events are collected during execution and returned inside outcome objects
//! so operators can review each step without scraping logs.

use crate::Vec;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use crate::types::{Address, AssetId, ImplementationId};

/// Event types for indexing and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[borsh(use_discriminant = true)]
#[repr(u8)]
pub enum EventType {
    // Basket Events (0x01 - 0x1F)
    Minted = 0x01,
    Swapped = 0x02,
    Redeemed = 0x03,
    RedeemedMulti = 0x04,
    InterestCollected = 0x05,

    // Basket Admin Events (0x20 - 0x3F)
    AssetAdded = 0x20,
    AssetRemoved = 0x21,
    WeightLimitsUpdated = 0x22,
    Paused = 0x23,
    Unpaused = 0x24,
    IsolationNegated = 0x25,

    // Migration Events (0x40 - 0x5F)
    UpgradeProposed = 0x40,
    UpgradeAccepted = 0x41,
    StorageValidated = 0x42,

    // Rebalance Events (0x60 - 0x7F)
    FlashLoan = 0x60,
    VenueExchange = 0x61,
    DirectSwap = 0x62,
}

/// Main event enum containing all engine events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum MusdEvent {
    // ============ Basket Events ============

    /// mAsset minted against a deposited asset
    Minted {
        recipient: Address,
        input: AssetId,
        input_amount: u128,
        masset_amount: u128,
    },

    /// One asset swapped for another through the basket
    Swapped {
        recipient: Address,
        input: AssetId,
        output: AssetId,
        input_amount: u128,
        output_amount: u128,
        fee: u128,
    },

    /// mAsset redeemed into a single asset
    Redeemed {
        recipient: Address,
        output: AssetId,
        masset_amount: u128,
        output_amount: u128,
        fee: u128,
    },

    /// mAsset redeemed into several assets
    RedeemedMulti {
        recipient: Address,
        outputs: Vec<(AssetId, u128)>,
        masset_amount: u128,
        fee: u128,
    },

    /// Platform interest added to a vault
    InterestCollected {
        asset: AssetId,
        amount: u128,
        new_supply: u128,
    },

    // ============ Basket Admin Events ============

    AssetAdded {
        asset: AssetId,
        integrator: Address,
        index: u32,
    },

    AssetRemoved {
        asset: AssetId,
    },

    WeightLimitsUpdated {
        assets: Vec<AssetId>,
        max_weights: Vec<u128>,
    },

    Paused {
        by: Address,
    },

    Unpaused {
        by: Address,
    },

    IsolationNegated {
        asset: AssetId,
        undergoing_recol: bool,
    },

    // ============ Migration Events ============

    UpgradeProposed {
        implementation: ImplementationId,
        request_hash: [u8; 32],
        proposed_at: u64,
        ready_at: u64,
    },

    UpgradeAccepted {
        previous: ImplementationId,
        implementation: ImplementationId,
        accepted_at: u64,
    },

    StorageValidated {
        passed: bool,
        mismatches: u32,
        timestamp: u64,
    },

    // ============ Rebalance Events ============

    FlashLoan {
        loan_asset: AssetId,
        amount: u128,
        fee: u128,
        shortfall: u128,
    },

    VenueExchange {
        venue: u8,
        input: AssetId,
        output: AssetId,
        input_amount: u128,
        output_amount: u128,
    },

    DirectSwap {
        input: AssetId,
        output: AssetId,
        scaled_amount: u128,
        input_amount: u128,
    },
}

impl MusdEvent {
    /// Get the event type for filtering
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Minted { .. } => EventType::Minted,
            Self::Swapped { .. } => EventType::Swapped,
            Self::Redeemed { .. } => EventType::Redeemed,
            Self::RedeemedMulti { .. } => EventType::RedeemedMulti,
            Self::InterestCollected { .. } => EventType::InterestCollected,
            Self::AssetAdded { .. } => EventType::AssetAdded,
            Self::AssetRemoved { .. } => EventType::AssetRemoved,
            Self::WeightLimitsUpdated { .. } => EventType::WeightLimitsUpdated,
            Self::Paused { .. } => EventType::Paused,
            Self::Unpaused { .. } => EventType::Unpaused,
            Self::IsolationNegated { .. } => EventType::IsolationNegated,
            Self::UpgradeProposed { .. } => EventType::UpgradeProposed,
            Self::UpgradeAccepted { .. } => EventType::UpgradeAccepted,
            Self::StorageValidated { .. } => EventType::StorageValidated,
            Self::FlashLoan { .. } => EventType::FlashLoan,
            Self::VenueExchange { .. } => EventType::VenueExchange,
            Self::DirectSwap { .. } => EventType::DirectSwap,
        }
    }

    /// Serialize event to bytes for storage/transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).unwrap_or_default()
    }

    /// Deserialize event from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        borsh::from_slice(bytes).ok()
    }
}

/// Event log for collecting multiple events during execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct EventLog {
    events: Vec<MusdEvent>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Emit an event (add to log)
    pub fn emit(&mut self, event: MusdEvent) {
        self.events.push(event);
    }

    /// Get all events
    pub fn events(&self) -> &[MusdEvent] {
        &self.events
    }

    /// Move every event out of another log into this one
    pub fn append(&mut self, other: &mut EventLog) {
        self.events.append(&mut other.events);
    }

    /// Filter events by type
    pub fn filter_by_type(&self, event_type: EventType) -> Vec<&MusdEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Check if any events were emitted
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Get number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events were emitted
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Remove every event
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
