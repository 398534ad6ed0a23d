//! Migration State Machine
//!
//! Brackets the V2 to V3 upgrade of the basket:
//!
//! ```text
//! Deployed ──propose──► ProposalPending ──accept──► InRecol
//!                                                     │
//!                        ┌──────clear_isolation───────┤
//!                        ▼                            ▼ unpause
//!                 IsolationCleared                 Unpaused
//!                        │ unpause                    │ clear_isolation
//!                        └──────────► Active ◄────────┘
//! ```
//!
//! Pausing and clearing isolation are independent; the basket resumes normal
//! operation only once both the pause and the recollateralisation flag are
//! lifted.
//!
//! The storage validator runs after every transition. A failed validation
//! halts the machine without reverting the transition that was committed;
//! the admin resumes it with [`MigrationController::resolve_halt`].

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use musd_common::{
    check,
    constants::time::UPGRADE_DELAY,
    errors::{MusdError, MusdResult},
    events::{EventLog, MusdEvent},
    interfaces::{BasketEngine, Revertible, StorageView, UpgradeTarget},
    types::{Address, AssetId, ImplementationId},
    validation::require_admin,
};

use crate::clock::Clock;
use crate::proxy_admin::{AcceptedUpgrade, DelayedProxyAdmin};
use crate::storage_validator::{decode_upgrade, StorageExpectations, ValidationReport};

/// Upgrade phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub enum MigrationPhase {
    /// No upgrade proposed
    #[default]
    Deployed,
    /// Proposal waiting out the delay
    ProposalPending,
    /// Upgrade accepted; basket recollateralising
    InRecol,
    /// Unpaused, isolation still in place
    Unpaused,
    /// Isolation lifted, basket still paused
    IsolationCleared,
    /// Normal operation
    Active,
}

impl MigrationPhase {
    /// Flags the basket must show in this phase, as (paused, undergoing_recol)
    fn expected_flags(&self) -> (Option<bool>, Option<bool>) {
        match self {
            Self::Deployed | Self::ProposalPending => (None, Some(false)),
            Self::InRecol => (None, Some(true)),
            Self::Unpaused => (Some(false), Some(true)),
            Self::IsolationCleared => (Some(true), Some(false)),
            Self::Active => (Some(false), Some(false)),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MigrationConfig {
    /// Delay between proposal and acceptance (seconds)
    pub upgrade_delay: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { upgrade_delay: UPGRADE_DELAY }
    }
}

/// Outcome of an accepted upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MigrationResult {
    pub request_hash: [u8; 32],
    pub previous: ImplementationId,
    pub implementation: ImplementationId,
    pub accepted_at: u64,
    pub phase: MigrationPhase,
    pub report: ValidationReport,
    pub events: EventLog,
}

/// Timelocked upgrade state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct MigrationController {
    pub config: MigrationConfig,
    proxy_admin: DelayedProxyAdmin,
    phase: MigrationPhase,
    expectations: StorageExpectations,
    /// Report of the validation that halted the machine
    halted: Option<ValidationReport>,
    events: EventLog,
}

impl MigrationController {
    pub fn new(admin: Address, config: MigrationConfig, expectations: StorageExpectations) -> Self {
        Self {
            config,
            proxy_admin: DelayedProxyAdmin::new(admin, config.upgrade_delay),
            phase: MigrationPhase::Deployed,
            expectations,
            halted: None,
            events: EventLog::new(),
        }
    }

    // ============ Views ============

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    pub fn admin(&self) -> Address {
        self.proxy_admin.admin
    }

    pub fn proxy_admin(&self) -> &DelayedProxyAdmin {
        &self.proxy_admin
    }

    pub fn expectations(&self) -> &StorageExpectations {
        &self.expectations
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_report(&self) -> Option<&ValidationReport> {
        self.halted.as_ref()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    fn require_running(&self) -> MusdResult<()> {
        match self.halted.as_ref().and_then(ValidationReport::to_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn require_phase(&self, allowed: &[MigrationPhase]) -> MusdResult<()> {
        check!(allowed.contains(&self.phase), MusdError::InvalidStateTransition);
        Ok(())
    }

    // ============ Validation ============

    /// Expectations for the current phase, including the upgrade fields once
    /// the upgrade has run
    fn phase_expectations(&self, expectations: &StorageExpectations) -> MusdResult<StorageExpectations> {
        let (paused, recol) = self.phase.expected_flags();
        let expected = expectations.clone().with_flags(paused, recol);
        match self.proxy_admin.request() {
            Some(request) if request.executed => expected.with_upgrade_payload(&request.payload),
            _ => Ok(expected),
        }
    }

    /// Validate against the current phase; a failure halts the machine
    fn validate<B: StorageView + ?Sized>(&mut self, basket: &B, now: u64) -> MusdResult<ValidationReport> {
        let report = self.phase_expectations(&self.expectations)?.validate(&basket.storage());
        self.events.emit(MusdEvent::StorageValidated {
            passed: report.passed(),
            mismatches: report.mismatches.len() as u32,
            timestamp: now,
        });

        if let Some(e) = report.to_error() {
            log::warn!("storage validation failed in {:?}: {} mismatch(es), halting", self.phase, report.mismatches.len());
            self.halted = Some(report);
            return Err(e);
        }
        Ok(report)
    }

    /// Replace the expected snapshot after an intentional basket change
    pub fn set_expectations(&mut self, caller: Address, expectations: StorageExpectations) -> MusdResult<()> {
        require_admin(self.proxy_admin.admin, caller)?;
        check!(self.halted.is_none(), MusdError::InvalidStateTransition);
        self.expectations = expectations;
        Ok(())
    }

    /// Resume after a halt. The new expectations must match the live storage.
    pub fn resolve_halt<B, C>(
        &mut self,
        caller: Address,
        basket: &B,
        clock: &C,
        expectations: StorageExpectations,
    ) -> MusdResult<ValidationReport>
    where
        B: StorageView + ?Sized,
        C: Clock + ?Sized,
    {
        require_admin(self.proxy_admin.admin, caller)?;
        check!(self.halted.is_some(), MusdError::InvalidStateTransition);

        let report = self.phase_expectations(&expectations)?.validate(&basket.storage());
        self.events.emit(MusdEvent::StorageValidated {
            passed: report.passed(),
            mismatches: report.mismatches.len() as u32,
            timestamp: clock.now(),
        });
        if let Some(e) = report.to_error() {
            self.halted = Some(report);
            return Err(e);
        }
        self.expectations = expectations;
        self.halted = None;
        log::info!("halt resolved in {:?}", self.phase);
        Ok(report)
    }

    // ============ Transitions ============

    /// Propose the upgrade. The payload must decode as an initialisation.
    /// Returns the request hash.
    pub fn propose<B, C>(
        &mut self,
        caller: Address,
        basket: &B,
        clock: &C,
        implementation: ImplementationId,
        payload: Vec<u8>,
    ) -> MusdResult<[u8; 32]>
    where
        B: StorageView + ?Sized,
        C: Clock + ?Sized,
    {
        self.require_running()?;
        require_admin(self.proxy_admin.admin, caller)?;
        check!(self.proxy_admin.request().is_none(), MusdError::InvalidStateTransition);
        decode_upgrade(&payload)?;

        let now = clock.now();
        let request = self.proxy_admin.propose(caller, implementation, payload, now)?;
        let request_hash = request.request_hash();
        let ready_at = request.ready_at()?;

        self.phase = MigrationPhase::ProposalPending;
        self.events.emit(MusdEvent::UpgradeProposed { implementation, request_hash, proposed_at: now, ready_at });
        self.validate(basket, now)?;
        Ok(request_hash)
    }

    /// Pause the basket while it is prepared for the upgrade
    pub fn pause_for_upgrade<B, C>(&mut self, caller: Address, basket: &mut B, clock: &C) -> MusdResult<ValidationReport>
    where
        B: BasketEngine + StorageView + ?Sized,
        C: Clock + ?Sized,
    {
        self.require_running()?;
        self.require_phase(&[MigrationPhase::ProposalPending])?;
        basket.pause(caller)?;
        log::info!("basket paused for upgrade");
        self.validate(basket, clock.now())
    }

    /// Accept the proposal once the delay has passed and run the one-time
    /// initialisation. The basket is left untouched if initialisation fails.
    pub fn accept<B, C>(&mut self, caller: Address, basket: &mut B, clock: &C) -> MusdResult<MigrationResult>
    where
        B: UpgradeTarget + StorageView + Revertible + ?Sized,
        C: Clock + ?Sized,
    {
        check!(!self.proxy_admin.is_executed(), MusdError::AlreadyMigrated);
        self.require_running()?;
        self.require_phase(&[MigrationPhase::ProposalPending])?;

        let now = clock.now();
        let accepted: AcceptedUpgrade = self.proxy_admin.accept(caller, basket, now)?;

        self.phase = MigrationPhase::InRecol;
        let accepted_event = MusdEvent::UpgradeAccepted {
            previous: accepted.previous,
            implementation: accepted.implementation,
            accepted_at: now,
        };
        let mut events = EventLog::new();
        events.emit(accepted_event.clone());
        self.events.emit(accepted_event);

        let report = self.validate(basket, now)?;
        events.emit(MusdEvent::StorageValidated { passed: true, mismatches: 0, timestamp: now });

        Ok(MigrationResult {
            request_hash: accepted.request_hash,
            previous: accepted.previous,
            implementation: accepted.implementation,
            accepted_at: now,
            phase: self.phase,
            report,
            events,
        })
    }

    /// Lift the isolation of `asset`. Recollateralisation ends once no asset
    /// remains isolated.
    pub fn clear_isolation<B, C>(&mut self, caller: Address, basket: &mut B, clock: &C, asset: &AssetId) -> MusdResult<ValidationReport>
    where
        B: BasketEngine + StorageView + ?Sized,
        C: Clock + ?Sized,
    {
        self.require_running()?;
        self.require_phase(&[MigrationPhase::InRecol, MigrationPhase::Unpaused])?;
        basket.negate_isolation(caller, asset)?;

        if !basket.flags().undergoing_recol {
            self.phase = if basket.is_paused() { MigrationPhase::IsolationCleared } else { MigrationPhase::Active };
            log::info!("isolation cleared, now {:?}", self.phase);
        }
        self.validate(basket, clock.now())
    }

    /// Unpause the basket after the upgrade
    pub fn unpause<B, C>(&mut self, caller: Address, basket: &mut B, clock: &C) -> MusdResult<ValidationReport>
    where
        B: BasketEngine + StorageView + ?Sized,
        C: Clock + ?Sized,
    {
        self.require_running()?;
        self.require_phase(&[MigrationPhase::InRecol, MigrationPhase::IsolationCleared])?;
        basket.unpause(caller)?;

        self.phase = if basket.flags().undergoing_recol { MigrationPhase::Unpaused } else { MigrationPhase::Active };
        log::info!("basket unpaused, now {:?}", self.phase);
        self.validate(basket, clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage_validator::StorageField;
    use musd_basket::Masset;
    use musd_common::access_control::{self, Role};
    use musd_common::constants::time::ONE_DAY;
    use musd_common::events::EventType;
    use musd_common::types::{Asset, InvariantConfig, UpgradeInit};

    const GOVERNOR: Address = [1u8; 32];
    const OPERATOR: Address = [2u8; 32];
    const NEXUS: Address = [3u8; 32];
    const IMPL_V2: ImplementationId = [4u8; 32];
    const IMPL_V3: ImplementationId = [5u8; 32];
    const VALIDATOR: Address = [6u8; 32];
    const STRANGER: Address = [7u8; 32];
    const INTEGRATOR: Address = [9u8; 32];

    const USDC: AssetId = [11u8; 32];
    const DAI: AssetId = [13u8; 32];

    const T0: u64 = 1_615_000_000;

    fn create_test_basket() -> Masset {
        let assets = vec![
            Asset::new(USDC, INTEGRATOR, 6, false).unwrap().with_vault_balance(1_000_000_000_000),
            Asset::new(DAI, INTEGRATOR, 18, false).unwrap().with_vault_balance(1_000_000_000_000_000_000_000_000),
        ];
        let mut masset = Masset::new(GOVERNOR, NEXUS, IMPL_V2).with_assets(assets).unwrap();
        access_control::grant_role(&mut masset.access, GOVERNOR, OPERATOR, Role::Operator).unwrap();
        masset
    }

    fn payload() -> Vec<u8> {
        UpgradeInit { forge_validator: VALIDATOR, config: InvariantConfig::default() }.encode().unwrap()
    }

    fn create_test_controller(masset: &Masset) -> MigrationController {
        MigrationController::new(GOVERNOR, MigrationConfig::default(), StorageExpectations::snapshot(&masset.storage()))
    }

    /// Proposed, paused and past the delay
    fn ready_to_accept() -> (MigrationController, Masset, ManualClock) {
        let mut masset = create_test_basket();
        let mut clock = ManualClock::new(T0);
        let mut controller = create_test_controller(&masset);
        controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, payload()).unwrap();
        controller.pause_for_upgrade(OPERATOR, &mut masset, &clock).unwrap();
        clock.advance(UPGRADE_DELAY);
        (controller, masset, clock)
    }

    #[test]
    fn test_propose() {
        let masset = create_test_basket();
        let clock = ManualClock::new(T0);
        let mut controller = create_test_controller(&masset);

        let hash = controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, payload()).unwrap();
        assert_eq!(controller.phase(), MigrationPhase::ProposalPending);
        assert_eq!(controller.proxy_admin().request().unwrap().request_hash(), hash);
        assert_eq!(controller.events().filter_by_type(EventType::UpgradeProposed).len(), 1);

        assert_eq!(
            controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, payload()),
            Err(MusdError::InvalidStateTransition)
        );
    }

    #[test]
    fn test_propose_rejects_undecodable_payload() {
        let masset = create_test_basket();
        let clock = ManualClock::new(T0);
        let mut controller = create_test_controller(&masset);

        assert_eq!(
            controller.propose(STRANGER, &masset, &clock, IMPL_V3, vec![1, 2, 3]),
            Err(MusdError::AdminOnly)
        );
        assert_eq!(
            controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, vec![1, 2, 3]),
            Err(MusdError::InvalidPayload)
        );
        assert!(controller.proxy_admin().request().is_none());
        assert_eq!(controller.phase(), MigrationPhase::Deployed);

        // A valid payload can still be proposed afterwards
        controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, payload()).unwrap();
        assert_eq!(controller.phase(), MigrationPhase::ProposalPending);
    }

    #[test]
    fn test_accept_checks_caller_and_delay_first() {
        let mut masset = create_test_basket();
        let mut clock = ManualClock::new(T0);
        let mut controller = create_test_controller(&masset);
        controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, payload()).unwrap();

        clock.advance(60);
        assert_eq!(
            controller.accept(GOVERNOR, &mut masset, &clock),
            Err(MusdError::TimelockNotElapsed { ready_at: T0 + UPGRADE_DELAY, now: T0 + 60 })
        );
        assert_eq!(controller.accept(STRANGER, &mut masset, &clock), Err(MusdError::AdminOnly));
        assert!(!masset.is_migrated());
    }

    #[test]
    fn test_accept_blocked_by_timelock() {
        let mut masset = create_test_basket();
        let mut clock = ManualClock::new(T0);
        let mut controller = create_test_controller(&masset);
        controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, payload()).unwrap();

        clock.advance(6 * ONE_DAY);
        assert_eq!(
            controller.accept(GOVERNOR, &mut masset, &clock),
            Err(MusdError::TimelockNotElapsed { ready_at: T0 + UPGRADE_DELAY, now: T0 + 6 * ONE_DAY })
        );
        assert_eq!(controller.phase(), MigrationPhase::ProposalPending);
        assert!(!masset.is_migrated());
    }

    #[test]
    fn test_accept_then_reaccept() {
        let (mut controller, mut masset, clock) = ready_to_accept();

        let result = controller.accept(GOVERNOR, &mut masset, &clock).unwrap();
        assert_eq!(result.previous, IMPL_V2);
        assert_eq!(result.implementation, IMPL_V3);
        assert_eq!(result.phase, MigrationPhase::InRecol);
        assert!(result.report.passed());
        assert_eq!(masset.implementation, IMPL_V3);
        assert!(masset.flags.undergoing_recol);

        assert_eq!(controller.accept(GOVERNOR, &mut masset, &clock), Err(MusdError::AlreadyMigrated));
    }

    #[test]
    fn test_accept_requires_admin() {
        let (mut controller, mut masset, clock) = ready_to_accept();
        assert_eq!(controller.accept(STRANGER, &mut masset, &clock), Err(MusdError::AdminOnly));
        assert_eq!(controller.phase(), MigrationPhase::ProposalPending);
    }

    #[test]
    fn test_unpause_then_clear_isolation() {
        let (mut controller, mut masset, clock) = ready_to_accept();
        controller.accept(GOVERNOR, &mut masset, &clock).unwrap();

        controller.unpause(OPERATOR, &mut masset, &clock).unwrap();
        assert_eq!(controller.phase(), MigrationPhase::Unpaused);

        controller.clear_isolation(OPERATOR, &mut masset, &clock, &USDC).unwrap();
        assert_eq!(controller.phase(), MigrationPhase::Active);
        assert!(!masset.flags.undergoing_recol && !masset.paused);
    }

    #[test]
    fn test_clear_isolation_then_unpause() {
        let (mut controller, mut masset, clock) = ready_to_accept();
        controller.accept(GOVERNOR, &mut masset, &clock).unwrap();

        controller.clear_isolation(OPERATOR, &mut masset, &clock, &DAI).unwrap();
        assert_eq!(controller.phase(), MigrationPhase::IsolationCleared);

        controller.unpause(OPERATOR, &mut masset, &clock).unwrap();
        assert_eq!(controller.phase(), MigrationPhase::Active);

        assert_eq!(controller.unpause(OPERATOR, &mut masset, &clock), Err(MusdError::InvalidStateTransition));
    }

    #[test]
    fn test_transitions_out_of_order() {
        let mut masset = create_test_basket();
        let clock = ManualClock::new(T0);
        let mut controller = create_test_controller(&masset);

        assert_eq!(controller.pause_for_upgrade(OPERATOR, &mut masset, &clock), Err(MusdError::InvalidStateTransition));
        assert_eq!(controller.unpause(OPERATOR, &mut masset, &clock), Err(MusdError::InvalidStateTransition));
        assert_eq!(
            controller.clear_isolation(OPERATOR, &mut masset, &clock, &USDC),
            Err(MusdError::InvalidStateTransition)
        );
        assert_eq!(controller.accept(GOVERNOR, &mut masset, &clock), Err(MusdError::InvalidStateTransition));
    }

    #[test]
    fn test_failed_initialisation_reverts_acceptance() {
        let mut masset = create_test_basket();
        let mut clock = ManualClock::new(T0);
        let mut controller = create_test_controller(&masset);

        // Inverted weight limits fail the one-time initialisation
        let bad = UpgradeInit {
            forge_validator: VALIDATOR,
            config: InvariantConfig { a: 13_500, min_weight: 700_000_000_000_000_000, max_weight: 50_000_000_000_000_000 },
        };
        controller.propose(GOVERNOR, &masset, &clock, IMPL_V3, bad.encode().unwrap()).unwrap();
        clock.advance(UPGRADE_DELAY);
        let before = masset.clone();

        assert!(matches!(controller.accept(GOVERNOR, &mut masset, &clock), Err(MusdError::InvalidInput { .. })));
        assert_eq!(masset, before);
        assert_eq!(controller.phase(), MigrationPhase::ProposalPending);
        assert!(!controller.proxy_admin().is_executed());
    }

    #[test]
    fn test_validation_failure_halts_without_revert() {
        let (mut controller, mut masset, clock) = ready_to_accept();
        // Supply drifted 1% since the snapshot
        masset.total_supply += masset.total_supply / 100;

        let result = controller.accept(GOVERNOR, &mut masset, &clock);
        assert_eq!(result, Err(MusdError::StorageMismatch { field: "total_supply", mismatches: 1 }));

        // The upgrade itself stays committed
        assert_eq!(controller.phase(), MigrationPhase::InRecol);
        assert!(masset.is_migrated());
        assert!(controller.is_halted());
        assert_eq!(controller.halt_report().unwrap().mismatches[0].field, StorageField::TotalSupply);

        // Every transition is blocked until the halt is resolved
        assert!(matches!(controller.unpause(OPERATOR, &mut masset, &clock), Err(MusdError::StorageMismatch { .. })));
        assert!(masset.paused);
        assert_eq!(
            controller.set_expectations(GOVERNOR, StorageExpectations::snapshot(&masset.storage())),
            Err(MusdError::InvalidStateTransition)
        );

        // Stale expectations do not resolve it
        let stale = controller.expectations().clone();
        assert!(controller.resolve_halt(GOVERNOR, &masset, &clock, stale).is_err());
        assert!(controller.is_halted());

        let fresh = StorageExpectations::snapshot(&masset.storage());
        assert_eq!(controller.resolve_halt(STRANGER, &masset, &clock, fresh.clone()), Err(MusdError::AdminOnly));
        assert!(controller.resolve_halt(GOVERNOR, &masset, &clock, fresh).unwrap().passed());

        // Propose and pause, then accept and both resolve attempts
        let validations = controller.events().filter_by_type(EventType::StorageValidated);
        assert_eq!(validations.len(), 5);
        assert_eq!(
            validations.last().copied(),
            Some(&MusdEvent::StorageValidated { passed: true, mismatches: 0, timestamp: T0 + UPGRADE_DELAY })
        );

        controller.unpause(OPERATOR, &mut masset, &clock).unwrap();
        assert_eq!(controller.phase(), MigrationPhase::Unpaused);
    }

    #[test]
    fn test_result_cbor() {
        let (mut controller, mut masset, clock) = ready_to_accept();
        let result = controller.accept(GOVERNOR, &mut masset, &clock).unwrap();

        let mut bytes = Vec::new();
        ciborium::into_writer(&result, &mut bytes).unwrap();
        let decoded: MigrationResult = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.events.filter_by_type(EventType::UpgradeAccepted).len(), 1);
    }
}
