//! Credential Learn: timed, multi-step local enrollment of one credential.
//!
//! At most one session exists. The embedding application drives the capture
//! hardware and calls back into the machine:
//!
//! ```text
//! Idle --start--> Started --step_start--> StepInProgress <--step_retry--> StepRetry
//!   ^                                          |
//!   +---- read_done / cancel / timeout --------+
//! ```
//!
//! Every terminal transition resets to `Idle`. Requests arriving during a
//! session are rejected, never queued.

use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;
use embassy_time::Duration;
use log::{debug, info, warn};
use thiserror_no_std::Error as ThisError;

use crate::Error;
use crate::repository::Repository;
use crate::storage::{NvmStorage, StoreError};
use crate::types::{Credential, CredentialId, CredentialMetadata, Modifier};
use crate::validation::{CredentialRejection, Validator, validate_new_metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOperation {
    Add,
    Modify,
}

/// Who asked for the session. Only a remote initiator can be addressed by
/// a remote cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Local,
    Remote { node_id: u16 },
}

impl Initiator {
    /// Modifier recorded on a credential learned for this initiator.
    pub const fn modifier(self) -> Modifier {
        match self {
            Self::Local => Modifier::local(),
            Self::Remote { node_id } => Modifier::protocol(node_id),
        }
    }
}

/// Status values carried in learn status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LearnStatus {
    Started = 0x00,
    Success = 0x01,
    AlreadyInProgress = 0x02,
    EndedNotDueToTimeout = 0x03,
    Timeout = 0x04,
    StepRetry = 0x05,
    InvalidAddOperationType = 0xFE,
    InvalidModifyOperationType = 0xFF,
}

impl LearnStatus {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnPhase {
    Idle,
    Started,
    StepInProgress,
    StepRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnReport {
    pub status: LearnStatus,
    pub target: CredentialId,
    pub steps_remaining: u8,
}

/// Everything the learn machine tells the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnEvent {
    /// The application should begin capturing; `steps` captures are expected.
    CaptureRequested {
        target: CredentialId,
        steps: u8,
        timeout: Duration,
    },
    Status(LearnReport),
    /// The learned credential was persisted.
    Stored(CredentialMetadata),
    /// The captured payload was rejected or could not be stored.
    Failed {
        target: CredentialId,
        reason: LearnError,
    },
}

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnError {
    #[error("a learn session is already in progress")]
    AlreadyInProgress,
    #[error("add requested for an occupied credential slot")]
    InvalidAddOperation,
    #[error("modify requested for a credential that does not exist")]
    InvalidModifyOperation,
    #[error("target cannot be learned: {0}")]
    InvalidTarget(CredentialRejection),
    #[error("no learn session is in progress")]
    NotInProgress,
    #[error("only the initiator may cancel the session")]
    NotInitiator,
    #[error("captured credential rejected: {0}")]
    Rejected(CredentialRejection),
    #[error("storage error: {0}")]
    Store(StoreError),
}

impl LearnError {
    fn from_target_check(error: Error) -> Self {
        match error {
            Error::Credential(reason) => Self::InvalidTarget(reason),
            Error::Store(e) => Self::Store(e),
            _ => Self::Store(StoreError::Generic),
        }
    }

    fn from_capture_check(error: Error) -> Self {
        match error {
            Error::Credential(reason) => Self::Rejected(reason),
            Error::Store(e) => Self::Store(e),
            _ => Self::Store(StoreError::Generic),
        }
    }
}

/// Single-shot, rearmable per-step timeout. When it expires the owner calls
/// [`CredentialLearn::timeout`].
pub trait LearnTimer {
    fn start(&mut self, timeout: Duration);

    /// Rearms with the duration of the last `start`.
    fn restart(&mut self);

    fn stop(&mut self);
}

/// Receives learn events as they happen.
pub trait LearnObserver {
    fn notify(&mut self, event: LearnEvent);
}

impl LearnObserver for Vec<LearnEvent> {
    fn notify(&mut self, event: LearnEvent) {
        self.push(event);
    }
}

/// Hands events to a transport task through a channel. Events are dropped
/// when the channel is full.
impl<M: RawMutex, const N: usize> LearnObserver for Sender<'_, M, LearnEvent, N> {
    fn notify(&mut self, event: LearnEvent) {
        if self.try_send(event).is_err() {
            warn!(" Learn event channel full, dropping {:?}", event);
        }
    }
}

/// A timer driven by explicit calls to [`ManualTimer::advance`], for hosts
/// that keep their own clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualTimer {
    timeout: Duration,
    remaining: Option<Duration>,
}

impl ManualTimer {
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_ticks(0),
            remaining: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.remaining.is_some()
    }

    /// Lets `elapsed` pass. Returns `true` exactly once, when the armed
    /// timeout runs out.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        match self.remaining {
            Some(remaining) if elapsed >= remaining => {
                self.remaining = None;
                true
            }
            Some(remaining) => {
                self.remaining = Some(remaining - elapsed);
                false
            }
            None => false,
        }
    }
}

impl LearnTimer for ManualTimer {
    fn start(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.remaining = Some(timeout);
    }

    fn restart(&mut self) {
        self.remaining = Some(self.timeout);
    }

    fn stop(&mut self) {
        self.remaining = None;
    }
}

#[derive(Debug, Clone, Copy)]
struct LearnSession {
    operation: LearnOperation,
    target: CredentialId,
    initiator: Initiator,
    steps_remaining: u8,
    phase: LearnPhase,
}

/// The Credential Learn state machine.
pub struct CredentialLearn<T: LearnTimer, O: LearnObserver> {
    timer: T,
    observer: O,
    session: Option<LearnSession>,
}

impl<T: LearnTimer, O: LearnObserver> CredentialLearn<T, O> {
    pub fn new(timer: T, observer: O) -> Self {
        Self {
            timer,
            observer,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn phase(&self) -> LearnPhase {
        self.session.map_or(LearnPhase::Idle, |s| s.phase)
    }

    pub fn target(&self) -> Option<CredentialId> {
        self.session.map(|s| s.target)
    }

    pub fn operation(&self) -> Option<LearnOperation> {
        self.session.map(|s| s.operation)
    }

    pub fn steps_remaining(&self) -> Option<u8> {
        self.session.map(|s| s.steps_remaining)
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Opens a session for `target`. A `timeout_s` of 0 selects the type's
    /// recommended timeout.
    pub fn start<S: NvmStorage>(
        &mut self,
        repo: &mut Repository<S>,
        operation: LearnOperation,
        target: CredentialId,
        timeout_s: u8,
        initiator: Initiator,
    ) -> Result<(), LearnError> {
        if self.session.is_some() {
            debug!(" Learn start for {:?} rejected, session busy", target);
            self.report(LearnStatus::AlreadyInProgress, target, 0);
            return Err(LearnError::AlreadyInProgress);
        }

        let type_config = *repo.config().credential_type(target.kind);
        if !type_config.supported || !type_config.learn_supported {
            return Err(LearnError::InvalidTarget(
                CredentialRejection::UnsupportedType(target.kind),
            ));
        }
        validate_new_metadata(repo, &target).map_err(LearnError::from_target_check)?;

        let bound = repo
            .find_credential(target.kind, target.slot)
            .map_err(LearnError::Store)?;
        match (operation, bound) {
            (LearnOperation::Add, Some(_)) => {
                self.report(LearnStatus::InvalidAddOperationType, target, 0);
                return Err(LearnError::InvalidAddOperation);
            }
            (LearnOperation::Modify, None) => {
                self.report(LearnStatus::InvalidModifyOperationType, target, 0);
                return Err(LearnError::InvalidModifyOperation);
            }
            (LearnOperation::Modify, Some(id)) if id.uuid != target.uuid => {
                self.report(LearnStatus::InvalidModifyOperationType, target, 0);
                return Err(LearnError::InvalidModifyOperation);
            }
            _ => {}
        }

        let seconds = if timeout_s == 0 {
            type_config.learn_recommended_timeout_s
        } else {
            timeout_s
        };
        let timeout = Duration::from_secs(seconds as u64);
        let steps = type_config.learn_steps;

        self.session = Some(LearnSession {
            operation,
            target,
            initiator,
            steps_remaining: steps,
            phase: LearnPhase::Started,
        });
        self.timer.start(timeout);
        info!(
            " Learn {:?} started for {:?}/{} of user {} ({}s, {} steps)",
            operation, target.kind, target.slot, target.uuid, seconds, steps
        );
        self.observer.notify(LearnEvent::CaptureRequested {
            target,
            steps,
            timeout,
        });
        Ok(())
    }

    /// A capture step began; `remaining` steps are left including this one.
    pub fn step_start(&mut self, remaining: u8) -> Result<(), LearnError> {
        let session = self.session.as_mut().ok_or(LearnError::NotInProgress)?;
        session.steps_remaining = remaining;
        session.phase = LearnPhase::StepInProgress;
        let target = session.target;
        self.timer.restart();
        self.report(LearnStatus::Started, target, remaining);
        Ok(())
    }

    /// The current step must be repeated.
    pub fn step_retry(&mut self, remaining: u8) -> Result<(), LearnError> {
        let session = self.session.as_mut().ok_or(LearnError::NotInProgress)?;
        session.steps_remaining = remaining;
        session.phase = LearnPhase::StepRetry;
        let target = session.target;
        self.timer.restart();
        self.report(LearnStatus::StepRetry, target, remaining);
        Ok(())
    }

    /// Capture finished with `data`. Validates and persists the credential,
    /// then ends the session whatever the outcome.
    ///
    /// Without a session, or with an empty payload, the machine just resets
    /// and returns `Ok(None)`.
    pub fn read_done<S: NvmStorage>(
        &mut self,
        repo: &mut Repository<S>,
        validator: &Validator,
        data: &[u8],
    ) -> Result<Option<CredentialMetadata>, LearnError> {
        self.timer.stop();
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        if data.is_empty() {
            debug!(" Learn capture for {:?} returned no data", session.target);
            return Ok(None);
        }

        let target = session.target;
        match Self::persist(repo, validator, &session, data) {
            Ok(metadata) => {
                info!(
                    " Learned credential {:?}/{} for user {}",
                    target.kind, target.slot, target.uuid
                );
                self.observer.notify(LearnEvent::Stored(metadata));
                self.report(LearnStatus::Success, target, 0);
                Ok(Some(metadata))
            }
            Err(reason) => {
                warn!(" Learn for {:?} failed: {}", target, reason);
                self.observer.notify(LearnEvent::Failed { target, reason });
                Err(reason)
            }
        }
    }

    /// Cancelled on the device itself.
    pub fn cancel_local(&mut self) -> Result<(), LearnError> {
        let session = self.session.ok_or(LearnError::NotInProgress)?;
        self.end(session.target);
        Ok(())
    }

    /// Cancelled by a remote node; only the node that started the session
    /// may do this. The session is untouched otherwise.
    pub fn cancel_remote(&mut self, node_id: u16) -> Result<(), LearnError> {
        let session = self.session.ok_or(LearnError::NotInProgress)?;
        if session.initiator != (Initiator::Remote { node_id }) {
            return Err(LearnError::NotInitiator);
        }
        self.end(session.target);
        Ok(())
    }

    /// The step timer expired. Ignored when no session is open.
    pub fn timeout(&mut self) {
        if let Some(session) = self.session.take() {
            info!(" Learn for {:?} timed out", session.target);
            self.timer.stop();
            self.report(LearnStatus::Timeout, session.target, 0);
        }
    }

    fn end(&mut self, target: CredentialId) {
        self.timer.stop();
        self.session = None;
        info!(" Learn for {:?} cancelled", target);
        self.report(LearnStatus::EndedNotDueToTimeout, target, 0);
    }

    fn persist<S: NvmStorage>(
        repo: &mut Repository<S>,
        validator: &Validator,
        session: &LearnSession,
        data: &[u8],
    ) -> Result<CredentialMetadata, LearnError> {
        let credential = Credential::new(session.target, session.initiator.modifier(), data)
            .ok_or(LearnError::Rejected(CredentialRejection::InvalidLength(
                data.len(),
            )))?;
        validator
            .check_credential(repo, &credential)
            .map_err(LearnError::from_capture_check)?;

        match session.operation {
            LearnOperation::Add => repo.add_credential(&credential),
            LearnOperation::Modify => repo.modify_credential(&credential),
        }
        .map_err(LearnError::Store)?;
        Ok(credential.metadata)
    }

    fn report(&mut self, status: LearnStatus, target: CredentialId, steps_remaining: u8) {
        self.observer.notify(LearnEvent::Status(LearnReport {
            status,
            target,
            steps_remaining,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStorage;
    use crate::types::{CredentialType, ModifierType, User};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embassy_sync::channel::Channel;

    type Learn = CredentialLearn<ManualTimer, Vec<LearnEvent>>;

    fn setup() -> (Repository<MemoryStorage>, Learn) {
        let mut repo = Repository::open(MemoryStorage::new(), Config::default()).unwrap();
        repo.add_user(User::new(5)).unwrap();
        (repo, CredentialLearn::new(ManualTimer::new(), Vec::new()))
    }

    fn pin_target(slot: u16) -> CredentialId {
        CredentialId::new(5, CredentialType::PinCode, slot)
    }

    fn statuses(learn: &Learn) -> Vec<LearnStatus> {
        learn
            .observer()
            .iter()
            .filter_map(|event| match event {
                LearnEvent::Status(report) => Some(report.status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(LearnStatus::Started.to_u8(), 0x00);
        assert_eq!(LearnStatus::StepRetry.to_u8(), 0x05);
        assert_eq!(LearnStatus::InvalidAddOperationType.to_u8(), 0xFE);
        assert_eq!(LearnStatus::InvalidModifyOperationType.to_u8(), 0xFF);
    }

    #[test]
    fn test_start_uses_recommended_timeout() {
        let (mut repo, mut learn) = setup();
        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 0, Initiator::Local)
            .unwrap();
        assert_eq!(learn.phase(), LearnPhase::Started);
        assert_eq!(learn.operation(), Some(LearnOperation::Add));
        assert_eq!(learn.steps_remaining(), Some(1));
        assert_eq!(
            learn.observer()[0],
            LearnEvent::CaptureRequested {
                target: pin_target(2),
                steps: 1,
                timeout: Duration::from_secs(30),
            }
        );
        assert!(!learn.timer_mut().advance(Duration::from_secs(29)));
        assert!(learn.timer_mut().advance(Duration::from_secs(1)));
    }

    #[test]
    fn test_second_start_is_rejected_and_session_untouched() {
        let (mut repo, mut learn) = setup();
        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 7, Initiator::Local)
            .unwrap();
        learn.step_start(1).unwrap();

        assert_eq!(
            learn.start(
                &mut repo,
                LearnOperation::Add,
                pin_target(3),
                7,
                Initiator::Remote { node_id: 4 }
            ),
            Err(LearnError::AlreadyInProgress)
        );
        assert_eq!(learn.target(), Some(pin_target(2)));
        assert_eq!(learn.phase(), LearnPhase::StepInProgress);
        assert_eq!(
            statuses(&learn),
            [LearnStatus::Started, LearnStatus::AlreadyInProgress]
        );
    }

    #[test]
    fn test_start_checks_operation_against_store() {
        let (mut repo, mut learn) = setup();
        assert_eq!(
            learn.start(&mut repo, LearnOperation::Modify, pin_target(2), 0, Initiator::Local),
            Err(LearnError::InvalidModifyOperation)
        );

        let existing = Credential::new(pin_target(2), Modifier::local(), b"1234").unwrap();
        repo.add_credential(&existing).unwrap();
        assert_eq!(
            learn.start(&mut repo, LearnOperation::Add, pin_target(2), 0, Initiator::Local),
            Err(LearnError::InvalidAddOperation)
        );
        assert_eq!(
            statuses(&learn),
            [
                LearnStatus::InvalidModifyOperationType,
                LearnStatus::InvalidAddOperationType
            ]
        );
        assert!(!learn.is_active());
    }

    #[test]
    fn test_start_rejects_unlearnable_target() {
        let (mut repo, mut learn) = setup();
        let password = CredentialId::new(5, CredentialType::Password, 1);
        assert_eq!(
            learn.start(&mut repo, LearnOperation::Add, password, 0, Initiator::Local),
            Err(LearnError::InvalidTarget(
                CredentialRejection::UnsupportedType(CredentialType::Password)
            ))
        );
        assert_eq!(
            learn.start(
                &mut repo,
                LearnOperation::Add,
                CredentialId::new(6, CredentialType::PinCode, 1),
                0,
                Initiator::Local
            ),
            Err(LearnError::InvalidTarget(CredentialRejection::UnknownUser(6)))
        );
    }

    #[test]
    fn test_read_done_stores_credential_with_remote_modifier() {
        let (mut repo, mut learn) = setup();
        learn
            .start(
                &mut repo,
                LearnOperation::Add,
                pin_target(2),
                0,
                Initiator::Remote { node_id: 9 },
            )
            .unwrap();
        learn.step_start(1).unwrap();

        let metadata = learn
            .read_done(&mut repo, &Validator::default(), b"4321")
            .unwrap()
            .unwrap();
        assert_eq!(metadata.modifier.kind, ModifierType::Protocol);
        assert_eq!(metadata.modifier.node_id, 9);
        assert_eq!(
            repo.owned_credential(&pin_target(2)).unwrap().data.as_slice(),
            b"4321"
        );
        assert!(!learn.is_active());
        assert!(!learn.timer().is_armed());
        assert_eq!(statuses(&learn), [LearnStatus::Started, LearnStatus::Success]);
    }

    #[test]
    fn test_read_done_failure_ends_session() {
        let (mut repo, mut learn) = setup();
        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 0, Initiator::Local)
            .unwrap();
        assert_eq!(
            learn.read_done(&mut repo, &Validator::default(), b"12"),
            Err(LearnError::Rejected(CredentialRejection::InvalidLength(2)))
        );
        assert!(!learn.is_active());
        assert!(matches!(
            learn.observer().last(),
            Some(LearnEvent::Failed { .. })
        ));

        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 0, Initiator::Local)
            .unwrap();
    }

    #[test]
    fn test_read_done_without_data_resets_silently() {
        let (mut repo, mut learn) = setup();
        assert_eq!(
            learn.read_done(&mut repo, &Validator::default(), b"1234"),
            Ok(None)
        );
        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 0, Initiator::Local)
            .unwrap();
        let events = learn.observer().len();
        assert_eq!(learn.read_done(&mut repo, &Validator::default(), &[]), Ok(None));
        assert!(!learn.is_active());
        assert_eq!(learn.observer().len(), events);
    }

    #[test]
    fn test_step_retry_rearms_timer() {
        let (mut repo, mut learn) = setup();
        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 10, Initiator::Local)
            .unwrap();
        assert!(!learn.timer_mut().advance(Duration::from_secs(8)));
        learn.step_retry(1).unwrap();
        assert_eq!(learn.phase(), LearnPhase::StepRetry);
        assert_eq!(learn.steps_remaining(), Some(1));
        assert!(!learn.timer_mut().advance(Duration::from_secs(8)));
        assert!(learn.timer_mut().advance(Duration::from_secs(2)));
        assert_eq!(learn.step_retry(0), Ok(()));
        learn.cancel_local().unwrap();
        assert_eq!(learn.operation(), None);
        assert_eq!(learn.steps_remaining(), None);
        assert_eq!(learn.step_retry(0), Err(LearnError::NotInProgress));
    }

    #[test]
    fn test_remote_cancel_only_by_initiator() {
        let (mut repo, mut learn) = setup();
        learn
            .start(
                &mut repo,
                LearnOperation::Add,
                pin_target(2),
                0,
                Initiator::Remote { node_id: 3 },
            )
            .unwrap();
        assert_eq!(learn.cancel_remote(4), Err(LearnError::NotInitiator));
        assert!(learn.is_active());
        learn.cancel_remote(3).unwrap();
        assert!(!learn.is_active());
        assert_eq!(statuses(&learn), [LearnStatus::EndedNotDueToTimeout]);
    }

    #[test]
    fn test_timeout_resets_and_stale_timeout_is_ignored() {
        let (mut repo, mut learn) = setup();
        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 7, Initiator::Local)
            .unwrap();
        assert!(learn.timer_mut().advance(Duration::from_secs(8)));
        learn.timeout();
        learn.timeout();
        assert_eq!(statuses(&learn), [LearnStatus::Timeout]);

        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 7, Initiator::Local)
            .unwrap();
    }

    #[test]
    fn test_channel_observer() {
        let channel: Channel<NoopRawMutex, LearnEvent, 1> = Channel::new();
        let (mut repo, _) = setup();
        let mut learn = CredentialLearn::new(ManualTimer::new(), channel.sender());
        learn
            .start(&mut repo, LearnOperation::Add, pin_target(2), 0, Initiator::Local)
            .unwrap();
        // Channel is full, the cancel report is dropped.
        learn.cancel_local().unwrap();

        assert!(matches!(
            channel.try_receive(),
            Ok(LearnEvent::CaptureRequested { .. })
        ));
        assert!(channel.try_receive().is_err());
    }
}
