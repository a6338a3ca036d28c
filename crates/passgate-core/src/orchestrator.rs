//! Authentication state machine
//!
//! [`Authenticator`] ties the collaborators together:
//!
//! ```text
//! Idle -> Probing -> KeyPreparing -> Scanning -> {Authenticated | Failed | Canceled} -> Idle
//! ```
//!
//! `start()` runs the first three states synchronously and returns as soon
//! as the sensor is listening. Everything after that is driven by the host
//! pushing sensor events into [`Authenticator::handle_event`]. Results go
//! out on the event channel returned by [`Authenticator::new`].
//!
//! The engine holds no thread and never blocks. It also never cancels a scan
//! on its own behalf when dropped: the host must call `stop()` on every path
//! that leaves the protected screen.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityProbe, PreflightNotice};
use crate::cipher::CipherSession;
use crate::classifier::{ErrorKind, ErrorRecord};
use crate::config::EngineConfig;
use crate::error::CipherError;
use crate::key_manager::KeyManager;
use crate::keystore::{KeyAlias, SecureKeyStore};
use crate::scan::{HardwareEvent, ScanChannel, ScanId, ScanSession};

/// Message delivered when a scan runs out of attempts
pub const ATTEMPTS_EXHAUSTED_MESSAGE: &str = "Too many unrecognized attempts.";

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Probing,
    KeyPreparing,
    Scanning,
    Authenticated,
    Failed,
    Canceled,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Proof of one successful scan
///
/// Wraps the cipher session the scan was bound to and the sensor's payload,
/// which the engine passes through untouched.
pub struct SessionToken {
    scan: ScanId,
    payload: Vec<u8>,
    cipher: CipherSession,
}

impl SessionToken {
    pub fn scan(&self) -> ScanId {
        self.scan
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn key_alias(&self) -> &KeyAlias {
        self.cipher.alias()
    }

    pub fn cipher(&self) -> &CipherSession {
        &self.cipher
    }

    /// Encrypt with the authenticated key
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.cipher.seal(plaintext)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("scan", &self.scan)
            .field("payload_len", &self.payload.len())
            .field("key", self.cipher.alias())
            .finish()
    }
}

/// Terminal result of one attempt
#[derive(Debug)]
pub enum AuthResult {
    Success(SessionToken),
    Failure(ErrorRecord),
}

/// Events delivered to the host
#[derive(Debug)]
pub enum AuthEvent {
    /// No scan could be opened; use another factor
    Preflight(PreflightNotice),
    /// Advisory failure; the scan stays open
    Progress { scan: ScanId, record: ErrorRecord },
    /// The attempt is over. `scan` is `None` when it failed before a scan
    /// was opened.
    Completed {
        scan: Option<ScanId>,
        result: AuthResult,
    },
}

impl AuthEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthEvent::Progress { .. })
    }
}

/// What `start()` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The sensor is listening
    Scanning(ScanId),
    /// Capability check failed; nothing was opened
    Preflight(PreflightNotice),
    /// Key or cipher preparation failed, or the sensor refused to open
    Failed(ErrorRecord),
}

/// What happened to a pushed sensor event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Delivered,
    /// The event belongs to a scan that is no longer active
    Discarded,
}

struct ActiveScan {
    session: ScanSession,
    cipher: CipherSession,
    unrecognized: u32,
}

enum Step {
    Progress(ErrorRecord),
    Fail { record: ErrorRecord, cancel: bool },
    Succeed(Vec<u8>),
}

/// Biometric authentication engine
pub struct Authenticator<P, S, C> {
    probe: P,
    keys: KeyManager<S>,
    sensor: C,
    config: EngineConfig,
    state: AuthState,
    active: Option<ActiveScan>,
    next_scan: u64,
    events: mpsc::UnboundedSender<AuthEvent>,
}

impl<P, S, C> Authenticator<P, S, C>
where
    P: CapabilityProbe,
    S: SecureKeyStore,
    C: ScanChannel,
{
    /// Create an engine and the receiver its events are delivered on
    pub fn new(
        probe: P,
        store: S,
        sensor: C,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<AuthEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let keys = KeyManager::new(store, config.key_policy(), config.key_alias_prefix.clone());

        let engine = Self {
            probe,
            keys,
            sensor,
            config,
            state: AuthState::Idle,
            active: None,
            next_scan: 1,
            events,
        };
        (engine, receiver)
    }

    /// Start a scan, superseding any scan already in flight
    pub fn start(&mut self) -> StartOutcome {
        if self.is_scanning() {
            debug!("Scan already running, canceling it first");
            self.stop();
        }

        self.transition(AuthState::Probing);
        if let Some(notice) = self.probe.check().preflight() {
            info!(?notice, "Biometric authentication unavailable");
            self.emit(AuthEvent::Preflight(notice));
            self.transition(AuthState::Idle);
            return StartOutcome::Preflight(notice);
        }

        self.transition(AuthState::KeyPreparing);
        let cipher = match self.prepare_cipher() {
            Ok(cipher) => cipher,
            Err(record) => return self.fail_before_scan(record),
        };

        let id = ScanId::new(self.next_scan);
        self.next_scan += 1;

        let token = match self.sensor.open(id, &cipher) {
            Ok(token) => token,
            Err(e) => {
                warn!(scan = %id, error = %e, "Sensor refused to open");
                return self.fail_before_scan(ErrorRecord::from(&e));
            }
        };

        info!(scan = %id, key = %cipher.alias(), "Scan opened");
        self.active = Some(ActiveScan {
            session: ScanSession::new(id, token),
            cipher,
            unrecognized: 0,
        });
        self.transition(AuthState::Scanning);
        StartOutcome::Scanning(id)
    }

    /// Cancel the active scan
    ///
    /// Returns false, and does nothing, when no scan is active.
    pub fn stop(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };

        active.session.cancel();
        info!(scan = %active.session.id(), "Scan canceled");
        self.transition(AuthState::Canceled);
        self.transition(AuthState::Idle);
        true
    }

    /// Feed one sensor event into the engine
    pub fn handle_event(&mut self, scan: ScanId, event: HardwareEvent) -> EventDisposition {
        let max_unrecognized = self.config.max_unrecognized_attempts;

        let active = match self.active.as_mut() {
            Some(active) if active.session.id() == scan && active.session.is_active() => active,
            _ => {
                debug!(scan = %scan, ?event, "Discarding event for inactive scan");
                return EventDisposition::Discarded;
            }
        };

        debug!(scan = %scan, tier = ?event.tier_code(), "Sensor event");
        let exhausted = matches!(event, HardwareEvent::Mismatch { exhausted: true });

        let step = match event.into_result() {
            Ok(payload) => Step::Succeed(payload),
            Err(record) if record.kind == ErrorKind::CannotRecognize => {
                active.unrecognized += 1;
                let limit_hit = max_unrecognized.is_some_and(|max| active.unrecognized >= max);
                if exhausted || limit_hit {
                    Step::Fail {
                        record: ErrorRecord::non_recoverable(
                            ErrorKind::NonRecoverableScanError,
                            ATTEMPTS_EXHAUSTED_MESSAGE,
                        ),
                        // The platform stops on its own when it signals exhaustion
                        cancel: !exhausted,
                    }
                } else {
                    Step::Progress(record)
                }
            }
            Err(record) if record.kind.keeps_session_open() => Step::Progress(record),
            Err(record) => Step::Fail {
                record,
                cancel: false,
            },
        };

        match step {
            Step::Progress(record) => {
                self.emit(AuthEvent::Progress { scan, record });
            }
            Step::Fail { record, cancel } => {
                self.finish_scan(cancel);
                warn!(scan = %scan, message = %record.message, "Scan failed");
                self.emit(AuthEvent::Completed {
                    scan: Some(scan),
                    result: AuthResult::Failure(record),
                });
                self.transition(AuthState::Failed);
                self.transition(AuthState::Idle);
            }
            Step::Succeed(payload) => {
                if let Some(finished) = self.finish_scan(false) {
                    info!(scan = %scan, "Scan authenticated");
                    let token = SessionToken {
                        scan,
                        payload,
                        cipher: finished.cipher,
                    };
                    self.emit(AuthEvent::Completed {
                        scan: Some(scan),
                        result: AuthResult::Success(token),
                    });
                }
                self.transition(AuthState::Authenticated);
                self.transition(AuthState::Idle);
            }
        }

        EventDisposition::Delivered
    }

    /// Whether the sensor is listening for this engine
    pub fn is_scanning(&self) -> bool {
        self.state == AuthState::Scanning && self.active.is_some()
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Id of the scan currently listening, if any
    pub fn active_scan(&self) -> Option<ScanId> {
        self.active.as_ref().map(|a| a.session.id())
    }

    pub fn keys(&self) -> &KeyManager<S> {
        &self.keys
    }

    pub fn sensor(&self) -> &C {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut C {
        &mut self.sensor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Ensure the key and bind a fresh cipher session to it
    fn prepare_cipher(&mut self) -> Result<CipherSession, ErrorRecord> {
        let handle = self.keys.ensure_key().map_err(|e| {
            warn!(error = %e, "Key preparation failed");
            ErrorRecord::from(&e)
        })?;

        match CipherSession::init(self.keys.store(), &handle, self.keys.policy()) {
            Ok(cipher) => Ok(cipher),
            Err(e) => {
                warn!(error = %e, "Cipher initialization failed");
                // A key that is gone or invalid can never be used again
                if matches!(e, CipherError::KeyInvalidated(_) | CipherError::KeyMissing(_)) {
                    self.keys.invalidate();
                }
                Err(ErrorRecord::from(&e))
            }
        }
    }

    fn fail_before_scan(&mut self, record: ErrorRecord) -> StartOutcome {
        self.emit(AuthEvent::Completed {
            scan: None,
            result: AuthResult::Failure(record.clone()),
        });
        self.transition(AuthState::Failed);
        self.transition(AuthState::Idle);
        StartOutcome::Failed(record)
    }

    fn finish_scan(&mut self, cancel: bool) -> Option<ActiveScan> {
        let mut active = self.active.take()?;
        if cancel {
            active.session.cancel();
        } else {
            active.session.finish();
        }
        Some(active)
    }

    fn emit(&self, event: AuthEvent) {
        if let Err(e) = self.events.send(event) {
            warn!(event = ?e.0, "Event receiver dropped");
        }
    }

    fn transition(&mut self, next: AuthState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Capabilities, StaticProbe};
    use crate::error::SensorError;
    use crate::keystore::{Enrollment, SoftwareKeyStore};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct CountingSensor {
        opened: u32,
        refuse: bool,
    }

    impl ScanChannel for CountingSensor {
        fn open(
            &mut self,
            _scan: ScanId,
            _cipher: &CipherSession,
        ) -> Result<CancellationToken, SensorError> {
            if self.refuse {
                return Err(SensorError::Busy);
            }
            self.opened += 1;
            Ok(CancellationToken::new())
        }
    }

    fn engine(
        sensor: CountingSensor,
    ) -> (
        Authenticator<StaticProbe, SoftwareKeyStore, CountingSensor>,
        mpsc::UnboundedReceiver<AuthEvent>,
    ) {
        let store = SoftwareKeyStore::new(Enrollment::with_credentials(["right-thumb"]));
        Authenticator::new(
            StaticProbe(Capabilities::available()),
            store,
            sensor,
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_start_reaches_scanning() {
        let (mut auth, mut rx) = engine(CountingSensor::default());
        assert_eq!(auth.state(), AuthState::Idle);

        let outcome = auth.start();
        assert!(matches!(outcome, StartOutcome::Scanning(_)));
        assert_eq!(auth.state(), AuthState::Scanning);
        assert!(auth.is_scanning());
        assert_eq!(auth.sensor().opened, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sensor_refusal_is_terminal() {
        let sensor = CountingSensor {
            refuse: true,
            ..Default::default()
        };
        let (mut auth, mut rx) = engine(sensor);

        let outcome = auth.start();
        assert!(matches!(
            outcome,
            StartOutcome::Failed(ErrorRecord {
                kind: ErrorKind::NonRecoverableScanError,
                ..
            })
        ));
        assert_eq!(auth.state(), AuthState::Idle);
        assert!(matches!(
            rx.try_recv().unwrap(),
            AuthEvent::Completed { scan: None, .. }
        ));
    }

    #[test]
    fn test_scan_ids_are_not_reused() {
        let (mut auth, _rx) = engine(CountingSensor::default());
        let StartOutcome::Scanning(first) = auth.start() else {
            panic!("expected scan");
        };
        auth.stop();
        let StartOutcome::Scanning(second) = auth.start() else {
            panic!("expected scan");
        };
        assert_ne!(first, second);
    }

    #[test]
    fn test_events_after_drop_of_receiver_are_tolerated() {
        let (mut auth, rx) = engine(CountingSensor::default());
        drop(rx);
        let StartOutcome::Scanning(scan) = auth.start() else {
            panic!("expected scan");
        };
        let disposition = auth.handle_event(scan, HardwareEvent::Success { payload: vec![1] });
        assert_eq!(disposition, EventDisposition::Delivered);
        assert_eq!(auth.state(), AuthState::Idle);
    }
}
