//! Passgate - biometric authentication session engine
//!
//! Guards a protected screen behind a fingerprint scan bound to a
//! hardware-authenticated key, composed with an external PIN factor:
//! - Capability probing before every attempt
//! - Lifecycle of the auth-bound key, including regeneration after an
//!   enrollment change invalidates it
//! - One cipher session per attempt
//! - Scan start/stop with cancel-then-restart semantics
//! - Classification of every failure into a fixed taxonomy
//!
//! Sensor events are pushed into [`Authenticator::handle_event`]; results
//! are delivered as [`AuthEvent`]s on a channel.

pub mod capability;
pub mod cipher;
pub mod classifier;
pub mod config;
pub mod error;
pub mod gate;
pub mod key_manager;
pub mod keystore;
pub mod orchestrator;
pub mod scan;

pub use capability::{
    Capabilities, CapabilityOutcome, CapabilityProbe, EnrollmentProbe, PreflightNotice,
    StaticProbe,
};
pub use cipher::CipherSession;
pub use classifier::{classify, ErrorKind, ErrorRecord};
pub use config::EngineConfig;
pub use error::{CipherError, ConfigError, KeyError, SensorError, StoreError};
pub use gate::{Factor, FactorGate, GateDecision, UnlockPolicy};
pub use key_manager::{KeyHandle, KeyManager};
pub use keystore::{
    Enrollment, KeyAlgorithm, KeyAlias, KeyPolicy, SecureKeyStore, SoftwareKeyStore, StoredKey,
};
pub use orchestrator::{
    AuthEvent, AuthResult, AuthState, Authenticator, EventDisposition, SessionToken, StartOutcome,
};
pub use scan::{HardwareEvent, ScanChannel, ScanId, ScanSession};

pub use tokio_util::sync::CancellationToken;
