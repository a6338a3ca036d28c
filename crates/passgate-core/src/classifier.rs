//! Failure taxonomy and classification
//!
//! Every failure the engine can observe ends up as an [`ErrorRecord`].
//! Hardware events go through [`classify`]; collaborator errors go through
//! the `From` conversions at the bottom of this module. Nothing else in the
//! crate builds records by hand.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CipherError, KeyError, SensorError};

/// Transient sensor condition; the scan stays open
pub const RECOVERABLE_ERROR: i32 = 843;

/// Fatal sensor or engine failure; the attempt is over
pub const NON_RECOVERABLE_ERROR: i32 = 566;

/// A valid scan that matched no enrolled credential
pub const CANNOT_RECOGNIZE_ERROR: i32 = 456;

/// Message delivered with every mismatch
pub const CANNOT_RECOGNIZE_MESSAGE: &str = "Cannot recognize the fingerprint.";

/// Failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No sensor present
    HardwareAbsent,
    /// Sensor present, nothing enrolled
    NotEnrolled,
    /// Runtime below the minimum supported level
    PlatformUnsupported,
    /// The secure store rejected key creation
    KeyGenerationFailure,
    /// Cipher configuration failed
    CipherInitFailure,
    /// The key was permanently invalidated; regenerated on the next attempt
    KeyInvalidated,
    /// Transient sensor condition
    RecoverableScanError,
    /// Valid scan, no match
    CannotRecognize,
    /// Fatal sensor or driver fault
    NonRecoverableScanError,
    /// Explicit stop; never delivered as a failure
    Canceled,
}

impl ErrorKind {
    /// Whether the scan stays open after a failure of this kind
    pub fn keeps_session_open(&self) -> bool {
        matches!(self, ErrorKind::RecoverableScanError | ErrorKind::CannotRecognize)
    }
}

/// A classified failure, passed by value to the listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub code: i32,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Build a terminal non-recoverable record
    pub fn non_recoverable(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, NON_RECOVERABLE_ERROR, message)
    }
}

/// Classify a raw event code
///
/// Unknown codes are non-recoverable. An error is never dropped.
pub fn classify(raw_code: i32, raw_message: &str) -> ErrorRecord {
    let (kind, code) = match raw_code {
        RECOVERABLE_ERROR => (ErrorKind::RecoverableScanError, RECOVERABLE_ERROR),
        NON_RECOVERABLE_ERROR => (ErrorKind::NonRecoverableScanError, NON_RECOVERABLE_ERROR),
        CANNOT_RECOGNIZE_ERROR => (ErrorKind::CannotRecognize, CANNOT_RECOGNIZE_ERROR),
        other => {
            debug!(code = other, "Unmapped event code, treating as non-recoverable");
            (ErrorKind::NonRecoverableScanError, NON_RECOVERABLE_ERROR)
        }
    };

    ErrorRecord::new(kind, code, raw_message)
}

impl From<&KeyError> for ErrorRecord {
    fn from(err: &KeyError) -> Self {
        match err {
            KeyError::Generation(_) => {
                ErrorRecord::non_recoverable(ErrorKind::KeyGenerationFailure, err.to_string())
            }
        }
    }
}

impl From<&CipherError> for ErrorRecord {
    fn from(err: &CipherError) -> Self {
        let kind = match err {
            CipherError::KeyInvalidated(_) => ErrorKind::KeyInvalidated,
            _ => ErrorKind::CipherInitFailure,
        };
        ErrorRecord::non_recoverable(kind, err.to_string())
    }
}

impl From<&SensorError> for ErrorRecord {
    fn from(err: &SensorError) -> Self {
        ErrorRecord::non_recoverable(ErrorKind::NonRecoverableScanError, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::keystore::KeyAlias;
    use proptest::prelude::*;

    #[test]
    fn test_classify_tiers() {
        let record = classify(843, "sensor dirty");
        assert_eq!(record.kind, ErrorKind::RecoverableScanError);
        assert_eq!(record.message, "sensor dirty");

        assert_eq!(classify(566, "fatal").kind, ErrorKind::NonRecoverableScanError);
        assert_eq!(classify(456, "").kind, ErrorKind::CannotRecognize);
    }

    #[test]
    fn test_classify_unknown_defaults_to_non_recoverable() {
        let record = classify(999, "unknown");
        assert_eq!(record.kind, ErrorKind::NonRecoverableScanError);
        assert_eq!(record.code, NON_RECOVERABLE_ERROR);
        assert_eq!(record.message, "unknown");
    }

    #[test]
    fn test_session_open_kinds() {
        assert!(ErrorKind::RecoverableScanError.keeps_session_open());
        assert!(ErrorKind::CannotRecognize.keeps_session_open());
        assert!(!ErrorKind::NonRecoverableScanError.keeps_session_open());
        assert!(!ErrorKind::KeyInvalidated.keeps_session_open());
    }

    #[test]
    fn test_cipher_errors_map_once() {
        let alias = KeyAlias::new("k");
        let invalidated = ErrorRecord::from(&CipherError::KeyInvalidated(alias.clone()));
        assert_eq!(invalidated.kind, ErrorKind::KeyInvalidated);
        assert_eq!(invalidated.code, NON_RECOVERABLE_ERROR);

        let missing = ErrorRecord::from(&CipherError::KeyMissing(alias));
        assert_eq!(missing.kind, ErrorKind::CipherInitFailure);

        let keygen = ErrorRecord::from(&KeyError::Generation(StoreError::PolicyRejected(
            "no enrollment".into(),
        )));
        assert_eq!(keygen.kind, ErrorKind::KeyGenerationFailure);
    }

    proptest! {
        #[test]
        fn unmapped_codes_are_non_recoverable(code in any::<i32>(), message in ".{0,32}") {
            prop_assume!(![RECOVERABLE_ERROR, NON_RECOVERABLE_ERROR, CANNOT_RECOGNIZE_ERROR].contains(&code));
            let record = classify(code, &message);
            prop_assert_eq!(record.kind, ErrorKind::NonRecoverableScanError);
            prop_assert_eq!(record.message, message);
        }
    }
}
