//! Error types for the passgate engine
//!
//! These are the boundary errors raised by the collaborators the engine
//! drives. None of them reach the listener directly: each one is translated
//! into an [`ErrorRecord`](crate::classifier::ErrorRecord) exactly once, in
//! `classifier.rs`.

use thiserror::Error;

use crate::keystore::KeyAlias;

/// Errors reported by a [`SecureKeyStore`](crate::keystore::SecureKeyStore)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No key is stored under the alias
    #[error("No key stored under alias {0}")]
    NotFound(KeyAlias),

    /// The key exists but its authentication binding was broken
    #[error("Key {0} was permanently invalidated")]
    PermanentlyInvalidated(KeyAlias),

    /// The store cannot satisfy the requested key policy
    #[error("Key policy rejected: {0}")]
    PolicyRejected(String),

    /// The store itself is not reachable
    #[error("Key store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while preparing the managed key
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The secure store could not produce or persist the key
    #[error("Failed to generate secret key for authentication: {0}")]
    Generation(#[source] StoreError),
}

/// Errors raised while initializing a cipher session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// The key no longer satisfies its authentication requirement
    #[error("Key {0} was invalidated by an enrollment change")]
    KeyInvalidated(KeyAlias),

    /// The key disappeared from the store
    #[error("Key {0} is missing from the key store")]
    KeyMissing(KeyAlias),

    /// Stored key parameters do not match the session configuration
    #[error("Failed to initialize cipher: expected {expected}, key is {actual}")]
    AlgorithmMismatch { expected: String, actual: String },

    /// The stored key does not require a fresh hardware authentication
    #[error("Key {0} is not bound to user authentication")]
    UnboundKey(KeyAlias),

    /// Key material was rejected by the cipher
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    /// Store I/O failed while loading the key
    #[error("Key store error: {0}")]
    Store(#[source] StoreError),

    /// Encryption with an initialized session failed
    #[error("Encryption failed")]
    Seal,
}

/// Errors raised by the hardware scan channel when opening a scan
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The sensor is held by another client
    #[error("Sensor busy")]
    Busy,

    /// The sensor refused to start listening
    #[error("Sensor failed to open: {0}")]
    OpenFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A field holds an unusable value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let alias = KeyAlias::new("passgate.test.1");
        let err = CipherError::KeyInvalidated(alias);
        assert!(err.to_string().contains("passgate.test.1"));
    }

    #[test]
    fn test_key_error_keeps_source() {
        use std::error::Error as _;

        let err = KeyError::Generation(StoreError::Unavailable("offline".into()));
        assert!(err.to_string().contains("generate secret key"));
        assert!(err.source().is_some());
    }
}
