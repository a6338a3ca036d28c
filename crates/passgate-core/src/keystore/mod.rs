//! Secure key store abstraction
//!
//! The engine never owns key material long-term. Keys live in a
//! platform-managed store addressed by alias; the engine only keeps the
//! alias and asks the store for a [`StoredKey`] when a cipher session is
//! initialized.
//!
//! - [`SoftwareKeyStore`] keeps keys in process memory and ties them to an
//!   [`Enrollment`] registry, for hosts without a hardware-backed store and
//!   for tests.

mod enrollment;
mod software;

pub use enrollment::Enrollment;
pub use software::SoftwareKeyStore;

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Size of the symmetric keys the engine requests
pub const KEY_SIZE: usize = 32;

/// Name a key is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyAlias(String);

impl KeyAlias {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated symmetric ciphers a key can be generated for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// ChaCha20-Poly1305, 96-bit nonce
    #[default]
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    /// XChaCha20-Poly1305, 192-bit nonce
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl KeyAlgorithm {
    /// Nonce length for this algorithm
    pub fn nonce_len(&self) -> usize {
        match self {
            KeyAlgorithm::ChaCha20Poly1305 => 12,
            KeyAlgorithm::XChaCha20Poly1305 => 24,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAlgorithm::ChaCha20Poly1305 => f.write_str("ChaCha20-Poly1305"),
            KeyAlgorithm::XChaCha20Poly1305 => f.write_str("XChaCha20-Poly1305"),
        }
    }
}

/// Parameters a key is generated with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    pub algorithm: KeyAlgorithm,
    /// Every use of the key needs a fresh hardware authentication
    pub requires_fresh_auth: bool,
}

impl KeyPolicy {
    /// Policy for keys gating a biometric scan
    pub fn biometric(algorithm: KeyAlgorithm) -> Self {
        Self {
            algorithm,
            requires_fresh_auth: true,
        }
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::biometric(KeyAlgorithm::default())
    }
}

/// A key loaded from the store, ready to be bound to a cipher
///
/// Material is zeroized on drop.
pub struct StoredKey {
    alias: KeyAlias,
    policy: KeyPolicy,
    material: Zeroizing<[u8; KEY_SIZE]>,
}

impl StoredKey {
    pub fn new(alias: KeyAlias, policy: KeyPolicy, material: [u8; KEY_SIZE]) -> Self {
        Self {
            alias,
            policy,
            material: Zeroizing::new(material),
        }
    }

    pub fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub(crate) fn material(&self) -> &[u8; KEY_SIZE] {
        &self.material
    }
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKey")
            .field("alias", &self.alias)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Platform key store
///
/// Implementations translate their own failures into [`StoreError`]; the
/// engine never sees a platform-specific error type.
pub trait SecureKeyStore {
    /// Generate and persist a new key under `alias`
    fn generate_key(&self, alias: &KeyAlias, policy: &KeyPolicy) -> Result<(), StoreError>;

    /// Load the key stored under `alias`
    ///
    /// Returns [`StoreError::PermanentlyInvalidated`] when the key's
    /// authentication binding no longer holds.
    fn load_key(&self, alias: &KeyAlias) -> Result<StoredKey, StoreError>;

    /// Remove the key stored under `alias`
    fn delete_key(&self, alias: &KeyAlias) -> Result<(), StoreError>;
}

impl<S: SecureKeyStore + ?Sized> SecureKeyStore for &S {
    fn generate_key(&self, alias: &KeyAlias, policy: &KeyPolicy) -> Result<(), StoreError> {
        (**self).generate_key(alias, policy)
    }

    fn load_key(&self, alias: &KeyAlias) -> Result<StoredKey, StoreError> {
        (**self).load_key(alias)
    }

    fn delete_key(&self, alias: &KeyAlias) -> Result<(), StoreError> {
        (**self).delete_key(alias)
    }
}
