//! Cipher sessions bound to the scan key
//!
//! A [`CipherSession`] is built once per attempt and handed to the sensor
//! with the scan. It is discarded when the attempt ends; a retry always
//! initializes a new one.
//!
//! Sealed output layout: nonce followed by ciphertext and the 16-byte tag.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{CipherError, StoreError};
use crate::key_manager::KeyHandle;
use crate::keystore::{KeyAlgorithm, KeyAlias, KeyPolicy, SecureKeyStore};

/// Direction a session is configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
}

enum Engine {
    ChaCha(ChaCha20Poly1305),
    XChaCha(XChaCha20Poly1305),
}

/// Encryption context for exactly one authentication attempt
///
/// Sessions cannot be duplicated for a later attempt:
///
/// ```compile_fail
/// fn reuse(session: &passgate_core::CipherSession) -> passgate_core::CipherSession {
///     session.clone()
/// }
/// ```
pub struct CipherSession {
    alias: KeyAlias,
    algorithm: KeyAlgorithm,
    direction: Direction,
    engine: Engine,
}

impl CipherSession {
    /// Load the key behind `handle` and configure an encrypt session
    ///
    /// `expected` is the policy the key was generated with. A key the store
    /// reports as permanently invalidated yields
    /// [`CipherError::KeyInvalidated`]; the caller is responsible for
    /// discarding the key.
    pub fn init<S: SecureKeyStore>(
        store: &S,
        handle: &KeyHandle,
        expected: &KeyPolicy,
    ) -> Result<Self, CipherError> {
        let key = store.load_key(handle.alias()).map_err(|e| match e {
            StoreError::PermanentlyInvalidated(alias) => CipherError::KeyInvalidated(alias),
            StoreError::NotFound(alias) => CipherError::KeyMissing(alias),
            other => CipherError::Store(other),
        })?;

        let policy = key.policy();
        if policy.algorithm != expected.algorithm {
            return Err(CipherError::AlgorithmMismatch {
                expected: expected.algorithm.to_string(),
                actual: policy.algorithm.to_string(),
            });
        }
        if expected.requires_fresh_auth && !policy.requires_fresh_auth {
            return Err(CipherError::UnboundKey(key.alias().clone()));
        }

        let material = key.material();
        let engine = match policy.algorithm {
            KeyAlgorithm::ChaCha20Poly1305 => Engine::ChaCha(
                ChaCha20Poly1305::new_from_slice(material)
                    .map_err(|e| CipherError::InvalidKey(e.to_string()))?,
            ),
            KeyAlgorithm::XChaCha20Poly1305 => Engine::XChaCha(
                XChaCha20Poly1305::new_from_slice(material)
                    .map_err(|e| CipherError::InvalidKey(e.to_string()))?,
            ),
        };

        Ok(Self {
            alias: key.alias().clone(),
            algorithm: policy.algorithm,
            direction: Direction::Encrypt,
            engine,
        })
    }

    pub fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Encrypt `plaintext` under a random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = vec![0u8; self.algorithm.nonce_len()];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = match &self.engine {
            Engine::ChaCha(cipher) => cipher.encrypt(Nonce::from_slice(&nonce_bytes), plaintext),
            Engine::XChaCha(cipher) => cipher.encrypt(XNonce::from_slice(&nonce_bytes), plaintext),
        }
        .map_err(|_| CipherError::Seal)?;

        let mut sealed = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }
}

impl fmt::Debug for CipherSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSession")
            .field("alias", &self.alias)
            .field("algorithm", &self.algorithm)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_manager::KeyManager;
    use crate::keystore::{Enrollment, SoftwareKeyStore};

    fn manager(algorithm: KeyAlgorithm) -> KeyManager<SoftwareKeyStore> {
        let store = SoftwareKeyStore::new(Enrollment::with_credentials(["right-thumb"]));
        KeyManager::new(store, KeyPolicy::biometric(algorithm), "passgate")
    }

    #[test]
    fn test_init_and_seal() {
        let mut keys = manager(KeyAlgorithm::ChaCha20Poly1305);
        let handle = keys.ensure_key().unwrap();

        let session = CipherSession::init(keys.store(), &handle, keys.policy()).unwrap();
        assert_eq!(session.direction(), Direction::Encrypt);
        assert_eq!(session.alias(), handle.alias());

        let sealed = session.seal(b"unlock").unwrap();
        // nonce + plaintext + tag
        assert_eq!(sealed.len(), 12 + 6 + 16);

        // Random nonce per call
        assert_ne!(sealed, session.seal(b"unlock").unwrap());
    }

    #[test]
    fn test_xchacha_layout() {
        let mut keys = manager(KeyAlgorithm::XChaCha20Poly1305);
        let handle = keys.ensure_key().unwrap();

        let session = CipherSession::init(keys.store(), &handle, keys.policy()).unwrap();
        assert_eq!(session.seal(b"").unwrap().len(), 24 + 16);
    }

    #[test]
    fn test_invalidated_key() {
        let mut keys = manager(KeyAlgorithm::ChaCha20Poly1305);
        let handle = keys.ensure_key().unwrap();

        keys.store().enrollment().enroll("left-thumb").unwrap();

        let err = CipherSession::init(keys.store(), &handle, keys.policy()).unwrap_err();
        assert_eq!(err, CipherError::KeyInvalidated(handle.alias().clone()));
    }

    #[test]
    fn test_algorithm_mismatch() {
        let mut keys = manager(KeyAlgorithm::XChaCha20Poly1305);
        let handle = keys.ensure_key().unwrap();

        let expected = KeyPolicy::biometric(KeyAlgorithm::ChaCha20Poly1305);
        let err = CipherSession::init(keys.store(), &handle, &expected).unwrap_err();
        assert!(matches!(err, CipherError::AlgorithmMismatch { .. }));
    }

    #[test]
    fn test_missing_key() {
        let mut keys = manager(KeyAlgorithm::ChaCha20Poly1305);
        let handle = keys.ensure_key().unwrap();
        keys.store().delete_key(handle.alias()).unwrap();

        let err = CipherSession::init(keys.store(), &handle, keys.policy()).unwrap_err();
        assert!(matches!(err, CipherError::KeyMissing(_)));
    }
}
