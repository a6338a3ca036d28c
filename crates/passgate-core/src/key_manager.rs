//! Lifecycle of the scan-gating key
//!
//! One [`KeyManager`] owns one key in the secure store. The key is created
//! lazily on the first attempt and kept until the store reports it
//! invalidated. After that, the next [`KeyManager::ensure_key`] call
//! generates a replacement under a fresh alias; an alias is never reused.
//!
//! Aliases have the form `<prefix>.<instance>.<generation>`, where the
//! instance id is drawn once per manager so that two managers never address
//! the same key.

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::KeyError;
use crate::keystore::{KeyAlias, KeyPolicy, SecureKeyStore};

/// Reference to the live key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    alias: KeyAlias,
    generation: u64,
}

impl KeyHandle {
    pub fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    /// How many keys this manager had generated when this one was created
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns the scan-gating key
pub struct KeyManager<S> {
    store: S,
    policy: KeyPolicy,
    prefix: String,
    instance: Uuid,
    generation: u64,
    live: Option<KeyHandle>,
}

impl<S: SecureKeyStore> KeyManager<S> {
    /// Create a manager with a fresh instance id
    pub fn new(store: S, policy: KeyPolicy, prefix: impl Into<String>) -> Self {
        Self {
            store,
            policy,
            prefix: prefix.into(),
            instance: Uuid::new_v4(),
            generation: 0,
            live: None,
        }
    }

    /// Return the live key, generating one if there is none
    pub fn ensure_key(&mut self) -> Result<KeyHandle, KeyError> {
        if let Some(handle) = &self.live {
            return Ok(handle.clone());
        }

        // The generation advances even if the store rejects the key, so a
        // half-written key from a failed attempt is never addressed again.
        self.generation += 1;
        let alias = KeyAlias::new(format!(
            "{}.{}.{}",
            self.prefix,
            self.instance.simple(),
            self.generation
        ));

        self.store
            .generate_key(&alias, &self.policy)
            .map_err(KeyError::Generation)?;

        info!(alias = %alias, generation = self.generation, "Scan key ready");

        let handle = KeyHandle {
            alias,
            generation: self.generation,
        };
        self.live = Some(handle.clone());
        Ok(handle)
    }

    /// Discard the live key after the store reported it invalidated
    ///
    /// The stored key is deleted best-effort. Calling this with no live key
    /// does nothing.
    pub fn invalidate(&mut self) {
        let Some(handle) = self.live.take() else {
            return;
        };

        warn!(alias = %handle.alias, "Scan key invalidated, a new key will be generated on the next attempt");

        if let Err(e) = self.store.delete_key(&handle.alias) {
            warn!(alias = %handle.alias, error = %e, "Failed to delete invalidated key");
        }
    }

    /// The live key, if any
    pub fn current(&self) -> Option<&KeyHandle> {
        self.live.as_ref()
    }

    pub fn policy(&self) -> &KeyPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Per-instance identifier embedded in every alias
    pub fn instance(&self) -> Uuid {
        self.instance
    }
}
