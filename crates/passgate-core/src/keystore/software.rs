//! In-memory key store bound to an enrollment registry
//!
//! Keys are 32 random bytes from the OS RNG. A key generated with
//! `requires_fresh_auth` records the enrollment epoch it was created under;
//! once the registry changes, loading it reports permanent invalidation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::RngCore;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{Enrollment, KeyAlias, KeyPolicy, SecureKeyStore, StoredKey, KEY_SIZE};
use crate::error::StoreError;

struct Entry {
    policy: KeyPolicy,
    material: Zeroizing<[u8; KEY_SIZE]>,
    /// Enrollment epoch at creation, for auth-bound keys
    bound_epoch: Option<u64>,
}

/// Process-local [`SecureKeyStore`]
#[derive(Clone)]
pub struct SoftwareKeyStore {
    enrollment: Enrollment,
    keys: Arc<Mutex<HashMap<KeyAlias, Entry>>>,
}

impl SoftwareKeyStore {
    pub fn new(enrollment: Enrollment) -> Self {
        Self {
            enrollment,
            keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The registry this store binds keys to
    pub fn enrollment(&self) -> &Enrollment {
        &self.enrollment
    }

    /// Whether a key is stored under `alias`
    pub fn contains(&self, alias: &KeyAlias) -> bool {
        self.lock().map(|keys| keys.contains_key(alias)).unwrap_or(false)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.lock().map(|keys| keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<KeyAlias, Entry>>, StoreError> {
        self.keys
            .lock()
            .map_err(|_| StoreError::Unavailable("key table poisoned".to_string()))
    }
}

impl SecureKeyStore for SoftwareKeyStore {
    fn generate_key(&self, alias: &KeyAlias, policy: &KeyPolicy) -> Result<(), StoreError> {
        let bound_epoch = if policy.requires_fresh_auth {
            // Auth-bound keys cannot exist without something to authenticate with
            if !self.enrollment.is_enrolled() {
                return Err(StoreError::PolicyRejected(
                    "at least one credential must be enrolled".to_string(),
                ));
            }
            Some(self.enrollment.epoch()?)
        } else {
            None
        };

        let mut material = Zeroizing::new([0u8; KEY_SIZE]);
        rand::rngs::OsRng.fill_bytes(&mut material[..]);

        let entry = Entry {
            policy: *policy,
            material,
            bound_epoch,
        };

        self.lock()?.insert(alias.clone(), entry);
        info!(alias = %alias, algorithm = %policy.algorithm, "Generated key");
        Ok(())
    }

    fn load_key(&self, alias: &KeyAlias) -> Result<StoredKey, StoreError> {
        let current_epoch = self.enrollment.epoch()?;
        let keys = self.lock()?;
        let entry = keys
            .get(alias)
            .ok_or_else(|| StoreError::NotFound(alias.clone()))?;

        if let Some(bound) = entry.bound_epoch {
            if bound != current_epoch {
                debug!(alias = %alias, bound, current_epoch, "Enrollment changed since key creation");
                return Err(StoreError::PermanentlyInvalidated(alias.clone()));
            }
        }

        Ok(StoredKey::new(alias.clone(), entry.policy, *entry.material))
    }

    fn delete_key(&self, alias: &KeyAlias) -> Result<(), StoreError> {
        self.lock()?
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(alias.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyAlgorithm;

    fn enrolled_store() -> SoftwareKeyStore {
        SoftwareKeyStore::new(Enrollment::with_credentials(["right-thumb"]))
    }

    #[test]
    fn test_generate_and_load() {
        let store = enrolled_store();
        let alias = KeyAlias::new("passgate.test.1");

        store.generate_key(&alias, &KeyPolicy::default()).unwrap();
        let key = store.load_key(&alias).unwrap();

        assert_eq!(key.alias(), &alias);
        assert_eq!(key.policy().algorithm, KeyAlgorithm::ChaCha20Poly1305);
        assert!(key.material().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_generation_requires_enrollment() {
        let store = SoftwareKeyStore::new(Enrollment::new());
        let alias = KeyAlias::new("passgate.test.1");

        let result = store.generate_key(&alias, &KeyPolicy::default());
        assert!(matches!(result, Err(StoreError::PolicyRejected(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_enrollment_change_invalidates_key() {
        let store = enrolled_store();
        let alias = KeyAlias::new("passgate.test.1");
        store.generate_key(&alias, &KeyPolicy::default()).unwrap();

        store.enrollment().enroll("left-thumb").unwrap();

        let result = store.load_key(&alias);
        assert_eq!(result.unwrap_err(), StoreError::PermanentlyInvalidated(alias));
    }

    #[test]
    fn test_unbound_key_survives_enrollment_change() {
        let store = enrolled_store();
        let alias = KeyAlias::new("passgate.unbound");
        let policy = KeyPolicy {
            requires_fresh_auth: false,
            ..KeyPolicy::default()
        };
        store.generate_key(&alias, &policy).unwrap();

        store.enrollment().remove("right-thumb").unwrap();
        assert!(store.load_key(&alias).is_ok());
    }

    #[test]
    fn test_delete_key() {
        let store = enrolled_store();
        let alias = KeyAlias::new("passgate.test.1");
        store.generate_key(&alias, &KeyPolicy::default()).unwrap();

        store.delete_key(&alias).unwrap();
        assert!(!store.contains(&alias));
        assert!(matches!(store.load_key(&alias), Err(StoreError::NotFound(_))));
        assert!(store.delete_key(&alias).is_err());
    }
}
