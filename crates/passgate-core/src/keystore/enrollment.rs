//! Enrollment registry shared by the software store and probe
//!
//! Tracks which biometric credentials are enrolled. Every change bumps the
//! epoch; keys remember the epoch they were created under and become
//! permanently invalid once it moves.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::error::StoreError;

#[derive(Debug, Default)]
struct EnrollmentState {
    credentials: BTreeSet<String>,
    epoch: u64,
}

/// Shared handle to the enrolled credential set
#[derive(Debug, Clone, Default)]
pub struct Enrollment {
    inner: Arc<Mutex<EnrollmentState>>,
}

impl Enrollment {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the given credentials enrolled
    pub fn with_credentials<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = EnrollmentState {
            credentials: credentials.into_iter().map(Into::into).collect(),
            epoch: 0,
        };
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, EnrollmentState>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("enrollment registry poisoned".to_string()))
    }

    /// Enroll a credential. Returns false if it was already enrolled.
    pub fn enroll(&self, credential: impl Into<String>) -> Result<bool, StoreError> {
        let credential = credential.into();
        let mut state = self.lock()?;
        let added = state.credentials.insert(credential.clone());
        if added {
            state.epoch += 1;
            info!(credential = %credential, epoch = state.epoch, "Credential enrolled");
        }
        Ok(added)
    }

    /// Remove a credential. Returns false if it was not enrolled.
    pub fn remove(&self, credential: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let removed = state.credentials.remove(credential);
        if removed {
            state.epoch += 1;
            info!(credential = %credential, epoch = state.epoch, "Credential removed");
        }
        Ok(removed)
    }

    /// Current epoch
    pub fn epoch(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.epoch)
    }

    /// Whether at least one credential is enrolled
    ///
    /// A poisoned registry reads as not enrolled.
    pub fn is_enrolled(&self) -> bool {
        self.lock().map(|s| !s.credentials.is_empty()).unwrap_or(false)
    }

    /// Number of enrolled credentials
    pub fn count(&self) -> usize {
        self.lock().map(|s| s.credentials.len()).unwrap_or(0)
    }
}
