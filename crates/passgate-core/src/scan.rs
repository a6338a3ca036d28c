//! Scan sessions and the hardware scan channel
//!
//! The sensor is an event source. The engine opens a scan through
//! [`ScanChannel::open`], keeps the returned cancellation token in a
//! [`ScanSession`], and the host pushes every sensor event back into the
//! engine tagged with the [`ScanId`] it belongs to.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::cipher::CipherSession;
use crate::classifier::{
    classify, ErrorRecord, CANNOT_RECOGNIZE_ERROR, CANNOT_RECOGNIZE_MESSAGE, NON_RECOVERABLE_ERROR,
    RECOVERABLE_ERROR,
};
use crate::error::SensorError;

/// Identifies one opened scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanId(u64);

impl ScanId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scan-{}", self.0)
    }
}

/// Events emitted by the sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    /// Transient condition the user can fix ("sensor dirty")
    Help { code: i32, message: String },
    /// Fatal condition; the sensor stops listening
    Error { code: i32, message: String },
    /// A valid scan that matched nothing
    Mismatch {
        /// The platform ran out of attempts
        exhausted: bool,
    },
    /// Authentication succeeded; the payload is opaque to the engine
    Success { payload: Vec<u8> },
}

impl HardwareEvent {
    /// Tier code for the classifier, `None` for success
    ///
    /// Platform-specific codes in `Help`/`Error` are kept for logging only.
    pub fn tier_code(&self) -> Option<i32> {
        match self {
            HardwareEvent::Help { .. } => Some(RECOVERABLE_ERROR),
            HardwareEvent::Error { .. } => Some(NON_RECOVERABLE_ERROR),
            HardwareEvent::Mismatch { .. } => Some(CANNOT_RECOGNIZE_ERROR),
            HardwareEvent::Success { .. } => None,
        }
    }

    /// Split into the success payload or the classified failure
    pub fn into_result(self) -> Result<Vec<u8>, ErrorRecord> {
        match self {
            HardwareEvent::Success { payload } => Ok(payload),
            failure => {
                let tier = failure.tier_code().unwrap_or(NON_RECOVERABLE_ERROR);
                let message = match &failure {
                    HardwareEvent::Help { message, .. } | HardwareEvent::Error { message, .. } => {
                        message.as_str()
                    }
                    _ => CANNOT_RECOGNIZE_MESSAGE,
                };
                Err(classify(tier, message))
            }
        }
    }
}

/// Hardware sensor
pub trait ScanChannel {
    /// Start listening for a fingerprint bound to `cipher`
    ///
    /// Returns the token that cancels this scan. Once the token is canceled
    /// the sensor must stop emitting events for `scan`, although one event
    /// already in flight may still arrive.
    fn open(&mut self, scan: ScanId, cipher: &CipherSession)
        -> Result<CancellationToken, SensorError>;
}

impl<C: ScanChannel + ?Sized> ScanChannel for &mut C {
    fn open(
        &mut self,
        scan: ScanId,
        cipher: &CipherSession,
    ) -> Result<CancellationToken, SensorError> {
        (**self).open(scan, cipher)
    }
}

impl<C: ScanChannel + ?Sized> ScanChannel for Box<C> {
    fn open(
        &mut self,
        scan: ScanId,
        cipher: &CipherSession,
    ) -> Result<CancellationToken, SensorError> {
        (**self).open(scan, cipher)
    }
}

/// One in-flight scan
#[derive(Debug)]
pub struct ScanSession {
    id: ScanId,
    cancel: CancellationToken,
    active: bool,
}

impl ScanSession {
    pub fn new(id: ScanId, cancel: CancellationToken) -> Self {
        Self {
            id,
            cancel,
            active: true,
        }
    }

    pub fn id(&self) -> ScanId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Cancel the scan. Returns false if it was already inactive.
    pub fn cancel(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.cancel.cancel();
        self.active = false;
        true
    }

    /// Mark the scan finished without canceling the sensor
    pub fn finish(&mut self) {
        self.active = false;
    }
}
