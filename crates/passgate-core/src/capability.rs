//! Capability probing
//!
//! Answers whether a biometric scan can be attempted at all. Probes are
//! queried fresh before every attempt; enrollment can change between two
//! calls to `start()`, so nothing here is cached.

use serde::{Deserialize, Serialize};

use crate::classifier::ErrorKind;
use crate::keystore::Enrollment;

/// Raw capability flags reported by the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub hardware_present: bool,
    pub enrollment_present: bool,
    pub platform_supported: bool,
}

impl Capabilities {
    /// Everything present
    pub fn available() -> Self {
        Self {
            hardware_present: true,
            enrollment_present: true,
            platform_supported: true,
        }
    }

    /// Reduce the flags to a single outcome
    ///
    /// Platform support is checked first, then hardware, then enrollment.
    pub fn outcome(&self) -> CapabilityOutcome {
        if !self.platform_supported {
            CapabilityOutcome::UnsupportedPlatform
        } else if !self.hardware_present {
            CapabilityOutcome::NoHardware
        } else if !self.enrollment_present {
            CapabilityOutcome::NoEnrollment
        } else {
            CapabilityOutcome::Available
        }
    }
}

/// Result of a capability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityOutcome {
    Available,
    NoHardware,
    NoEnrollment,
    UnsupportedPlatform,
}

impl CapabilityOutcome {
    /// The pre-flight notice for an unavailable outcome
    pub fn preflight(&self) -> Option<PreflightNotice> {
        match self {
            CapabilityOutcome::Available => None,
            CapabilityOutcome::NoHardware => Some(PreflightNotice::NoHardware),
            CapabilityOutcome::NoEnrollment => Some(PreflightNotice::NoEnrollment),
            CapabilityOutcome::UnsupportedPlatform => Some(PreflightNotice::PlatformTooOld),
        }
    }
}

/// Synchronous notice delivered by `start()` when no scan can be opened
///
/// The caller is expected to fall back to the PIN factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreflightNotice {
    NoHardware,
    NoEnrollment,
    PlatformTooOld,
}

impl PreflightNotice {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreflightNotice::NoHardware => ErrorKind::HardwareAbsent,
            PreflightNotice::NoEnrollment => ErrorKind::NotEnrolled,
            PreflightNotice::PlatformTooOld => ErrorKind::PlatformUnsupported,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PreflightNotice::NoHardware => "No fingerprint hardware found on this device.",
            PreflightNotice::NoEnrollment => "No fingerprint is registered on this device.",
            PreflightNotice::PlatformTooOld => "This platform does not support fingerprint authentication.",
        }
    }
}

/// Environment query
pub trait CapabilityProbe {
    /// Read the current flags
    fn capabilities(&self) -> Capabilities;

    /// Check whether a scan can be attempted right now
    fn check(&self) -> CapabilityOutcome {
        self.capabilities().outcome()
    }
}

/// Probe reporting fixed flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticProbe(pub Capabilities);

impl CapabilityProbe for StaticProbe {
    fn capabilities(&self) -> Capabilities {
        self.0
    }
}

/// Probe backed by a live [`Enrollment`] registry
#[derive(Debug, Clone)]
pub struct EnrollmentProbe {
    pub hardware_present: bool,
    pub platform_supported: bool,
    enrollment: Enrollment,
}

impl EnrollmentProbe {
    pub fn new(enrollment: Enrollment) -> Self {
        Self {
            hardware_present: true,
            platform_supported: true,
            enrollment,
        }
    }
}

impl CapabilityProbe for EnrollmentProbe {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hardware_present: self.hardware_present,
            enrollment_present: self.enrollment.is_enrolled(),
            platform_supported: self.platform_supported,
        }
    }
}

impl<P: CapabilityProbe + ?Sized> CapabilityProbe for &P {
    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }
}
