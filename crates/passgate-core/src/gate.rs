//! Composition of the PIN and biometric factors
//!
//! The PIN comparison happens outside the engine; the host reports only
//! whether the entered PIN matched. [`FactorGate`] combines that with the
//! biometric results coming off the event channel and decides when the
//! protected screen may be shown.

use tracing::{debug, info};

use crate::orchestrator::{AuthEvent, AuthResult};

/// An authentication factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Factor {
    Pin,
    Biometric,
}

/// How many factors have to pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnlockPolicy {
    /// Either factor unlocks
    #[default]
    AnyFactor,
    /// Both factors have to pass
    AllFactors,
}

/// Gate decision after a factor result
///
/// Once the gate is unlocked every later result reports `Unlocked` until
/// [`FactorGate::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Unlocked,
    /// Waiting for another factor
    Pending { missing: Factor },
    /// The factor failed and the gate stays locked
    Denied { factor: Factor },
}

/// Two-factor unlock gate
#[derive(Debug, Clone, Default)]
pub struct FactorGate {
    policy: UnlockPolicy,
    pin_passed: bool,
    biometric_passed: bool,
}

impl FactorGate {
    pub fn new(policy: UnlockPolicy) -> Self {
        Self {
            policy,
            pin_passed: false,
            biometric_passed: false,
        }
    }

    /// Record the result of the external PIN comparison
    pub fn record_pin(&mut self, matched: bool) -> GateDecision {
        if matched {
            self.pin_passed = true;
            self.settle(Factor::Pin)
        } else {
            self.refuse(Factor::Pin)
        }
    }

    /// Record an event from the biometric engine
    ///
    /// Returns `None` for advisory events that do not change the decision.
    pub fn record_biometric(&mut self, event: &AuthEvent) -> Option<GateDecision> {
        match event {
            AuthEvent::Progress { .. } => None,
            AuthEvent::Preflight(notice) => Some(match self.policy {
                // The other factor can still unlock on its own
                UnlockPolicy::AnyFactor => self.settle(Factor::Biometric),
                UnlockPolicy::AllFactors => {
                    debug!(?notice, "Biometric factor unavailable");
                    self.refuse(Factor::Biometric)
                }
            }),
            AuthEvent::Completed {
                result: AuthResult::Success(_),
                ..
            } => {
                self.biometric_passed = true;
                Some(self.settle(Factor::Biometric))
            }
            AuthEvent::Completed {
                result: AuthResult::Failure(_),
                ..
            } => Some(self.refuse(Factor::Biometric)),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.decide() == GateDecision::Unlocked
    }

    pub fn policy(&self) -> UnlockPolicy {
        self.policy
    }

    /// Forget passed factors, e.g. when the protected screen is left
    pub fn reset(&mut self) {
        self.pin_passed = false;
        self.biometric_passed = false;
    }

    fn decide(&self) -> GateDecision {
        match (self.policy, self.pin_passed, self.biometric_passed) {
            (UnlockPolicy::AnyFactor, true, _) | (UnlockPolicy::AnyFactor, _, true) => {
                GateDecision::Unlocked
            }
            (UnlockPolicy::AnyFactor, false, false) => GateDecision::Pending {
                missing: Factor::Pin,
            },
            (UnlockPolicy::AllFactors, true, true) => GateDecision::Unlocked,
            (UnlockPolicy::AllFactors, false, _) => GateDecision::Pending {
                missing: Factor::Pin,
            },
            (UnlockPolicy::AllFactors, true, false) => GateDecision::Pending {
                missing: Factor::Biometric,
            },
        }
    }

    fn settle(&self, factor: Factor) -> GateDecision {
        let decision = self.decide();
        if decision == GateDecision::Unlocked {
            info!(?factor, policy = ?self.policy, "Gate unlocked");
        }
        decision
    }

    /// A failed factor denies only while the gate is still locked
    fn refuse(&self, factor: Factor) -> GateDecision {
        match self.decide() {
            GateDecision::Unlocked => GateDecision::Unlocked,
            _ => GateDecision::Denied { factor },
        }
    }
}
