//! Sensor scripts
//!
//! A script is a comma-separated list of steps replayed by the simulated
//! sensor for one scan:
//!
//! ```text
//! help:Sensor dirty,nomatch,error:7:Too many attempts,success:cafe
//! ```

use std::str::FromStr;

use passgate_core::HardwareEvent;
use thiserror::Error;

/// Vendor code attached to simulated help events
const HELP_VENDOR_CODE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("Empty step")]
    EmptyStep,

    #[error("Unknown step '{0}'")]
    UnknownStep(String),

    #[error("Step '{step}' is missing its {field}")]
    MissingField { step: String, field: &'static str },

    #[error("Invalid error code '{0}'")]
    InvalidCode(String),
}

/// One scripted sensor event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Help(String),
    Error { code: i32, message: String },
    NoMatch,
    /// Mismatch that exhausts the platform's attempts
    Lockout,
    Success(Vec<u8>),
}

impl ScriptStep {
    /// Whether the sensor stops listening after this step
    pub fn ends_scan(&self) -> bool {
        matches!(
            self,
            ScriptStep::Error { .. } | ScriptStep::Lockout | ScriptStep::Success(_)
        )
    }

    pub fn to_event(&self) -> HardwareEvent {
        match self {
            ScriptStep::Help(message) => HardwareEvent::Help {
                code: HELP_VENDOR_CODE,
                message: message.clone(),
            },
            ScriptStep::Error { code, message } => HardwareEvent::Error {
                code: *code,
                message: message.clone(),
            },
            ScriptStep::NoMatch => HardwareEvent::Mismatch { exhausted: false },
            ScriptStep::Lockout => HardwareEvent::Mismatch { exhausted: true },
            ScriptStep::Success(payload) => HardwareEvent::Success {
                payload: payload.clone(),
            },
        }
    }
}

impl FromStr for ScriptStep {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScriptError::EmptyStep);
        }

        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => (name, Some(rest)),
            None => (s, None),
        };

        match name {
            "help" => {
                let message = rest.filter(|m| !m.is_empty()).ok_or(ScriptError::MissingField {
                    step: s.to_string(),
                    field: "message",
                })?;
                Ok(ScriptStep::Help(message.to_string()))
            }
            "error" => {
                let rest = rest.ok_or(ScriptError::MissingField {
                    step: s.to_string(),
                    field: "code",
                })?;
                let (code, message) = rest.split_once(':').unwrap_or((rest, ""));
                let code = code
                    .parse()
                    .map_err(|_| ScriptError::InvalidCode(code.to_string()))?;
                Ok(ScriptStep::Error {
                    code,
                    message: message.to_string(),
                })
            }
            "nomatch" => Ok(ScriptStep::NoMatch),
            "lockout" => Ok(ScriptStep::Lockout),
            "success" => Ok(ScriptStep::Success(
                rest.map(|p| p.as_bytes().to_vec()).unwrap_or_default(),
            )),
            _ => Err(ScriptError::UnknownStep(name.to_string())),
        }
    }
}

/// Steps for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromStr for Script {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let steps = s
            .split(',')
            .filter(|step| !step.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }
}
