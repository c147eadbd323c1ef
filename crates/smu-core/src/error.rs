//! Error taxonomy for the characterization engine.
//!
//! Errors fall into three categories, each with a distinct propagation rule:
//!
//! - **[`ConfigurationError`]** - invalid or inconsistent run parameters.
//!   Detected pre-flight by `validate()`; no hardware command has been issued.
//!   Returned synchronously from `RunController::start`.
//! - **[`InstrumentError`]** - failures talking to the SMU (timeouts, protocol
//!   violations, out-of-range levels, lost connections, missing capabilities).
//!   During a run these are captured on the run status (state = `Failed`) and
//!   never thrown across the protocol boundary.
//! - **[`ConflictError`]** - a run was requested while another one is active,
//!   or the acquisition buffer was cleared while being written.
//!
//! [`SmuError`] is the umbrella type used at API boundaries that can surface
//! any of the above.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Instrument Errors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentErrorKind {
    Timeout,
    ProtocolError,
    OutOfRange,
    Disconnected,
    Unsupported,
}

impl std::fmt::Display for InstrumentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            InstrumentErrorKind::Timeout => "timeout",
            InstrumentErrorKind::ProtocolError => "protocol",
            InstrumentErrorKind::OutOfRange => "out_of_range",
            InstrumentErrorKind::Disconnected => "disconnected",
            InstrumentErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by an instrument adapter or transport.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("instrument {kind} error: {message}")]
pub struct InstrumentError {
    pub kind: InstrumentErrorKind,
    pub message: String,
}

impl InstrumentError {
    pub fn new(kind: InstrumentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(InstrumentErrorKind::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(InstrumentErrorKind::ProtocolError, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(InstrumentErrorKind::OutOfRange, message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(InstrumentErrorKind::Disconnected, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(InstrumentErrorKind::Unsupported, message)
    }
}

impl From<std::io::Error> for InstrumentError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::timeout(err.to_string()),
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => Self::disconnected(err.to_string()),
            _ => Self::protocol(err.to_string()),
        }
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Run parameters that fail semantic validation.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("invalid `{field}`: {reason}")]
pub struct ConfigurationError {
    pub field: String,
    pub reason: String,
}

impl ConfigurationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Conflict Errors
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictError {
    /// A run is already active on this instrument session.
    #[error("run {active_run} is already active on this session")]
    RunActive { active_run: String },

    /// The acquisition buffer is owned by an active run.
    #[error("acquisition buffer cannot be cleared while a run is writing to it")]
    BufferInUse,
}

// =============================================================================
// Umbrella
// =============================================================================

/// Primary error type for engine entry points.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SmuError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A control request does not apply to the run's current state
    /// (e.g. pausing a retention run, resuming a run that is not paused).
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Convenience alias for results using the engine error type.
pub type SmuResult<T> = std::result::Result<T, SmuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_instrument_kinds() {
        let e: InstrumentError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert_eq!(e.kind, InstrumentErrorKind::Timeout);

        let e: InstrumentError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(e.kind, InstrumentErrorKind::Disconnected);

        let e: InstrumentError = std::io::Error::from(std::io::ErrorKind::InvalidData).into();
        assert_eq!(e.kind, InstrumentErrorKind::ProtocolError);
    }

    #[test]
    fn display_names_kind_and_message() {
        let e = InstrumentError::out_of_range("level 300 V exceeds 210 V");
        assert_eq!(
            e.to_string(),
            "instrument out_of_range error: level 300 V exceeds 210 V"
        );

        let c = ConfigurationError::new("step", "must be non-zero");
        assert_eq!(c.to_string(), "invalid `step`: must be non-zero");
    }

    #[test]
    fn umbrella_wraps_transparently() {
        let err: SmuError = ConflictError::BufferInUse.into();
        assert!(matches!(err, SmuError::Conflict(ConflictError::BufferInUse)));
        assert_eq!(
            err.to_string(),
            "acquisition buffer cannot be cleared while a run is writing to it"
        );
    }
}
