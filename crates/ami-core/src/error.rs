//! Error types for the plate imager.
//!
//! `AmiError` is the one error type the controller surfaces. Its variants follow
//! the failure classes of the system:
//!
//! - **`Configuration`**: plate configuration is missing, malformed or geometrically
//!   degenerate. Not recoverable locally; navigation and runs must not start.
//! - **`OutOfRange`** / **`InvalidAddress`**: a bad logical coordinate or address text.
//!   The single requested operation is rejected; controller state is untouched.
//! - **`Protocol`**: the motion controller did not answer, answered with an error or
//!   alarm, or the line could not be understood. The device position is unknown
//!   afterwards; the only safe recovery is an explicit homing cycle.
//! - **`OutOfBoundsMove`**: a computed target lies outside the travel limits. The move
//!   is never sent.
//! - **`IdleTimeout`**: the "movement complete" input never went low.
//! - **`Hardware`**: a GPIO line, the camera or another capability failed.
//!
//! Geometry and parsing errors never touch hardware and are safe to retry once
//! the input is corrected.

use std::time::Duration;

use thiserror::Error;

use crate::limits::TravelLimits;
use crate::plate::MachinePosition;

/// Convenience alias for results using the application error type.
pub type AmiResult<T> = std::result::Result<T, AmiError>;

/// Failure of a single command/response exchange with the motion controller.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Writing or flushing the command line failed.
    #[error("failed to send '{command}': {source}")]
    Write {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the response failed at the I/O level.
    #[error("failed to read response to '{command}': {source}")]
    Read {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// No terminating response arrived in time.
    #[error("no response to '{command}' within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The channel reached end-of-file while a response was pending.
    #[error("connection lost while waiting for response to '{command}'")]
    ConnectionLost { command: String },

    /// The controller answered `error:<code>`.
    #[error("controller rejected '{command}' with error:{code}")]
    Rejected { command: String, code: String },

    /// The controller answered `ALARM:<code>`.
    #[error("controller raised ALARM:{code} on '{command}'")]
    Alarm { command: String, code: String },

    /// A response line that is neither an acknowledgement, an error nor a status report.
    #[error("unexpected response to '{command}': {response:?}")]
    Malformed { command: String, response: String },

    /// A status report that does not carry numeric positions at the expected offsets.
    #[error("malformed status report: {0:?}")]
    StatusReport(String),
}

impl ProtocolError {
    /// True when the underlying channel is gone and nothing further can be sent.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ProtocolError::ConnectionLost { .. })
    }
}

/// Primary error type for the plate imager.
#[derive(Error, Debug)]
pub enum AmiError {
    /// Plate configuration is malformed or degenerate.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A logical row, column or sub-sample index outside the plate.
    #[error("{what} {value} is out of range (plate has {limit})")]
    OutOfRange {
        what: &'static str,
        value: usize,
        limit: usize,
    },

    /// Address text that cannot be parsed against this plate.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Motion controller exchange failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A move whose target lies outside the machine travel.
    #[error("that move would take you out of bounds: {target} is outside {limits}")]
    OutOfBoundsMove {
        target: MachinePosition,
        limits: TravelLimits,
    },

    /// The movement-complete input stayed high.
    #[error("motion did not report idle within {0:?}")]
    IdleTimeout(Duration),

    /// GPIO, camera or another capability failed.
    #[error("Hardware error: {0:#}")]
    Hardware(#[from] anyhow::Error),

    /// File system failure while laying out images or scripts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AmiError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        AmiError::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors after which the gantry position can no longer be trusted.
    ///
    /// Only an explicit homing cycle restores a known position.
    pub fn leaves_position_unknown(&self) -> bool {
        matches!(self, AmiError::Protocol(_) | AmiError::IdleTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AmiError::Configuration("nx must be greater than 1".to_string());
        assert_eq!(err.to_string(), "Configuration error: nx must be greater than 1");
    }

    #[test]
    fn test_protocol_error_wraps() {
        let err: AmiError = ProtocolError::Rejected {
            command: "G0 X1.000".into(),
            code: "22".into(),
        }
        .into();
        assert!(err.to_string().contains("error:22"));
        assert!(err.leaves_position_unknown());
    }

    #[test]
    fn test_out_of_range_is_not_positional() {
        let err = AmiError::OutOfRange {
            what: "row",
            value: 9,
            limit: 8,
        };
        assert!(!err.leaves_position_unknown());
        assert_eq!(err.to_string(), "row 9 is out of range (plate has 8)");
    }
}
