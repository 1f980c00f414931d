//! Error types for stage control.
//!
//! `StageError` is the single error type shared by the driver crate and the
//! dispatcher. Every variant renders as a one-line diagnostic suitable for the
//! operator console.
//!
//! ## Error Hierarchy
//!
//! - **`DeviceUnresponsive`**: a response block did not complete in time. The
//!   device is left in whatever physical state it was in.
//! - **`ProtocolError`**: the controller echoed its syntax-error token.
//! - **`OutOfRange`**, **`UnsafeDirection`**, **`BelowMinimumTravel`**: a soft
//!   limit check was declined by the operator. Nothing was written.
//! - **`LockHeld`** and **`TransportUnavailable`**: fatal at startup.
//! - **`PositionUnavailable`**: the controller settled but never reported a
//!   position for the axis.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`StageError`].
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Primary error type for stage control.
#[derive(Error, Debug)]
pub enum StageError {
    /// No complete response block arrived within the allotted time or
    /// empty-read budget.
    ///
    /// **Recovery Strategy**: report to the operator. Never retry a move
    /// automatically: the first command may already be executing.
    #[error("Device unresponsive during '{command}' after {waited:?} ({empty_reads} empty reads)")]
    DeviceUnresponsive {
        /// Command whose response was being awaited.
        command: String,
        /// Wall-clock time spent waiting.
        waited: Duration,
        /// Consecutive empty reads observed before giving up.
        empty_reads: u32,
    },

    /// The controller rejected a command.
    #[error("Controller rejected '{command}': {response}")]
    ProtocolError {
        /// Command that was rejected.
        command: String,
        /// Response line carrying the error token.
        response: String,
    },

    /// Target lies outside the axis soft range and was not confirmed.
    #[error("Axis '{axis}' target {target} outside soft range [{min}, {max}]")]
    OutOfRange {
        /// Axis name.
        axis: String,
        /// Requested target in steps.
        target: i64,
        /// Inclusive lower bound in steps.
        min: i64,
        /// Inclusive upper bound in steps.
        max: i64,
    },

    /// Target crosses the zero reference of a rotation axis and was not
    /// confirmed.
    #[error("Axis '{axis}' target {target} reverses sign from {current}")]
    UnsafeDirection {
        /// Axis name.
        axis: String,
        /// Requested target in steps.
        target: i64,
        /// Last known position in steps.
        current: i64,
    },

    /// Rotation target magnitude is below the minimum travel threshold and
    /// was not confirmed.
    #[error("Axis '{axis}' target {target} below minimum travel of {threshold} steps")]
    BelowMinimumTravel {
        /// Axis name.
        axis: String,
        /// Requested target in steps.
        target: i64,
        /// Minimum magnitude in steps.
        threshold: i64,
    },

    /// Another process owns the device.
    #[error("Another tcon instance (pid {}) holds {}", holder_display(.holder_pid), .path.display())]
    LockHeld {
        /// Lock file path.
        path: PathBuf,
        /// Pid recorded by the holder, when readable.
        holder_pid: Option<u32>,
    },

    /// The serial device is missing or already claimed at the OS level.
    #[error("Serial port '{port}' unavailable: {reason}")]
    TransportUnavailable {
        /// Port path.
        port: String,
        /// OS-level reason.
        reason: String,
    },

    /// The controller settled without ever reporting a position.
    #[error("Axis '{axis}' settled but reported no position after {attempts} status queries")]
    PositionUnavailable {
        /// Axis name.
        axis: String,
        /// Status queries issued.
        attempts: u32,
    },

    /// Command token not understood by the dispatcher.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Command arguments could not be interpreted.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn holder_display(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => pid.to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StageError::ProtocolError {
            command: "d2 100".into(),
            response: "Syntax error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Controller rejected 'd2 100': Syntax error"
        );
    }

    #[test]
    fn test_lock_held_display_with_and_without_pid() {
        let held = StageError::LockHeld {
            path: PathBuf::from("/tmp/tcon.lock"),
            holder_pid: Some(4242),
        };
        assert!(held.to_string().contains("pid 4242"));

        let unknown = StageError::LockHeld {
            path: PathBuf::from("/tmp/tcon.lock"),
            holder_pid: None,
        };
        assert!(unknown.to_string().contains("pid unknown"));
    }
}
