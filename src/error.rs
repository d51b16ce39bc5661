//! Custom error types for the sensor node.
//!
//! This module defines the primary error type, `NodeError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent vocabulary for the
//! conditions the node can hit, from a full log region to a dead flash chip.
//!
//! ## Error Hierarchy
//!
//! - **`LogFull`**: an append would not fit in the log region. The record is
//!   dropped and the region is left untouched. Recoverable.
//! - **`SensorReadInvalid`**: a derived measurement is outside its valid range
//!   (or a lead is detached). The sample is dropped. Recoverable.
//! - **`HardwareFault`**: flash erase/program failure or a peripheral that stopped
//!   answering. Unrecoverable; it ends the supervisor loop.
//! - **`InvalidTransition`**: a caller tried to move the log status along an edge
//!   that is not part of the `Idle -> Reading -> ReadDone -> Idle` cycle.
//! - **`Config`** / **`Configuration`**: parse errors from `figment` and semantic
//!   validation errors respectively.
//! - **`Io`**: wraps `std::io::Error` from the serial link or image files.
//! - **`MalformedRecord`**: a stored or received line does not follow the record grammar.
//!
//! Recoverable errors are handled where they are produced and only surface as a
//! diagnostic log line; see [`NodeError::is_recoverable`].

use crate::storage::LogStatus;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, NodeError>;

/// Returned by an append that would overflow the log region.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Log region full: append needs {needed} bytes, capacity is {capacity}")]
pub struct LogFull {
    /// Bytes the region would need to hold after the append (including the terminator).
    pub needed: usize,
    /// Region capacity in bytes.
    pub capacity: usize,
}

/// Primary error type for the node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    LogFull(#[from] LogFull),

    #[error("Invalid {sensor} reading: {reason}")]
    SensorReadInvalid {
        sensor: &'static str,
        reason: String,
    },

    #[error("Hardware fault: {0}")]
    HardwareFault(String),

    #[error("Invalid log status transition {from:?} -> {to:?}")]
    InvalidTransition { from: LogStatus, to: LogStatus },

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,

    #[error("Retrieval task failed: {0}")]
    Retrieval(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),
}

impl NodeError {
    /// Whether the condition is handled locally (log and continue).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NodeError::LogFull(_) | NodeError::SensorReadInvalid { .. }
        )
    }

    pub(crate) fn sensor(sensor: &'static str, reason: impl Into<String>) -> Self {
        NodeError::SensorReadInvalid {
            sensor,
            reason: reason.into(),
        }
    }
}
