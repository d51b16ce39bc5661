//! Read-lifecycle status shared between the sampling and retrieval contexts.
//!
//! The status is an atomic byte so trigger handlers can test it in O(1) without
//! taking the region lock. Every write is a compare-exchange along one of the
//! edges of the lifecycle:
//!
//! ```text
//!   Idle ──start read──▶ Reading ──finish read──▶ ReadDone ──erase──▶ Idle
//!                           │
//!                           └──abort (halted mid-read)──▶ Idle
//! ```
//!
//! Writes use `Release` and reads use `Acquire`: a context that observes
//! `ReadDone` also observes everything the retrieval task did before finishing.

use crate::error::{AppResult, NodeError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state of the log region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogStatus {
    /// Accepting appends, nothing read yet
    Idle = 0,
    /// A retrieval is streaming the region
    Reading = 1,
    /// The region was fully transmitted and is waiting to be erased
    ReadDone = 2,
}

impl LogStatus {
    /// Whether `self -> next` is an edge of the lifecycle
    pub fn can_transition_to(self, next: LogStatus) -> bool {
        matches!(
            (self, next),
            (LogStatus::Idle, LogStatus::Reading)
                | (LogStatus::Reading, LogStatus::ReadDone)
                | (LogStatus::ReadDone, LogStatus::Idle)
        )
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LogStatus::Reading,
            2 => LogStatus::ReadDone,
            _ => LogStatus::Idle,
        }
    }
}

/// Shared handle to the status flag
#[derive(Debug, Clone)]
pub struct StatusCell {
    raw: Arc<AtomicU8>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    /// New cell in `Idle`
    pub fn new() -> Self {
        Self {
            raw: Arc::new(AtomicU8::new(LogStatus::Idle as u8)),
        }
    }

    /// Current status
    pub fn load(&self) -> LogStatus {
        LogStatus::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Move along the edge `from -> to`
    ///
    /// Fails with `InvalidTransition` if the edge is not part of the lifecycle
    /// or if the current status is not `from`.
    pub fn transition(&self, from: LogStatus, to: LogStatus) -> AppResult<()> {
        if !from.can_transition_to(to) {
            return Err(NodeError::InvalidTransition { from, to });
        }
        self.raw
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| NodeError::InvalidTransition {
                from: LogStatus::from_u8(actual),
                to,
            })
    }

    /// Move from whatever the current status is to `to`, if that edge is valid
    pub fn set(&self, to: LogStatus) -> AppResult<()> {
        let mut current = self.load();
        loop {
            if !current.can_transition_to(to) {
                return Err(NodeError::InvalidTransition { from: current, to });
            }
            match self.raw.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = LogStatus::from_u8(actual),
            }
        }
    }

    /// Roll an unfinished read back to `Idle`
    ///
    /// Returns `true` if a read was in progress.
    pub fn abort_read(&self) -> bool {
        self.raw
            .compare_exchange(
                LogStatus::Reading as u8,
                LogStatus::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
