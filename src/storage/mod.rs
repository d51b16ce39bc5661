//! Persistent record storage.
//!
//! - [`FlashLog`]: append-only log over a flash region
//! - [`LogStatus`] / [`StatusCell`]: read lifecycle flag
//! - [`LogArena`]: bounded scratch buffer used by appends
//! - [`LogHandle`]: the log as shared between the sampling and retrieval contexts

mod arena;
mod flash_log;
mod status;

pub use arena::{LogArena, SEPARATOR_LEN};
pub use flash_log::{FlashLog, LogSnapshot, Records};
pub use status::{LogStatus, StatusCell};

use crate::flash::FlashDevice;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Shared ownership of a [`FlashLog`]
///
/// The mutex is the critical section around flash access: an append holds it
/// across the whole erase+program pair, and a reader holds it while copying a
/// snapshot, so a reader never sees a half-rewritten region. The status flag is
/// reachable without the lock for O(1) checks from trigger handlers.
pub struct LogHandle<F: FlashDevice> {
    log: Arc<Mutex<FlashLog<F>>>,
    status: StatusCell,
}

impl<F: FlashDevice> Clone for LogHandle<F> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            status: self.status.clone(),
        }
    }
}

impl<F: FlashDevice> LogHandle<F> {
    /// Wrap a mounted log
    pub fn new(log: FlashLog<F>) -> Self {
        let status = log.status_cell();
        Self {
            log: Arc::new(Mutex::new(log)),
            status,
        }
    }

    /// Current status, without taking the lock
    pub fn status(&self) -> LogStatus {
        self.status.load()
    }

    /// The shared status flag
    pub fn status_cell(&self) -> &StatusCell {
        &self.status
    }

    /// Enter the critical section
    pub fn lock(&self) -> MutexGuard<'_, FlashLog<F>> {
        self.log.lock()
    }

    /// Copy the current content under the lock
    pub fn snapshot(&self) -> LogSnapshot {
        self.log.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::RamFlash;

    #[test]
    fn test_handle_shares_log_and_status() {
        let log = FlashLog::mount(RamFlash::new(2048, 1024, 256), 1024, 1024).unwrap();
        let handle = LogHandle::new(log);
        let other = handle.clone();

        handle.lock().append(b"\r$ec,0.500,1,2,3,4\n").unwrap();
        assert_eq!(other.snapshot().records().count(), 1);

        other.lock().set_status(LogStatus::Reading).unwrap();
        assert_eq!(handle.status(), LogStatus::Reading);
    }
}
