//! Append-only record log over a fixed flash region.
//!
//! # Region layout
//! ```text
//! offset 0                                   used            capacity
//! ├── \r$ec,...\n ── \r$ox,...\n ── ... ──────┤ 0xFF 0xFF ... ┤
//! ```
//!
//! No header, index or checksum: content runs from offset 0 to the first
//! erased byte. At least one erased byte is always kept at the end so the
//! scan terminates inside the region.
//!
//! # Write policy
//! Every append rewrites the whole region: compose the new image in the
//! [`LogArena`], erase the region, program the image. Cost is O(capacity) per
//! append, acceptable for a region of a few hundred erase pages. Between the
//! erase and the program the region is inconsistent; callers share the log
//! through [`LogHandle`](super::LogHandle), whose lock covers the whole
//! erase+program pair.

use super::arena::LogArena;
use super::status::{LogStatus, StatusCell};
use crate::config::FlashConfig;
use crate::error::{AppResult, NodeError};
use crate::flash::{FlashDevice, ERASED_BYTE};
use crate::record::{Record, RECORD_TERMINATOR};
use bytes::Bytes;
use std::ops::Range;
use tracing::{debug, warn};

/// Append-only log owning a flash region and its status flag
pub struct FlashLog<F: FlashDevice> {
    device: F,
    region: Range<usize>,
    used: usize,
    arena: LogArena,
    status: StatusCell,
}

impl<F: FlashDevice> FlashLog<F> {
    /// Mount the log on `capacity` bytes of `device` starting at `offset`
    ///
    /// The region must be erase-aligned and inside the device. Existing content
    /// is kept; its length is recovered by scanning for the first erased byte.
    pub fn mount(device: F, offset: usize, capacity: usize) -> AppResult<Self> {
        let geometry = device.geometry();
        if capacity == 0 || capacity % geometry.erase_size != 0 {
            return Err(NodeError::Configuration(format!(
                "log capacity {capacity} is not a non-zero multiple of erase size {}",
                geometry.erase_size
            )));
        }
        let region = offset..offset + capacity;
        geometry
            .check_erase(&region)
            .map_err(|e| NodeError::Configuration(format!("log region invalid: {e}")))?;

        let used = scan_used(device.mapped(region.clone())?);
        debug!(
            offset = format_args!("{offset:#x}"),
            capacity, used, "Mounted flash log"
        );

        Ok(Self {
            device,
            region,
            used,
            arena: LogArena::new(capacity),
            status: StatusCell::new(),
        })
    }

    /// Mount using the region placement of a flash config section
    pub fn from_config(device: F, config: &FlashConfig) -> AppResult<Self> {
        Self::mount(device, config.region_offset, config.region_capacity)
    }

    /// Region capacity in bytes
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes of record content currently stored
    pub fn used(&self) -> usize {
        self.used
    }

    /// True when no record is stored
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Append one encoded record
    ///
    /// The record must be a single line ending in `\n` and must not contain an
    /// erased byte. If `used + len + SEPARATOR_LEN` exceeds the capacity this
    /// returns `NodeError::LogFull` and the region is not touched. Flash
    /// failures are returned as `NodeError::HardwareFault`.
    pub fn append(&mut self, record: &[u8]) -> AppResult<()> {
        validate_record(record)?;

        let existing = self
            .device
            .mapped(self.region.start..self.region.start + self.used)?;
        let image = self.arena.compose(existing, record)?;

        let start = self.region.start;
        let written = self
            .device
            .erase(self.region.clone())
            .and_then(|()| self.device.program(start, image));
        if let Err(e) = written {
            // whatever survived the failed rewrite is the new content
            self.used = scan_used(self.device.mapped(self.region.clone()).unwrap_or_default());
            return Err(e);
        }
        self.used += record.len();
        debug!(len = record.len(), used = self.used, "Appended record");
        Ok(())
    }

    /// Encode and append a record
    pub fn append_record(&mut self, record: &Record) -> AppResult<()> {
        self.append(&record.to_bytes())
    }

    /// Iterate over the stored records, oldest first
    ///
    /// Each call re-scans the raw region, so the sequence can be restarted at
    /// will. Tokens keep their trailing `\n`.
    pub fn read_all(&self) -> Records<'_> {
        Records::new(self.device.mapped(self.region.clone()).unwrap_or_default())
    }

    /// Copy of the stored content, detached from the region
    pub fn snapshot(&self) -> LogSnapshot {
        let content = self
            .device
            .mapped(self.region.start..self.region.start + self.used)
            .unwrap_or_default();
        LogSnapshot {
            content: Bytes::copy_from_slice(content),
        }
    }

    /// Erase the whole region
    ///
    /// Does not touch the status. Erasing while a read is in progress destroys
    /// records that have not been delivered; use [`Self::erase_after_read`] for
    /// the lifecycle step.
    pub fn erase(&mut self) -> AppResult<()> {
        if self.status.load() == LogStatus::Reading {
            warn!("Erasing flash log while a read is in progress");
        }
        self.device.erase(self.region.clone())?;
        self.used = 0;
        Ok(())
    }

    /// Erase after a completed read and return to `Idle`
    ///
    /// Rejected with `InvalidTransition` unless the status is `ReadDone`.
    pub fn erase_after_read(&mut self) -> AppResult<()> {
        let status = self.status.load();
        if status != LogStatus::ReadDone {
            return Err(NodeError::InvalidTransition {
                from: status,
                to: LogStatus::Idle,
            });
        }
        self.device.erase(self.region.clone())?;
        self.used = 0;
        self.status.transition(LogStatus::ReadDone, LogStatus::Idle)
    }

    /// Current status
    pub fn status(&self) -> LogStatus {
        self.status.load()
    }

    /// Move the status along a lifecycle edge
    pub fn set_status(&self, status: LogStatus) -> AppResult<()> {
        self.status.set(status)
    }

    /// Shared handle to the status flag
    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Underlying device
    pub fn device(&self) -> &F {
        &self.device
    }

    /// Release the underlying device
    pub fn into_device(self) -> F {
        self.device
    }
}

/// Owned copy of the log content
#[derive(Debug, Clone, Default)]
pub struct LogSnapshot {
    content: Bytes,
}

impl LogSnapshot {
    /// Iterate over the records in the snapshot
    pub fn records(&self) -> Records<'_> {
        Records::new(&self.content)
    }

    /// Raw content
    pub fn as_bytes(&self) -> &[u8] {
        &self.content
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// True when the snapshot holds no record
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Iterator over newline-terminated records, stopping at the first erased byte
#[derive(Debug, Clone)]
pub struct Records<'a> {
    rest: &'a [u8],
}

impl<'a> Records<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self { rest: raw }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.first().map_or(true, |&b| b == ERASED_BYTE) {
            return None;
        }
        let end = match self
            .rest
            .iter()
            .position(|&b| b == RECORD_TERMINATOR || b == ERASED_BYTE)
        {
            Some(pos) if self.rest[pos] == RECORD_TERMINATOR => pos + 1,
            Some(pos) => pos,
            None => self.rest.len(),
        };
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(token)
    }
}

fn scan_used(region: &[u8]) -> usize {
    region
        .iter()
        .position(|&b| b == ERASED_BYTE)
        .unwrap_or(region.len())
}

fn validate_record(record: &[u8]) -> AppResult<()> {
    let malformed = |reason: &str| {
        NodeError::MalformedRecord(format!(
            "{:?}: {reason}",
            String::from_utf8_lossy(record)
        ))
    };
    match record.split_last() {
        None => Err(malformed("empty record")),
        Some((&last, _)) if last != RECORD_TERMINATOR => Err(malformed("missing terminator")),
        Some((_, body)) if body.contains(&RECORD_TERMINATOR) => {
            Err(malformed("embedded terminator"))
        }
        Some(_) if record.contains(&ERASED_BYTE) => Err(malformed("contains erased byte")),
        Some(_) => Ok(()),
    }
}
