//! Scratch buffer for whole-region rewrites.

use crate::error::LogFull;
use crate::flash::ERASED_BYTE;

/// Bytes reserved after the last record. The reserved byte stays erased and
/// marks the end of content for the next scan.
pub const SEPARATOR_LEN: usize = 1;

/// Bounded scratch arena, allocated once with the region capacity
///
/// An append composes the complete new region image here (old content, new
/// record, erased padding) before the region is erased and programmed.
#[derive(Debug)]
pub struct LogArena {
    buf: Box<[u8]>,
}

impl LogArena {
    /// Allocate an arena of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![ERASED_BYTE; capacity].into_boxed_slice(),
        }
    }

    /// Arena size in bytes
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Compose `existing ++ record ++ padding`
    ///
    /// Nothing is written when the result would not leave `SEPARATOR_LEN`
    /// erased bytes at the end.
    pub fn compose(&mut self, existing: &[u8], record: &[u8]) -> Result<&[u8], LogFull> {
        let needed = existing.len() + record.len() + SEPARATOR_LEN;
        if needed > self.capacity() {
            return Err(LogFull {
                needed,
                capacity: self.capacity(),
            });
        }

        let (head, tail) = self.buf.split_at_mut(existing.len());
        head.copy_from_slice(existing);
        tail[..record.len()].copy_from_slice(record);
        tail[record.len()..].fill(ERASED_BYTE);
        Ok(&self.buf)
    }
}
