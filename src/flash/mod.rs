//! NOR flash device abstraction.
//!
//! The log region lives in on-chip NOR flash. The contract every device in this
//! module honours:
//!
//! - erased bytes read as [`ERASED_BYTE`] (`0xFF`)
//! - `erase` works on whole erase blocks (`erase_size`-aligned offset and length)
//! - `program` works on whole write pages and can only clear bits; programming
//!   a byte that is not erased to a value that needs a bit set is a fault
//! - the device is memory mapped (XIP), so contents can be borrowed directly
//!
//! Two implementations are provided: [`RamFlash`] (volatile, with fault
//! injection for tests) and [`MmapFlash`] (a flash image file mapped with
//! `memmap2`, persistent across host runs).

mod mmap;
mod ram;

pub use mmap::MmapFlash;
pub use ram::RamFlash;

pub use crate::config::consts::ERASED_BYTE;

use crate::config::FlashConfig;
use crate::error::{AppResult, NodeError};
use std::ops::Range;

/// Physical layout of a flash device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// Total size in bytes
    pub size: usize,
    /// Erase block size in bytes
    pub erase_size: usize,
    /// Program page size in bytes
    pub write_size: usize,
}

impl FlashGeometry {
    /// Geometry described by a flash config section
    pub fn from_config(config: &FlashConfig) -> Self {
        Self {
            size: config.size,
            erase_size: config.erase_size,
            write_size: config.write_size,
        }
    }

    /// Check an erase request against this geometry
    pub fn check_erase(&self, range: &Range<usize>) -> AppResult<()> {
        self.check_bounds(range)?;
        if range.start % self.erase_size != 0 || range.end % self.erase_size != 0 {
            return Err(NodeError::HardwareFault(format!(
                "erase {:#x}..{:#x} not aligned to {:#x}",
                range.start, range.end, self.erase_size
            )));
        }
        Ok(())
    }

    /// Check a program request against this geometry
    pub fn check_program(&self, range: &Range<usize>) -> AppResult<()> {
        self.check_bounds(range)?;
        if range.start % self.write_size != 0 || range.len() % self.write_size != 0 {
            return Err(NodeError::HardwareFault(format!(
                "program {:#x}..{:#x} not aligned to {:#x}",
                range.start, range.end, self.write_size
            )));
        }
        Ok(())
    }

    /// Check that a range lies inside the device
    pub fn check_bounds(&self, range: &Range<usize>) -> AppResult<()> {
        if range.start > range.end || range.end > self.size {
            return Err(NodeError::HardwareFault(format!(
                "access {:#x}..{:#x} outside flash of {:#x} bytes",
                range.start, range.end, self.size
            )));
        }
        Ok(())
    }
}

/// A memory-mapped NOR flash device
pub trait FlashDevice: Send {
    /// Device layout
    fn geometry(&self) -> FlashGeometry;

    /// Borrow a range of the device contents (execute-in-place view)
    fn mapped(&self, range: Range<usize>) -> AppResult<&[u8]>;

    /// Erase whole blocks to [`ERASED_BYTE`]
    fn erase(&mut self, range: Range<usize>) -> AppResult<()>;

    /// Program whole pages starting at `offset`
    fn program(&mut self, offset: usize, data: &[u8]) -> AppResult<()>;

    /// Copy a range of the device contents into `buf`
    fn read(&self, offset: usize, buf: &mut [u8]) -> AppResult<()> {
        buf.copy_from_slice(self.mapped(offset..offset + buf.len())?);
        Ok(())
    }
}

/// Apply NOR program semantics to `dst`: bits can only go from 1 to 0.
pub(crate) fn program_bytes(dst: &mut [u8], data: &[u8], offset: usize) -> AppResult<()> {
    if let Some(pos) = dst
        .iter()
        .zip(data)
        .position(|(old, new)| old & new != *new)
    {
        return Err(NodeError::HardwareFault(format!(
            "program over unerased byte at {:#x}",
            offset + pos
        )));
    }
    dst.copy_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FlashGeometry {
        FlashGeometry {
            size: 8192,
            erase_size: 4096,
            write_size: 256,
        }
    }

    #[test]
    fn test_erase_alignment() {
        let geo = geometry();
        assert!(geo.check_erase(&(0..4096)).is_ok());
        assert!(geo.check_erase(&(4096..8192)).is_ok());
        assert!(geo.check_erase(&(256..4096)).is_err());
        assert!(geo.check_erase(&(0..8193)).is_err());
    }

    #[test]
    fn test_program_alignment() {
        let geo = geometry();
        assert!(geo.check_program(&(256..768)).is_ok());
        assert!(geo.check_program(&(1..257)).is_err());
        assert!(geo.check_program(&(0..100)).is_err());
    }

    #[test]
    fn test_program_bytes_only_clears_bits() {
        let mut dst = [0xFF, 0xFF, 0x0F];
        assert!(program_bytes(&mut dst, &[0x12, 0x34, 0x0F], 0).is_ok());
        assert_eq!(dst, [0x12, 0x34, 0x0F]);

        let mut dst = [0x00, 0xFF];
        assert!(matches!(
            program_bytes(&mut dst, &[0x01, 0x00], 0x100),
            Err(NodeError::HardwareFault(msg)) if msg.contains("0x100")
        ));
        // untouched on failure
        assert_eq!(dst, [0x00, 0xFF]);
    }
}
