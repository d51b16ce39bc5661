//! Volatile flash simulator.

use super::{program_bytes, FlashDevice, FlashGeometry, ERASED_BYTE};
use crate::error::{AppResult, NodeError};
use std::ops::Range;

/// In-memory NOR flash
///
/// Starts fully erased. Counts erase/program operations so tests can observe
/// the cost of a write policy, and can be told to fail the next operation to
/// exercise the hardware-fault path.
///
/// # Example
///
/// ```rust
/// use biosense_node::flash::{FlashDevice, RamFlash};
///
/// let mut flash = RamFlash::new(4096, 1024, 256);
/// flash.program(0, &[0x42; 256]).unwrap();
/// assert_eq!(flash.mapped(0..2).unwrap(), &[0x42, 0x42]);
/// ```
#[derive(Debug, Clone)]
pub struct RamFlash {
    data: Vec<u8>,
    geometry: FlashGeometry,
    erase_count: usize,
    program_count: usize,
    fail_next_erase: bool,
    fail_next_program: bool,
}

impl RamFlash {
    /// Create an erased device
    pub fn new(size: usize, erase_size: usize, write_size: usize) -> Self {
        Self::with_geometry(FlashGeometry {
            size,
            erase_size,
            write_size,
        })
    }

    /// Create an erased device with the given geometry
    pub fn with_geometry(geometry: FlashGeometry) -> Self {
        Self {
            data: vec![ERASED_BYTE; geometry.size],
            geometry,
            erase_count: 0,
            program_count: 0,
            fail_next_erase: false,
            fail_next_program: false,
        }
    }

    /// Number of erase operations performed
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    /// Number of program operations performed
    pub fn program_count(&self) -> usize {
        self.program_count
    }

    /// Make the next erase fail with a hardware fault
    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }

    /// Make the next program fail with a hardware fault
    pub fn fail_next_program(&mut self) {
        self.fail_next_program = true;
    }
}

impl FlashDevice for RamFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn mapped(&self, range: Range<usize>) -> AppResult<&[u8]> {
        self.geometry.check_bounds(&range)?;
        Ok(&self.data[range])
    }

    fn erase(&mut self, range: Range<usize>) -> AppResult<()> {
        self.geometry.check_erase(&range)?;
        if std::mem::take(&mut self.fail_next_erase) {
            return Err(NodeError::HardwareFault(format!(
                "erase {:#x}..{:#x} failed",
                range.start, range.end
            )));
        }
        self.data[range].fill(ERASED_BYTE);
        self.erase_count += 1;
        Ok(())
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> AppResult<()> {
        let range = offset..offset + data.len();
        self.geometry.check_program(&range)?;
        if std::mem::take(&mut self.fail_next_program) {
            return Err(NodeError::HardwareFault(format!(
                "program at {offset:#x} failed"
            )));
        }
        program_bytes(&mut self.data[range], data, offset)?;
        self.program_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_erased() {
        let flash = RamFlash::new(2048, 1024, 256);
        assert!(flash
            .mapped(0..2048)
            .unwrap()
            .iter()
            .all(|&b| b == ERASED_BYTE));
    }

    #[test]
    fn test_program_then_erase() {
        let mut flash = RamFlash::new(2048, 1024, 256);
        flash.program(1024, &[0u8; 256]).unwrap();
        assert_eq!(flash.mapped(1024..1025).unwrap(), &[0]);

        // reprogramming zeros with ones needs an erase first
        assert!(flash.program(1024, &[0xAA; 256]).is_err());
        flash.erase(1024..2048).unwrap();
        flash.program(1024, &[0xAA; 256]).unwrap();

        let mut buf = [0u8; 4];
        flash.read(1024, &mut buf).unwrap();
        assert_eq!(buf, [0xAA; 4]);
        assert_eq!(flash.erase_count(), 1);
        assert_eq!(flash.program_count(), 2);
    }

    #[test]
    fn test_injected_faults_fire_once() {
        let mut flash = RamFlash::new(1024, 1024, 256);
        flash.fail_next_erase();
        assert!(matches!(
            flash.erase(0..1024),
            Err(NodeError::HardwareFault(_))
        ));
        assert!(flash.erase(0..1024).is_ok());

        flash.fail_next_program();
        assert!(flash.program(0, &[1u8; 256]).is_err());
        assert!(flash.program(0, &[1u8; 256]).is_ok());
    }

    #[test]
    fn test_out_of_bounds() {
        let flash = RamFlash::new(1024, 1024, 256);
        assert!(flash.mapped(1000..1100).is_err());
    }
}
