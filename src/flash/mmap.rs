//! File-backed flash image.
//!
//! Maps a whole-device image file with `memmap2`, so a host run sees the same
//! region contents after a restart, the way the device keeps them across a
//! power cycle. A new image is created fully erased (`0xFF`).

use super::{program_bytes, FlashDevice, FlashGeometry, ERASED_BYTE};
use crate::error::{AppResult, NodeError};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Flash device backed by a memory-mapped image file
pub struct MmapFlash {
    /// Memory-mapped image
    mmap: MmapMut,
    geometry: FlashGeometry,
    path: PathBuf,
}

impl MmapFlash {
    /// Open an image file, creating an erased one if it does not exist
    ///
    /// An existing image must match the geometry size exactly.
    pub fn open_or_create(path: &Path, geometry: FlashGeometry) -> AppResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len() as usize;
        let fresh = len == 0;
        if fresh {
            file.set_len(geometry.size as u64)?;
        } else if len != geometry.size {
            return Err(NodeError::Configuration(format!(
                "flash image {} is {len} bytes, expected {}",
                path.display(),
                geometry.size
            )));
        }

        // SAFETY: the file is open read/write and sized to the device; the
        // mapping is owned by this struct and not shared with other mappings.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        if fresh {
            mmap.fill(ERASED_BYTE);
            mmap.flush()?;
            tracing::info!(image = %path.display(), size = geometry.size, "Created erased flash image");
        }

        Ok(Self {
            mmap,
            geometry,
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing image
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_range(&self, range: Range<usize>) -> AppResult<()> {
        self.mmap.flush_range(range.start, range.len())?;
        Ok(())
    }
}

impl FlashDevice for MmapFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn mapped(&self, range: Range<usize>) -> AppResult<&[u8]> {
        self.geometry.check_bounds(&range)?;
        Ok(&self.mmap[range])
    }

    fn erase(&mut self, range: Range<usize>) -> AppResult<()> {
        self.geometry.check_erase(&range)?;
        self.mmap[range.clone()].fill(ERASED_BYTE);
        self.flush_range(range)
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> AppResult<()> {
        let range = offset..offset + data.len();
        self.geometry.check_program(&range)?;
        program_bytes(&mut self.mmap[range.clone()], data, offset)?;
        self.flush_range(range)
    }
}
