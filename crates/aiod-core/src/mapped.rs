//! Register port over a memory-mapped register window.
//!
//! Opens a device node (or any file standing in for one) read/write and maps
//! the first `len` bytes. Every access is a single volatile load or store of
//! the width implied by the offset. The mapped backend has no DMA engine;
//! pair it with [`NoDma`](crate::port::NoDma).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::{MmapOptions, MmapRaw};
use parking_lot::Mutex;
use tracing::{info, trace};

use crate::error::{HardwareError, HardwareResult};
use crate::port::RegisterPort;
use crate::registers::{self, RegisterWidth};

/// [`RegisterPort`] backed by an `mmap`ed register window.
pub struct MappedPort {
    map: MmapRaw,
    path: PathBuf,
    // Serializes accesses; FIFO reads have side effects on real boards.
    lock: Mutex<()>,
}

impl MappedPort {
    /// Map `len` bytes of `path`.
    pub fn open(path: impl AsRef<Path>, len: usize) -> HardwareResult<Self> {
        let path = path.as_ref().to_path_buf();
        let map_failed = |source| HardwareError::MapFailed {
            path: path.display().to_string(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(map_failed)?;
        let map = MmapOptions::new().len(len).map_raw(&file).map_err(map_failed)?;

        info!(path = %path.display(), len, "Mapped register window");
        Ok(Self {
            map,
            path,
            lock: Mutex::new(()),
        })
    }

    /// Path of the mapped device.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, offset: u8) -> HardwareResult<RegisterWidth> {
        let width = registers::width_of(offset)?;
        if usize::from(offset) + width.bytes() > self.map.len() {
            return Err(HardwareError::UnmappedRegister { offset });
        }
        Ok(width)
    }
}

impl RegisterPort for MappedPort {
    #[allow(unsafe_code)]
    fn read(&self, offset: u8) -> HardwareResult<u32> {
        let width = self.check(offset)?;
        let _guard = self.lock.lock();
        // SAFETY: check() bounds the access inside the mapping and 32-bit
        // offsets are 4-byte aligned against a page-aligned base.
        let value = unsafe {
            let ptr = self.map.as_mut_ptr().add(usize::from(offset));
            match width {
                RegisterWidth::Byte => u32::from(std::ptr::read_volatile(ptr)),
                RegisterWidth::Dword => u32::from_le(std::ptr::read_volatile(ptr.cast::<u32>())),
            }
        };
        trace!(offset, value, "mapped read");
        Ok(value)
    }

    #[allow(unsafe_code)]
    fn write(&self, offset: u8, value: u32) -> HardwareResult<()> {
        let width = self.check(offset)?;
        if registers::is_read_only(offset) {
            return Err(HardwareError::ReadOnlyRegister { offset });
        }
        if value > width.max_value() {
            return Err(HardwareError::ValueTooWide { offset, value });
        }
        let _guard = self.lock.lock();
        // SAFETY: same bounds and alignment argument as read().
        unsafe {
            let ptr = self.map.as_mut_ptr().add(usize::from(offset));
            match width {
                RegisterWidth::Byte => std::ptr::write_volatile(ptr, value as u8),
                RegisterWidth::Dword => std::ptr::write_volatile(ptr.cast::<u32>(), value.to_le()),
            }
        }
        trace!(offset, value, "mapped write");
        Ok(())
    }
}

impl std::fmt::Debug for MappedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedPort")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish()
    }
}
