//! Memory-mapped register access for FPA VFs
//!
//! [`RegisterIo`] is the seam between the resource core and the VF register
//! window. [`MappedBar`] implements it over a PCIe resource file mapped with
//! rustix; [`crate::emulated::EmulatedBar`] implements it in memory.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cast_possible_truncation)]

use crate::error::{FpaError, Result};
use fpa_chip::regs::{self, Register};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// 64-bit register access at byte offsets from a VF's BAR0.
pub trait RegisterIo: Debug + Send + Sync {
    /// Address the window is mapped at. Handles embed it, so it must be
    /// non-zero and aligned to at least [`fpa_chip::pool::MAX_SLOTS`].
    fn base_address(&self) -> u64;

    /// Read the 64-bit register at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is outside the window.
    fn read64(&self, offset: usize) -> Result<u64>;

    /// Write the 64-bit register at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is outside the window.
    fn write64(&self, offset: usize, value: u64) -> Result<()>;
}

/// Read the named register of gpool `slot`.
///
/// # Errors
///
/// Returns [`FpaError::InvalidSlot`] if `slot` is out of range, or the
/// underlying access error.
pub fn read_reg(io: &dyn RegisterIo, reg: Register, slot: usize) -> Result<u64> {
    let offset = regs::offset(reg, slot).ok_or(FpaError::InvalidSlot { slot })?;
    let value = io.read64(offset)?;
    tracing::trace!("{}[{slot}] @ {offset:#x} -> {value:#x}", reg.name());
    Ok(value)
}

/// Write the named register of gpool `slot`.
///
/// # Errors
///
/// Returns [`FpaError::InvalidSlot`] if `slot` is out of range, or the
/// underlying access error.
pub fn write_reg(io: &dyn RegisterIo, reg: Register, slot: usize, value: u64) -> Result<()> {
    let offset = regs::offset(reg, slot).ok_or(FpaError::InvalidSlot { slot })?;
    tracing::trace!("{}[{slot}] @ {offset:#x} <- {value:#x}", reg.name());
    io.write64(offset, value)
}

/// Memory-mapped VF BAR
///
/// Maps a PCIe resource file (`/sys/bus/pci/devices/<addr>/resource0`) and
/// provides bounds-checked volatile 64-bit access.
#[derive(Debug)]
pub struct MappedBar {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

impl MappedBar {
    /// Map BAR0 of the PCIe function at `pcie_address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource file cannot be opened or mapped.
    pub fn for_pci(pcie_address: &str) -> Result<Self> {
        Self::open(format!(
            "/sys/bus/pci/devices/{pcie_address}/resource{}",
            fpa_chip::pcie::REGISTER_BAR
        ))
    }

    /// Map the whole of `path` read/write.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened
    /// - The file is empty
    /// - mmap fails
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Mapping VF BAR: {}", path.display());

        let file = OpenOptions::new().read(true).write(true).open(path)?;

        // Truncation acceptable: BAR sizes fit in usize on 64-bit (our only target)
        let size = file.metadata()?.len() as usize;
        if size == 0 {
            return Err(FpaError::no_device(format!(
                "{} is empty (device not enabled?)",
                path.display()
            )));
        }

        // SAFETY: mmap of a freshly opened file descriptor.
        // Invariants: (1) fd valid and kept open in `_file` for the mapping's lifetime;
        // (2) size non-zero and equal to the file length; (3) offset 0;
        // (4) the mapping is released exactly once in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| FpaError::no_device(format!("mmap {} failed: {e}", path.display())))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| FpaError::no_device("mmap returned a null mapping"))?;

        tracing::info!("Mapped {} ({size:#x} bytes at {ptr:p})", path.display());

        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Get mapping size
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Get the mapped file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, offset: usize) -> Result<()> {
        if offset % 8 != 0 || offset + 8 > self.size {
            return Err(FpaError::no_device(format!(
                "register offset {offset:#x} outside {:#x}-byte window",
                self.size
            )));
        }
        Ok(())
    }
}

impl RegisterIo for MappedBar {
    fn base_address(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    fn read64(&self, offset: usize) -> Result<u64> {
        self.check(offset)?;
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap, valid for self.size; (2) offset+8 <= size;
        // (3) offset 8-byte aligned and the mapping is page aligned.
        Ok(unsafe { self.ptr.as_ptr().add(offset).cast::<u64>().read_volatile() })
    }

    fn write64(&self, offset: usize, value: u64) -> Result<()> {
        self.check(offset)?;
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+8 <= size; (3) 8-byte aligned.
        unsafe { self.ptr.as_ptr().add(offset).cast::<u64>().write_volatile(value) };
        Ok(())
    }
}

impl Drop for MappedBar {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {}", self.path.display());
        // SAFETY: ptr/size are exactly what mmap returned in open(); Drop runs once
        // and no references into the mapping outlive self.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: MappedBar owns its mapping exclusively; moving it between threads
// does not invalidate process-wide mmap'd memory.
unsafe impl Send for MappedBar {}

// SAFETY: All accesses are bounds-checked single volatile 64-bit loads/stores,
// which the device handles atomically; there is no other interior state.
unsafe impl Sync for MappedBar {}
