//! Pool stack memory
//!
//! Each configured pool owns one block of page-aligned, pinned memory that the
//! FPA uses as its free-pointer stack. The PF needs the block's device-visible
//! address; depending on the platform that is the virtual address itself
//! (IOVA-as-VA) or the physical address.
//!
//! Memory is released when the [`DmaMemory`] box is dropped, so every rollback
//! path frees it by dropping.

use crate::error::{FpaError, Result};
use rustix::mm::{mlock, munlock};
use std::alloc::Layout;
use std::fmt::Debug;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// Pinned memory visible to the device.
pub trait DmaMemory: Debug + Send + Sync {
    /// Virtual address of the first byte.
    fn va(&self) -> u64;
    /// Device-visible address of the first byte.
    fn iova(&self) -> u64;
    /// Length in bytes.
    fn len(&self) -> usize;
    /// Whether the block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of pool stack memory.
pub trait DmaAllocator: Send + Sync {
    /// Allocate `len` bytes aligned to `align`.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::OutOfMemory`] if the block cannot be provided.
    fn allocate(&self, len: usize, align: usize) -> Result<Box<dyn DmaMemory>>;
}

/// How device addresses are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IovaMode {
    /// The IOMMU maps IOVA == VA.
    #[default]
    Va,
    /// Physical addresses, resolved through `/proc/self/pagemap`.
    Pa,
}

/// Host memory, zeroed and mlocked
#[derive(Debug)]
pub struct LockedMemory {
    ptr: *mut u8,
    layout: Layout,
    iova: u64,
}

const PAGEMAP_PRESENT: u64 = 1 << 63;
const PAGEMAP_PFN_MASK: u64 = 0x3f_ffff_ffff_ffff;
const HOST_PAGE_SIZE: usize = 4096;

impl LockedMemory {
    /// Allocate and pin `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::OutOfMemory`] if allocation, locking or address
    /// translation fails.
    pub fn new(len: usize, align: usize, mode: IovaMode) -> Result<Self> {
        let oom = || FpaError::OutOfMemory { size: len };
        if len == 0 {
            return Err(oom());
        }
        let layout = Layout::from_size_align(len, align.max(HOST_PAGE_SIZE)).map_err(|_| oom())?;

        // SAFETY: layout has non-zero size and a power-of-two alignment;
        // the block is released with the same layout in Drop.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(oom());
        }

        // SAFETY: [ptr, ptr+len) lies entirely within the allocation above.
        if let Err(e) = unsafe { mlock(ptr.cast(), len) } {
            tracing::warn!("mlock of {len} byte pool stack failed: {e}");
            // SAFETY: ptr was allocated above with this layout.
            unsafe { std::alloc::dealloc(ptr, layout) };
            return Err(oom());
        }

        let mut mem = Self {
            ptr,
            layout,
            iova: ptr as u64,
        };
        if mode == IovaMode::Pa {
            mem.iova = mem.physical_address().map_err(|e| {
                tracing::warn!("Cannot resolve pool stack physical address: {e}");
                oom()
            })?;
        }

        tracing::debug!(
            "Pool stack: va={:#x}, iova={:#x}, len={len:#x}",
            mem.va(),
            mem.iova
        );
        Ok(mem)
    }

    /// Physical address of the block; every page must be resident and
    /// physically contiguous.
    fn physical_address(&self) -> std::io::Result<u64> {
        let first_page = self.ptr as usize / HOST_PAGE_SIZE;
        let pages = self.layout.size().div_ceil(HOST_PAGE_SIZE);

        let mut pagemap = File::open("/proc/self/pagemap")?;
        pagemap.seek(SeekFrom::Start((first_page * 8) as u64))?;
        let mut entries = vec![0u64; pages];
        pagemap.read_exact(bytemuck::cast_slice_mut(&mut entries))?;

        let mut pfns = entries.iter().map(|entry| {
            if entry & PAGEMAP_PRESENT == 0 || entry & PAGEMAP_PFN_MASK == 0 {
                Err(std::io::Error::other("page not present or PFN hidden"))
            } else {
                Ok(entry & PAGEMAP_PFN_MASK)
            }
        });
        let base = pfns.next().unwrap_or_else(|| Err(std::io::Error::other("empty block")))?;
        for (i, pfn) in pfns.enumerate() {
            if pfn? != base + i as u64 + 1 {
                return Err(std::io::Error::other("block not physically contiguous"));
            }
        }
        Ok(base * HOST_PAGE_SIZE as u64 + (self.ptr as u64 % HOST_PAGE_SIZE as u64))
    }
}

impl DmaMemory for LockedMemory {
    fn va(&self) -> u64 {
        self.ptr as u64
    }

    fn iova(&self) -> u64 {
        self.iova
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for LockedMemory {
    fn drop(&mut self) {
        // SAFETY: ptr was mlocked for layout.size() bytes in new().
        unsafe {
            let _ = munlock(self.ptr.cast(), self.layout.size());
        }
        // SAFETY: ptr came from alloc_zeroed with this exact layout; Drop runs once.
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
        tracing::debug!("Freed pool stack at iova={:#x}", self.iova);
    }
}

// SAFETY: LockedMemory owns its block exclusively and exposes only addresses.
unsafe impl Send for LockedMemory {}

// SAFETY: No interior mutability; all accessors read immutable fields.
unsafe impl Sync for LockedMemory {}

/// [`DmaAllocator`] handing out [`LockedMemory`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LockedMemoryAllocator {
    mode: IovaMode,
}

impl LockedMemoryAllocator {
    /// Allocator producing addresses in `mode`.
    pub const fn new(mode: IovaMode) -> Self {
        Self { mode }
    }
}

impl DmaAllocator for LockedMemoryAllocator {
    fn allocate(&self, len: usize, align: usize) -> Result<Box<dyn DmaMemory>> {
        Ok(Box::new(LockedMemory::new(len, align, self.mode)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_va_mode_identity() {
        // mlock may be refused under a tight RLIMIT_MEMLOCK; nothing to check then
        let Ok(mem) = LockedMemory::new(4096, 4096, IovaMode::Va) else {
            println!("ℹ️  Skipping test (mlock unavailable)");
            return;
        };
        assert_eq!(mem.va(), mem.iova());
        assert_eq!(mem.va() % 4096, 0);
        assert_eq!(mem.len(), 4096);
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            LockedMemory::new(0, 4096, IovaMode::Va),
            Err(FpaError::OutOfMemory { size: 0 })
        ));
    }

    #[test]
    #[ignore] // Requires CAP_SYS_ADMIN to read PFNs
    fn test_pa_mode_resolves() {
        let mem = LockedMemory::new(4096, 4096, IovaMode::Pa).unwrap();
        assert_ne!(mem.iova(), 0);
        assert_eq!(mem.iova() % 4096, 0);
    }
}
