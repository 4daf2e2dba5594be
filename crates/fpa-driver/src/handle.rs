//! Opaque pool handles
//!
//! A handle is one machine word: the VF's register-window base address in
//! the high bits and the gpool slot in the low [`SLOT_MASK`] bits. Zero is
//! never a valid handle.
//!
//! Decoding is pure. Whether a handle still names a live pool is answered by
//! [`crate::table::SlotTable::is_valid`], which requires both the address and
//! the slot index to match the same table entry.

use fpa_chip::pool::{MAX_SLOTS, SLOT_MASK};
use std::num::NonZeroU64;

/// Caller-facing reference to an allocated pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(NonZeroU64);

impl PoolHandle {
    /// Pack `base_address` and `slot`.
    ///
    /// Returns `None` if the slot is out of range, the address is zero, or the
    /// address has bits set inside [`SLOT_MASK`].
    pub fn encode(base_address: u64, slot: usize) -> Option<Self> {
        if slot >= MAX_SLOTS || base_address & SLOT_MASK != 0 {
            return None;
        }
        NonZeroU64::new(base_address).map(|base| Self(base | slot as u64))
    }

    /// Rebuild a handle from its raw word; `None` for 0.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Raw word, for passing through foreign interfaces.
    pub const fn as_raw(self) -> u64 {
        self.0.get()
    }

    /// Slot index carried in the low bits.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn slot_index(self) -> usize {
        (self.0.get() & SLOT_MASK) as usize
    }

    /// Base address with the slot bits masked off.
    pub const fn base_address(self) -> u64 {
        self.0.get() & !SLOT_MASK
    }
}

impl std::fmt::Display for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}
