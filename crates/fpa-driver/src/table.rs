//! gpool slot table
//!
//! A fixed array of [`MAX_SLOTS`] slot descriptors behind one
//! `parking_lot::Mutex`. A slot moves through three independent facts:
//!
//! - **mapped**: VF identification stored a register window, domain and
//!   stack-line pointer count. This outlives any pool.
//! - **allocated**: `size_class != 0`. Set by [`Slots::allocate`], cleared by
//!   [`Slots::release`]. At most one allocation per slot.
//! - **in use**: the PF has accepted the pool configuration.

use crate::error::{FpaError, Result};
use crate::handle::PoolHandle;
use crate::memory::DmaMemory;
use crate::mmio::RegisterIo;
use fpa_chip::pool::{MAX_SLOTS, SLOT_MASK};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Domain id of a slot no VF has claimed.
pub const DOMAIN_UNASSIGNED: u16 = u16::MAX;

/// One gpool slot descriptor.
#[derive(Debug)]
pub struct Slot {
    index: usize,
    device: Option<Arc<dyn RegisterIo>>,
    domain_id: u16,
    stack_line_ptrs: u64,
    size_class: u32,
    stack: Option<Box<dyn DmaMemory>>,
    in_use: bool,
}

impl Slot {
    fn vacant(index: usize) -> Self {
        Self {
            index,
            device: None,
            domain_id: DOMAIN_UNASSIGNED,
            stack_line_ptrs: 0,
            size_class: 0,
            stack: None,
            in_use: false,
        }
    }

    /// Slot index (also the VF id and aura id).
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Register window, if a VF has been identified into this slot.
    pub fn device(&self) -> Option<&Arc<dyn RegisterIo>> {
        self.device.as_ref()
    }

    /// Base address of the register window.
    pub fn base_address(&self) -> Option<u64> {
        self.device.as_ref().map(|d| d.base_address())
    }

    /// Isolation domain, [`DOMAIN_UNASSIGNED`] until identified.
    pub const fn domain_id(&self) -> u16 {
        self.domain_id
    }

    /// Hardware-reported pointers per pool stack line; 0 until identified.
    pub const fn stack_line_ptrs(&self) -> u64 {
        self.stack_line_ptrs
    }

    /// Block size in cache lines; 0 when not allocated.
    pub const fn size_class(&self) -> u32 {
        self.size_class
    }

    /// Whether the PF-side configuration completed.
    pub const fn in_use(&self) -> bool {
        self.in_use
    }

    /// Whether the slot currently owns pool stack memory.
    pub fn has_stack(&self) -> bool {
        self.stack.is_some()
    }

    /// Mapped, identified and allocated: a handle to it can be used.
    pub fn is_configured(&self) -> bool {
        self.device.is_some()
            && self.domain_id != DOMAIN_UNASSIGNED
            && self.stack_line_ptrs != 0
            && self.size_class != 0
    }

    pub(crate) fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    pub(crate) fn attach_stack(&mut self, stack: Box<dyn DmaMemory>) {
        self.stack = Some(stack);
    }

    pub(crate) fn take_stack(&mut self) -> Option<Box<dyn DmaMemory>> {
        self.stack.take()
    }
}

/// The slot array; only reachable through [`SlotTable::lock`].
#[derive(Debug)]
pub struct Slots {
    slots: [Slot; MAX_SLOTS],
}

impl Slots {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(Slot::vacant),
        }
    }

    /// Descriptor of `index`.
    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    /// Iterate over all descriptors in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Claim the lowest-indexed mapped, unallocated slot for blocks of
    /// `size_class` cache lines.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] for a zero size class and
    /// [`FpaError::NoSpace`] when every slot is unmapped or taken.
    pub fn allocate(&mut self, size_class: u32) -> Result<usize> {
        if size_class == 0 {
            return Err(FpaError::invalid_argument("size class must be non-zero"));
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.device.is_some() && s.size_class == 0)
            .ok_or(FpaError::NoSpace)?;

        debug_assert_ne!(slot.domain_id, DOMAIN_UNASSIGNED);
        debug_assert_ne!(slot.stack_line_ptrs, 0);

        slot.size_class = size_class;
        tracing::debug!("gpool {} blk_sz {size_class}", slot.index);
        Ok(slot.index)
    }

    /// Return `index` to the free set. Mapping facts are kept.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidSlot`] if the slot is out of range or not
    /// allocated.
    pub fn release(&mut self, index: usize) -> Result<()> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.size_class != 0 => {
                slot.size_class = 0;
                tracing::debug!("gpool {index} released");
                Ok(())
            }
            _ => Err(FpaError::InvalidSlot { slot: index }),
        }
    }

    /// Record an identified VF in slot `index`.
    ///
    /// Returns `true` if the slot was newly mapped and `false` if it already
    /// held this window, in which case only the identity is refreshed.
    ///
    /// # Errors
    ///
    /// - [`FpaError::InvalidSlot`] if `index` is out of range
    /// - [`FpaError::AlreadyInUse`] if the slot holds a pool or another device
    /// - [`FpaError::InvalidArgument`] if the window address cannot be carried
    ///   in a handle, the domain is unassigned or the stack-line count is 0
    pub fn register(
        &mut self,
        index: usize,
        device: Arc<dyn RegisterIo>,
        domain_id: u16,
        stack_line_ptrs: u64,
    ) -> Result<bool> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(FpaError::InvalidSlot { slot: index })?;

        if slot.in_use || slot.size_class != 0 {
            return Err(FpaError::AlreadyInUse { slot: index });
        }
        let base = device.base_address();
        if slot.base_address().is_some_and(|old| old != base) {
            return Err(FpaError::AlreadyInUse { slot: index });
        }
        if base == 0 || base & SLOT_MASK != 0 {
            return Err(FpaError::invalid_argument(format!(
                "register window {base:#x} is not {}-byte aligned",
                SLOT_MASK + 1
            )));
        }
        if domain_id == DOMAIN_UNASSIGNED {
            return Err(FpaError::invalid_argument("domain id unassigned"));
        }
        if stack_line_ptrs == 0 {
            return Err(FpaError::invalid_argument("stack line pointer count is 0"));
        }

        let fresh = slot.device.is_none();
        slot.device = Some(device);
        slot.domain_id = domain_id;
        slot.stack_line_ptrs = stack_line_ptrs;
        Ok(fresh)
    }

    /// Forget every VF mapping.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AlreadyInUse`] for the first slot still allocated;
    /// nothing is changed then.
    pub(crate) fn unmap_all(&mut self) -> Result<()> {
        if let Some(busy) = self.slots.iter().find(|s| s.in_use || s.size_class != 0) {
            return Err(FpaError::AlreadyInUse { slot: busy.index });
        }
        self.slots = std::array::from_fn(Slot::vacant);
        Ok(())
    }

    /// Handle for slot `index`, or `None` if it is out of range or unmapped.
    pub fn handle(&self, index: usize) -> Option<PoolHandle> {
        let base = self.slots.get(index)?.base_address()?;
        PoolHandle::encode(base, index)
    }

    /// Whether `handle` names a configured slot.
    ///
    /// The slot whose window address equals the handle's address must also be
    /// the slot the handle's index names; a handle forged from a valid address
    /// and a foreign index fails.
    pub fn is_valid(&self, handle: PoolHandle) -> bool {
        let base = handle.base_address();
        self.slots
            .iter()
            .find(|s| s.base_address() == Some(base))
            .is_some_and(|s| s.index == handle.slot_index() && s.is_configured())
    }

    /// Descriptor behind a valid handle.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] if the handle is not valid.
    pub fn resolve(&self, handle: PoolHandle) -> Result<&Slot> {
        if !self.is_valid(handle) {
            return Err(FpaError::invalid_argument(format!("invalid pool handle {handle}")));
        }
        Ok(&self.slots[handle.slot_index()])
    }
}

/// Process-wide slot table.
#[derive(Debug)]
pub struct SlotTable {
    slots: Mutex<Slots>,
    identified: AtomicUsize,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotTable {
    /// Empty table: every slot unmapped.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::new()),
            identified: AtomicUsize::new(0),
        }
    }

    /// Lock the table for a sequence of mutations.
    pub fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock()
    }

    /// Whether `handle` names a configured slot.
    pub fn is_valid(&self, handle: PoolHandle) -> bool {
        self.slots.lock().is_valid(handle)
    }

    /// Number of VFs identified into the table.
    pub fn identified_count(&self) -> usize {
        self.identified.load(Ordering::Acquire)
    }

    pub(crate) fn note_identified(&self) -> usize {
        self.identified.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Unmap every slot and reset the identified count.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AlreadyInUse`] if a slot is still allocated.
    pub(crate) fn reset(&self) -> Result<()> {
        let mut slots = self.slots.lock();
        slots.unmap_all()?;
        self.identified.store(0, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedBar;

    fn mapped_table(n: usize) -> SlotTable {
        let table = SlotTable::new();
        {
            let mut slots = table.lock();
            for i in 0..n {
                let bar = Arc::new(EmulatedBar::new(EmulatedBar::base_for(i)));
                slots.register(i, bar, 1, 8).unwrap();
            }
        }
        table
    }

    #[test]
    fn test_first_fit_ascending() {
        let table = mapped_table(4);
        let mut slots = table.lock();
        assert_eq!(slots.allocate(1).unwrap(), 0);
        assert_eq!(slots.allocate(2).unwrap(), 1);
        slots.release(0).unwrap();
        assert_eq!(slots.allocate(3).unwrap(), 0);
        assert_eq!(slots.get(0).unwrap().size_class(), 3);
    }

    #[test]
    fn test_unmapped_slots_skipped() {
        let table = SlotTable::new();
        let mut slots = table.lock();
        let bar = Arc::new(EmulatedBar::new(EmulatedBar::base_for(9)));
        slots.register(9, bar, 1, 8).unwrap();
        assert_eq!(slots.allocate(1).unwrap(), 9);
        assert!(matches!(slots.allocate(1), Err(FpaError::NoSpace)));
    }

    #[test]
    fn test_exhaustion() {
        let table = mapped_table(MAX_SLOTS);
        let mut slots = table.lock();
        for _ in 0..MAX_SLOTS {
            slots.allocate(4).unwrap();
        }
        assert!(matches!(slots.allocate(4), Err(FpaError::NoSpace)));
    }

    #[test]
    fn test_double_release() {
        let table = mapped_table(1);
        let mut slots = table.lock();
        let idx = slots.allocate(1).unwrap();
        slots.release(idx).unwrap();
        assert!(matches!(slots.release(idx), Err(FpaError::InvalidSlot { .. })));
        assert!(matches!(slots.release(MAX_SLOTS), Err(FpaError::InvalidSlot { .. })));
    }

    #[test]
    fn test_release_keeps_mapping() {
        let table = mapped_table(1);
        let mut slots = table.lock();
        slots.allocate(1).unwrap();
        slots.release(0).unwrap();
        let slot = slots.get(0).unwrap();
        assert_eq!(slot.domain_id(), 1);
        assert_eq!(slot.stack_line_ptrs(), 8);
        assert_eq!(slot.base_address(), Some(EmulatedBar::base_for(0)));
    }

    #[test]
    fn test_register_busy_slot() {
        let table = mapped_table(1);
        let mut slots = table.lock();
        slots.allocate(1).unwrap();
        let bar = Arc::new(EmulatedBar::new(EmulatedBar::base_for(0)));
        assert!(matches!(
            slots.register(0, bar, 1, 8),
            Err(FpaError::AlreadyInUse { slot: 0 })
        ));
    }

    #[test]
    fn test_register_same_window_is_not_fresh() {
        let table = SlotTable::new();
        let mut slots = table.lock();
        let bar = Arc::new(EmulatedBar::new(EmulatedBar::base_for(0)));
        assert!(slots.register(0, bar.clone(), 1, 8).unwrap());
        assert!(!slots.register(0, bar, 2, 16).unwrap());
        let slot = slots.get(0).unwrap();
        assert_eq!(slot.domain_id(), 2);
        assert_eq!(slot.stack_line_ptrs(), 16);
    }

    #[test]
    fn test_register_other_device_rejected() {
        let table = mapped_table(1);
        let mut slots = table.lock();
        let bar = Arc::new(EmulatedBar::new(EmulatedBar::base_for(5)));
        assert!(matches!(
            slots.register(0, bar, 1, 8),
            Err(FpaError::AlreadyInUse { slot: 0 })
        ));
    }

    #[test]
    fn test_register_rejects_bad_identity() {
        let table = SlotTable::new();
        let mut slots = table.lock();
        let bar = Arc::new(EmulatedBar::new(EmulatedBar::base_for(0)));
        assert!(slots.register(0, bar.clone(), DOMAIN_UNASSIGNED, 8).is_err());
        assert!(slots.register(0, bar.clone(), 1, 0).is_err());
        let misaligned = Arc::new(EmulatedBar::new(EmulatedBar::base_for(0) | 1));
        assert!(slots.register(0, misaligned, 1, 8).is_err());
        assert!(slots.get(0).unwrap().device().is_none());
    }

    #[test]
    fn test_reset_refuses_busy_table() {
        let table = mapped_table(3);
        table.note_identified();
        let idx = table.lock().allocate(1).unwrap();
        assert!(matches!(table.reset(), Err(FpaError::AlreadyInUse { slot: 0 })));
        assert!(table.lock().get(1).unwrap().device().is_some());

        table.lock().release(idx).unwrap();
        table.reset().unwrap();
        assert_eq!(table.identified_count(), 0);
        assert!(table.lock().iter().all(|s| s.device().is_none()));
    }

    #[test]
    fn test_handle_validity_needs_allocation() {
        let table = mapped_table(2);
        let mut slots = table.lock();
        let handle = slots.handle(1).unwrap();
        assert!(!slots.is_valid(handle));
        slots.allocate(1).unwrap();
        assert!(!slots.is_valid(handle));
        slots.allocate(1).unwrap();
        assert!(slots.is_valid(handle));
        slots.release(1).unwrap();
        assert!(!slots.is_valid(handle));
    }

    #[test]
    fn test_forged_handle_rejected() {
        let table = mapped_table(2);
        let mut slots = table.lock();
        slots.allocate(1).unwrap();
        slots.allocate(1).unwrap();
        // slot 0's address with slot 1's index
        let forged = PoolHandle::encode(EmulatedBar::base_for(0), 1).unwrap();
        assert!(!slots.is_valid(forged));
        // unknown address
        let stray = PoolHandle::encode(0x7700_0000, 0).unwrap();
        assert!(!slots.is_valid(stray));
        // unmapped slot index
        assert!(slots.handle(5).is_none());
    }
}
