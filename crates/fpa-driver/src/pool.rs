//! Pool lifecycle
//!
//! Creating a pool walks a fixed sequence of stages; each one leaves state
//! that must be undone if a later stage fails:
//!
//! ```text
//! Unallocated ─▶ SlotAllocated ─▶ PfConfigured ─▶ AuraAttached ─▶ VfProgrammed ─▶ Active
//!   claim slot     pool stack +      attach-aura      start/end and     commit,
//!                  configure-pool                     count registers   start-count
//! ```
//!
//! [`Creation`] records the stage reached. Dropping it before
//! [`Creation::commit`] runs [`Creation::unwind`], which undoes the completed
//! stages in reverse order and always releases the slot last. The table lock
//! is held only while the slot is claimed and while the finished pool is
//! committed; mailbox traffic and register programming touch only the claimed
//! slot and run unlocked.
//!
//! Until the commit the slot is allocated but not in use, so no other caller
//! can reach it. Once committed the pool belongs to the table and is never
//! unwound: start-count, the only later step, is logged on failure.

use crate::config::FpaConfig;
use crate::error::{FpaError, Result};
use crate::handle::PoolHandle;
use crate::identify::identify_vf;
use crate::mailbox::{DeviceCounts, MailboxClient, MboxTransport, PoolConfigMsg};
use crate::memory::{DmaAllocator, DmaMemory};
use crate::mmio::{read_reg, write_reg, RegisterIo};
use crate::table::SlotTable;
use fpa_chip::pool::{round_up, stack_bytes, PoolControl, AURA_CFG, LTYPE_LDT};
use fpa_chip::regs::Register;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const BUF_SIZE_LIMIT: usize = 0x7ff;
const BUF_OFFSET_LIMIT: usize = 0x7fff;

/// Stages of pool creation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolStage {
    /// Nothing claimed
    Unallocated,
    /// Slot claimed in the table
    SlotAllocated,
    /// Pool stack allocated and pool configured on the PF
    PfConfigured,
    /// Aura bound to the pool on the PF
    AuraAttached,
    /// Buffer range written to the VF registers
    VfProgrammed,
    /// Pool handed to the caller
    Active,
}

/// FPA VF resource core: slot table, mailbox client and stack allocator.
///
/// Construct one per process before attaching any VF. Dropping it disables
/// every pool still active.
pub struct FpaDev {
    table: SlotTable,
    mbox: MailboxClient,
    allocator: Arc<dyn DmaAllocator>,
    config: FpaConfig,
}

impl std::fmt::Debug for FpaDev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FpaDev")
            .field("identified", &self.table.identified_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Sizes derived from a create request.
#[derive(Debug, Clone, Copy)]
struct PoolGeometry {
    object_size: usize,
    object_count: usize,
    size_class: u32,
    pool_cfg: u64,
    region: u64,
    region_end: u64,
}

impl FpaDev {
    /// Create the resource core.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] if `config` does not validate.
    pub fn new(
        transport: Arc<dyn MboxTransport>,
        allocator: Arc<dyn DmaAllocator>,
        config: FpaConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table: SlotTable::new(),
            mbox: MailboxClient::new(transport),
            allocator,
            config,
        })
    }

    /// Identify a newly mapped VF and record it. Returns its slot index.
    ///
    /// # Errors
    ///
    /// See [`identify_vf`].
    pub fn attach(&self, device: Arc<dyn RegisterIo>) -> Result<usize> {
        identify_vf(&self.table, device)
    }

    /// Number of VFs identified so far.
    pub fn identified_count(&self) -> usize {
        self.table.identified_count()
    }

    /// Slot table, for inspection.
    pub const fn table(&self) -> &SlotTable {
        &self.table
    }

    /// Mailbox client.
    pub const fn mailbox(&self) -> &MailboxClient {
        &self.mbox
    }

    /// Active configuration.
    pub const fn config(&self) -> &FpaConfig {
        &self.config
    }

    /// Hardware units the PF assigned to this domain.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the request fails.
    pub fn resources(&self) -> Result<DeviceCounts> {
        self.mbox.identify()
    }

    fn geometry(
        &self,
        object_size: usize,
        object_count: u32,
        buf_offset: usize,
        region: u64,
    ) -> Result<PoolGeometry> {
        let line = self.config.cache_line;
        if object_size == 0 {
            return Err(FpaError::invalid_argument("object size is 0"));
        }
        if object_size > self.config.max_object_size {
            return Err(FpaError::invalid_argument(format!(
                "object size {object_size} exceeds {}",
                self.config.max_object_size
            )));
        }
        let object_size = round_up(object_size, line);
        if object_size > self.config.max_object_size {
            return Err(FpaError::invalid_argument(format!(
                "object size {object_size} exceeds {}",
                self.config.max_object_size
            )));
        }
        if object_count == 0 {
            return Err(FpaError::invalid_argument("object count is 0"));
        }
        if region == 0 {
            return Err(FpaError::invalid_argument("buffer region is null"));
        }
        let region_end = (object_size as u64)
            .checked_mul(u64::from(object_count))
            .and_then(|len| region.checked_add(len))
            .ok_or_else(|| {
                FpaError::invalid_argument(format!(
                    "{object_count} x {object_size} bytes at {region:#x} overflows the address space"
                ))
            })?
            & !(line as u64 - 1);
        let buf_size = object_size / line;
        let buf_offset = buf_offset / line;
        if buf_size > BUF_SIZE_LIMIT || buf_offset > BUF_OFFSET_LIMIT {
            return Err(FpaError::invalid_argument(format!(
                "buffer geometry {buf_size}/{buf_offset} lines does not fit POOL_CFG"
            )));
        }

        let pool_cfg = PoolControl {
            buf_size: buf_size as u64,
            buf_offset: buf_offset as u64,
            ltype: LTYPE_LDT,
            stype: 0,
            natural_align: self.config.natural_align,
            enable: true,
        }
        .bits();

        let size_class = u32::try_from(buf_size)
            .map_err(|_| FpaError::invalid_argument("object size overflows size class"))?;

        Ok(PoolGeometry {
            object_size,
            object_count: object_count as usize,
            size_class,
            pool_cfg,
            region,
            region_end,
        })
    }

    /// Create a pool of `object_count` objects of `object_size` bytes whose
    /// buffers live at `region`, each starting `buf_offset` bytes in.
    ///
    /// # Errors
    ///
    /// - [`FpaError::InvalidArgument`] for a zero or oversized object, a zero
    ///   count, a null region or one that runs past the address space
    /// - [`FpaError::NoSpace`] if no slot is free
    /// - [`FpaError::OutOfMemory`] if the pool stack cannot be allocated
    /// - [`FpaError::AccessDenied`] if the PF rejects configure-pool or attach-aura
    /// - [`FpaError::NoDevice`] if the VF registers cannot be programmed
    ///
    /// Every error leaves the slot free and no memory held.
    pub fn create_pool(
        &self,
        object_size: usize,
        object_count: u32,
        buf_offset: usize,
        region: u64,
    ) -> Result<PoolHandle> {
        let geo = self.geometry(object_size, object_count, buf_offset, region)?;

        let mut creation = Creation::claim(self, geo.size_class)?;
        creation.configure_pf(&geo)?;
        creation.attach_aura()?;
        creation.program_vf(&geo)?;
        let handle = creation.commit()?;
        let slot = handle.slot_index();

        if let Err(e) = self.mbox.start_count(slot) {
            warn!("Could not start buffer counting for FPA pool {slot}: {e}; pool stays active");
        }
        info!(
            "gpool {slot}: {} x {} bytes at {region:#x}, handle {handle}",
            geo.object_count, geo.object_size
        );
        Ok(handle)
    }

    /// Tear down the pool behind `handle`.
    ///
    /// Buffer counting is stopped and the aura detached on a best-effort
    /// basis, the pool is disabled on the PF, then the pool stack is freed
    /// and the slot released whatever the PF answered.
    ///
    /// # Errors
    ///
    /// - [`FpaError::InvalidArgument`] if the handle is not an active pool
    /// - [`FpaError::AccessDenied`] if the PF rejected the disable request;
    ///   cleanup has still completed
    pub fn destroy_pool(&self, handle: PoolHandle) -> Result<()> {
        let (slot, stack) = {
            let mut slots = self.table.lock();
            let slot = slots.resolve(handle)?;
            if !slot.in_use() {
                return Err(FpaError::invalid_argument(format!("pool {handle} is not active")));
            }
            let index = slot.index();
            let desc = slots
                .get_mut(index)
                .ok_or(FpaError::InvalidSlot { slot: index })?;
            desc.set_in_use(false);
            (index, desc.take_stack())
        };

        if let Err(e) = self.mbox.stop_count(slot) {
            warn!("gpool {slot}: stop-count failed during destroy: {e}");
        }
        if let Err(e) = self.mbox.detach_aura(slot) {
            warn!("gpool {slot}: detach-aura failed during destroy: {e}");
        }
        let disabled = self.mbox.disable_pool(slot);
        if let Err(e) = &disabled {
            error!("gpool {slot}: disable failed, freeing pool stack anyway: {e}");
        }

        drop(stack);
        self.table.lock().release(slot)?;
        debug!("gpool {slot} destroyed");
        disabled
    }

    /// Whether `handle` names a configured pool.
    pub fn handle_is_valid(&self, handle: PoolHandle) -> bool {
        self.table.is_valid(handle)
    }

    /// Block size served by the pool, in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] if the handle is not valid.
    pub fn block_size_of(&self, handle: PoolHandle) -> Result<usize> {
        let slots = self.table.lock();
        let slot = slots.resolve(handle)?;
        Ok(slot.size_class() as usize * self.config.cache_line)
    }

    fn device_of(&self, handle: PoolHandle) -> Result<(usize, Arc<dyn RegisterIo>)> {
        let slots = self.table.lock();
        let slot = slots.resolve(handle)?;
        let device = slot
            .device()
            .cloned()
            .ok_or_else(|| FpaError::no_device(format!("gpool {} unmapped", slot.index())))?;
        Ok((slot.index(), device))
    }

    /// Buffers currently allocated from the pool's aura.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] for an invalid handle or the
    /// register access error.
    pub fn buffer_count(&self, handle: PoolHandle) -> Result<u64> {
        let (slot, device) = self.device_of(handle)?;
        read_reg(device.as_ref(), Register::AuraCount, slot)
    }

    /// Free buffers on the pool stack.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] for an invalid handle or the
    /// register access error.
    pub fn available_buffers(&self, handle: PoolHandle) -> Result<u64> {
        let (slot, device) = self.device_of(handle)?;
        read_reg(device.as_ref(), Register::PoolAvailable, slot)
    }

    /// Set the pool's aura level on the PF.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] for an invalid handle or
    /// [`FpaError::AccessDenied`] if the request fails.
    pub fn set_aura_level(&self, handle: PoolHandle, level: u32) -> Result<u32> {
        let (slot, _) = self.device_of(handle)?;
        self.mbox.set_aura_level(slot, level)
    }

    /// Read the pool's aura level from the PF.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] for an invalid handle or
    /// [`FpaError::AccessDenied`] if the request fails.
    pub fn aura_level(&self, handle: PoolHandle) -> Result<u32> {
        let (slot, _) = self.device_of(handle)?;
        self.mbox.aura_level(slot)
    }

    /// Read the pool's configuration back from the PF.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::InvalidArgument`] for an invalid handle or
    /// [`FpaError::AccessDenied`] if the request fails.
    pub fn pool_config(&self, handle: PoolHandle) -> Result<PoolConfigMsg> {
        let (slot, _) = self.device_of(handle)?;
        self.mbox.pool_config(slot)
    }

    /// Handles of all active pools.
    pub fn active_pools(&self) -> Vec<PoolHandle> {
        let slots = self.table.lock();
        slots
            .iter()
            .filter(|s| s.in_use())
            .filter_map(|s| slots.handle(s.index()))
            .collect()
    }

    /// Destroy every active pool.
    ///
    /// # Errors
    ///
    /// Returns the first destroy error after attempting all pools.
    pub fn shutdown(&self) -> Result<()> {
        let mut first = None;
        for handle in self.active_pools() {
            if let Err(e) = self.destroy_pool(handle) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Forget every attached VF. All pools must be destroyed first.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AlreadyInUse`] naming the first slot that still
    /// holds a pool.
    pub fn teardown(&self) -> Result<()> {
        self.table.reset()?;
        info!("FPA resource core torn down");
        Ok(())
    }
}

impl Drop for FpaDev {
    fn drop(&mut self) {
        let live = self.active_pools().len();
        if live > 0 {
            warn!("Dropping FPA with {live} active pool(s); disabling them");
            if let Err(e) = self.shutdown() {
                error!("FPA shutdown incomplete: {e}");
            }
        }
    }
}

/// An in-progress pool creation.
struct Creation<'a> {
    dev: &'a FpaDev,
    slot: usize,
    stage: PoolStage,
    device: Arc<dyn RegisterIo>,
    handle: PoolHandle,
    stack: Option<Box<dyn DmaMemory>>,
}

impl<'a> Creation<'a> {
    /// Claim a slot (Unallocated → SlotAllocated).
    fn claim(dev: &'a FpaDev, size_class: u32) -> Result<Self> {
        let mut slots = dev.table.lock();
        let slot = slots.allocate(size_class)?;

        let claimed = slots
            .handle(slot)
            .filter(|h| slots.is_valid(*h))
            .zip(slots.get(slot).and_then(|s| s.device().cloned()));
        let Some((handle, device)) = claimed else {
            error!("gpool {slot}: table entry inconsistent after allocation");
            slots.release(slot)?;
            return Err(FpaError::NoSpace);
        };
        drop(slots);

        Ok(Self {
            dev,
            slot,
            stage: PoolStage::SlotAllocated,
            device,
            handle,
            stack: None,
        })
    }

    /// Allocate the pool stack and configure the pool (→ PfConfigured).
    fn configure_pf(&mut self, geo: &PoolGeometry) -> Result<()> {
        let stack_line_ptrs = self
            .dev
            .table
            .lock()
            .get(self.slot)
            .map_or(0, |s| s.stack_line_ptrs());
        let config = &self.dev.config;
        let stack_line_ptrs = usize::try_from(stack_line_ptrs).map_err(|_| {
            FpaError::no_device(format!("gpool {} reports {stack_line_ptrs} stack line pointers", self.slot))
        })?;
        let len = stack_bytes(geo.object_count, stack_line_ptrs, config.stack_page_size);
        if len == 0 {
            return Err(FpaError::no_device(format!("gpool {} not identified", self.slot)));
        }

        let stack = self.dev.allocator.allocate(len, config.stack_page_size)?;
        let msg = PoolConfigMsg::new(
            0,
            geo.pool_cfg,
            stack.iova(),
            stack.iova() + len as u64,
            AURA_CFG,
        );
        // a failed request drops `stack` here, before unwinding the slot
        self.dev.mbox.configure_pool(self.slot, &msg)?;

        debug!(
            "gpool {} aid {} pool_cfg {:#x} pool_stack_base {:#x} pool_stack_end {:#x} aura_cfg {:#x}",
            self.slot, msg.aid, msg.pool_cfg, msg.stack_base, msg.stack_end, msg.aura_cfg
        );
        self.stack = Some(stack);
        self.stage = PoolStage::PfConfigured;
        Ok(())
    }

    /// Bind the slot's aura to its pool (→ AuraAttached).
    fn attach_aura(&mut self) -> Result<()> {
        self.dev.mbox.attach_aura(self.slot)?;
        self.stage = PoolStage::AuraAttached;
        Ok(())
    }

    /// Write the buffer range and aura count registers (→ VfProgrammed).
    fn program_vf(&mut self, geo: &PoolGeometry) -> Result<()> {
        if !self.dev.table.is_valid(self.handle) {
            return Err(FpaError::no_device(format!("gpool {} handle went stale", self.slot)));
        }
        let io = self.device.as_ref();
        let count = geo.object_count as u64;
        write_reg(io, Register::PoolStartAddr, self.slot, geo.region)
            .and_then(|()| write_reg(io, Register::PoolEndAddr, self.slot, geo.region_end))
            .and_then(|()| write_reg(io, Register::AuraCount, self.slot, count))
            .and_then(|()| write_reg(io, Register::AuraCountLimit, self.slot, count))
            .and_then(|()| write_reg(io, Register::AuraCountThreshold, self.slot, count + 1))
            .map_err(|e| FpaError::no_device(format!("gpool {} programming failed: {e}", self.slot)))?;

        self.stage = PoolStage::VfProgrammed;
        Ok(())
    }

    /// Hand the pool stack to the slot and mark it in use (→ Active).
    fn commit(mut self) -> Result<PoolHandle> {
        let mut slots = self.dev.table.lock();
        let slot = slots
            .get_mut(self.slot)
            .ok_or(FpaError::InvalidSlot { slot: self.slot })?;
        if let Some(stack) = self.stack.take() {
            slot.attach_stack(stack);
        }
        slot.set_in_use(true);
        self.stage = PoolStage::Active;
        Ok(self.handle)
    }

    /// Undo every completed stage, newest first, releasing the slot last.
    fn unwind(&mut self) {
        let slot = self.slot;
        warn!("gpool {slot}: creation failed at {:?}, unwinding", self.stage);
        while self.stage > PoolStage::Unallocated {
            match self.stage {
                // VF registers are private to the slot and rewritten by the
                // next creation
                PoolStage::Active | PoolStage::VfProgrammed | PoolStage::Unallocated => {}
                PoolStage::AuraAttached => {
                    if let Err(e) = self.dev.mbox.detach_aura(slot) {
                        error!("gpool {slot}: detach-aura during unwind failed: {e}");
                    }
                }
                PoolStage::PfConfigured => {
                    if let Err(e) = self.dev.mbox.disable_pool(slot) {
                        error!("gpool {slot}: disable during unwind failed: {e}");
                    }
                    self.stack = None;
                }
                PoolStage::SlotAllocated => {
                    if let Err(e) = self.dev.table.lock().release(slot) {
                        error!("gpool {slot}: release during unwind failed: {e}");
                    }
                }
            }
            self.stage = self.stage.previous();
        }
    }
}

impl PoolStage {
    const fn previous(self) -> Self {
        match self {
            Self::Unallocated | Self::SlotAllocated => Self::Unallocated,
            Self::PfConfigured => Self::SlotAllocated,
            Self::AuraAttached => Self::PfConfigured,
            Self::VfProgrammed => Self::AuraAttached,
            Self::Active => Self::VfProgrammed,
        }
    }
}

impl Drop for Creation<'_> {
    fn drop(&mut self) {
        if self.stage != PoolStage::Active {
            self.unwind();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::{EmulatedBar, EmulatedPf, TrackingAllocator};
    use fpa_chip::mbox::Opcode;

    const REGION: u64 = 0x10_0000_0000;

    struct Fixture {
        dev: FpaDev,
        pf: Arc<EmulatedPf>,
        alloc: Arc<TrackingAllocator>,
        bars: Vec<Arc<EmulatedBar>>,
    }

    fn fixture(vfs: u16) -> Fixture {
        let pf = Arc::new(EmulatedPf::new());
        let alloc = Arc::new(TrackingAllocator::new());
        let dev = FpaDev::new(pf.clone(), alloc.clone(), FpaConfig::default()).unwrap();
        let bars = (0..vfs)
            .map(|vf| {
                let bar = Arc::new(EmulatedBar::vf(vf, 1, 8));
                dev.attach(bar.clone()).unwrap();
                bar
            })
            .collect();
        Fixture { dev, pf, alloc, bars }
    }

    fn ops(pf: &EmulatedPf) -> Vec<Opcode> {
        pf.messages().iter().map(|m| m.op).collect()
    }

    #[test]
    fn test_geometry_rounding() {
        let f = fixture(0);
        let geo = f.dev.geometry(100, 10, 128, REGION).unwrap();
        assert_eq!(geo.object_size, 128);
        assert_eq!(geo.size_class, 1);
        let cfg = PoolControl::from_bits(geo.pool_cfg);
        assert_eq!(cfg.buf_size, 1);
        assert_eq!(cfg.buf_offset, 1);
        assert_eq!(cfg.ltype, LTYPE_LDT);
        assert!(cfg.natural_align && cfg.enable);
    }

    #[test]
    fn test_geometry_rejects() {
        let f = fixture(0);
        assert!(f.dev.geometry(0, 10, 0, REGION).is_err());
        assert!(f.dev.geometry(128 * 1024 + 1, 10, 0, REGION).is_err());
        assert!(f.dev.geometry(128, 0, 0, REGION).is_err());
        assert!(f.dev.geometry(128, 10, 0, 0).is_err());
        assert!(f.dev.geometry(128 * 1024, 1, 0, REGION).is_ok());
    }

    #[test]
    fn test_geometry_rejects_usize_max_object() {
        let f = fixture(0);
        assert!(matches!(
            f.dev.geometry(usize::MAX, 1, 0, REGION),
            Err(FpaError::InvalidArgument { .. })
        ));
        assert!(matches!(
            f.dev.geometry(usize::MAX - 126, 1, 0, REGION),
            Err(FpaError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_huge_object_rejected_before_claim() {
        let f = fixture(1);
        assert!(matches!(
            f.dev.create_pool(usize::MAX, 10, 0, REGION),
            Err(FpaError::InvalidArgument { .. })
        ));
        assert!(f.pf.messages().is_empty());
        assert_eq!(f.alloc.total(), 0);
        assert_eq!(f.dev.table().lock().get(0).unwrap().size_class(), 0);
    }

    #[test]
    fn test_region_end_overflow_rejected_before_claim() {
        let f = fixture(1);
        assert!(matches!(
            f.dev.create_pool(128, 10, 0, u64::MAX - 255),
            Err(FpaError::InvalidArgument { .. })
        ));
        assert!(f.pf.messages().is_empty());
        assert_eq!(f.alloc.total(), 0);
        assert_eq!(f.bars[0].register(Register::PoolStartAddr, 0), 0);
        assert_eq!(f.dev.table().lock().get(0).unwrap().size_class(), 0);

        // the last region that still fits
        let top = u64::MAX - 1280;
        f.dev.create_pool(128, 10, 0, top).unwrap();
        assert_eq!(f.bars[0].register(Register::PoolEndAddr, 0), u64::MAX & !127);
    }

    #[test]
    fn test_create_sends_expected_messages() {
        let f = fixture(1);
        let handle = f.dev.create_pool(2048, 1000, 128, REGION).unwrap();
        assert_eq!(handle.slot_index(), 0);
        assert_eq!(f.alloc.live(), 1);
        assert_eq!(
            ops(&f.pf),
            [Opcode::ConfigSet, Opcode::AttachAura, Opcode::StartCount]
        );

        let cfg = f.pf.pool(0).unwrap();
        assert_eq!(cfg.aid, 0);
        assert_eq!(cfg.aura_cfg, AURA_CFG);
        // ceil(1000 / 8) = 125 lines -> 128 lines of 128 bytes
        assert_eq!(cfg.stack_end - cfg.stack_base, 16 * 1024);
        assert_eq!(PoolControl::from_bits(cfg.pool_cfg).buf_size, 16);
        assert!(f.pf.is_attached(0));
        assert!(f.pf.is_counting(0));
    }

    #[test]
    fn test_vf_registers_programmed() {
        let f = fixture(1);
        f.dev.create_pool(200, 10, 0, REGION + 5).unwrap();

        let bar = &f.bars[0];
        assert_eq!(bar.register(Register::PoolStartAddr, 0), REGION + 5);
        // 10 x 256 bytes, end masked to the cache line
        assert_eq!(
            bar.register(Register::PoolEndAddr, 0),
            (REGION + 5 + 2560) & !127
        );
        assert_eq!(bar.register(Register::AuraCount, 0), 10);
        assert_eq!(bar.register(Register::AuraCountLimit, 0), 10);
        assert_eq!(bar.register(Register::AuraCountThreshold, 0), 11);
    }

    #[test]
    fn test_null_region_rejected() {
        let f = fixture(1);
        assert!(matches!(
            f.dev.create_pool(128, 1, 0, 0),
            Err(FpaError::InvalidArgument { .. })
        ));
        assert!(f.pf.messages().is_empty());
    }

    #[test]
    fn test_start_count_failure_is_not_fatal() {
        let f = fixture(1);
        f.pf.fail_on(Opcode::StartCount, -1, 2);
        let handle = f.dev.create_pool(128, 64, 0, REGION).unwrap();
        assert!(f.dev.handle_is_valid(handle));
        assert_eq!(f.alloc.live(), 1);
        assert!(f.pf.pool(0).is_some());
        assert!(!f.pf.is_counting(0));
    }

    #[test]
    fn test_unwind_order_on_vf_failure() {
        let f = fixture(1);
        f.bars[0].fail_writes_to(Register::PoolEndAddr, 0);

        assert!(matches!(
            f.dev.create_pool(128, 64, 0, REGION),
            Err(FpaError::NoDevice { .. })
        ));
        assert_eq!(
            ops(&f.pf),
            [
                Opcode::ConfigSet,
                Opcode::AttachAura,
                Opcode::DetachAura,
                Opcode::ConfigSet
            ]
        );
        assert_eq!(f.alloc.live(), 0);
        assert_eq!(f.dev.table().lock().get(0).unwrap().size_class(), 0);
    }

    #[test]
    fn test_count_register_failure_unwinds_before_commit() {
        let f = fixture(1);
        f.bars[0].fail_writes_to(Register::AuraCountLimit, 0);

        assert!(matches!(
            f.dev.create_pool(128, 64, 0, REGION),
            Err(FpaError::NoDevice { .. })
        ));
        assert_eq!(
            ops(&f.pf),
            [
                Opcode::ConfigSet,
                Opcode::AttachAura,
                Opcode::DetachAura,
                Opcode::ConfigSet
            ]
        );
        assert_eq!(f.alloc.live(), 0);
        assert!(f.pf.pool(0).is_none());
        assert!(!f.pf.is_attached(0));
        let slots = f.dev.table().lock();
        let slot = slots.get(0).unwrap();
        assert!(!slot.in_use());
        assert!(!slot.has_stack());
        assert_eq!(slot.size_class(), 0);
    }

    #[test]
    fn test_destroy_requires_active_pool() {
        let f = fixture(1);
        let handle = f.dev.create_pool(128, 64, 0, REGION).unwrap();
        f.dev.destroy_pool(handle).unwrap();
        assert!(matches!(
            f.dev.destroy_pool(handle),
            Err(FpaError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_drop_disables_live_pools() {
        let f = fixture(2);
        f.dev.create_pool(128, 64, 0, REGION).unwrap();
        f.dev.create_pool(128, 64, 0, REGION).unwrap();
        let Fixture { dev, pf, alloc, .. } = f;
        drop(dev);
        assert_eq!(alloc.live(), 0);
        assert_eq!(pf.live_pools(), 0);
    }

    #[test]
    fn test_teardown_needs_empty_table() {
        let f = fixture(2);
        let handle = f.dev.create_pool(128, 64, 0, REGION).unwrap();
        assert!(matches!(
            f.dev.teardown(),
            Err(FpaError::AlreadyInUse { slot: 0 })
        ));
        f.dev.destroy_pool(handle).unwrap();
        f.dev.teardown().unwrap();
        assert_eq!(f.dev.identified_count(), 0);
        assert!(matches!(
            f.dev.create_pool(128, 64, 0, REGION),
            Err(FpaError::NoSpace)
        ));
        f.dev.attach(f.bars[0].clone()).unwrap();
        f.dev.create_pool(128, 64, 0, REGION).unwrap();
    }

    #[test]
    fn test_stage_order() {
        assert!(PoolStage::SlotAllocated < PoolStage::PfConfigured);
        assert_eq!(PoolStage::Active.previous(), PoolStage::VfProgrammed);
        assert_eq!(PoolStage::SlotAllocated.previous(), PoolStage::Unallocated);
    }
}
