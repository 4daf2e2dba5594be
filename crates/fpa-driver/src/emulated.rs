//! In-memory stand-ins for the FPA VF, the PF mailbox and pool stack memory
//!
//! Used by the unit and integration tests and by `fpa simulate`. Each
//! emulation can be told to fail specific operations so rollback paths can be
//! driven deterministically.

use crate::error::{FpaError, Result};
use crate::mailbox::{AuraLevel, DeviceCounts, MboxHeader, MboxTransport, PoolConfigMsg};
use crate::memory::{DmaAllocator, DmaMemory};
use crate::mmio::{read_reg, RegisterIo};
use bytemuck::Zeroable;
use fpa_chip::mbox::Opcode;
use fpa_chip::pool::MAX_SLOTS;
use fpa_chip::regs::{identity, Register, WINDOW_SIZE};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const EMULATED_BAR_BASE: u64 = 0x8_4000_0000;

/// A VF register window backed by a map of written values.
///
/// Unwritten registers read as 0.
#[derive(Debug)]
pub struct EmulatedBar {
    base: u64,
    regs: Mutex<HashMap<usize, u64>>,
    failing_writes: Mutex<HashSet<usize>>,
}

impl EmulatedBar {
    /// Empty window at `base`.
    pub fn new(base: u64) -> Self {
        Self {
            base,
            regs: Mutex::new(HashMap::new()),
            failing_writes: Mutex::new(HashSet::new()),
        }
    }

    /// Distinct, suitably aligned window address for VF `index`.
    pub const fn base_for(index: usize) -> u64 {
        EMULATED_BAR_BASE + (index * WINDOW_SIZE) as u64
    }

    /// Window for VF `vf_id` with its identity registers preset, as the PF
    /// leaves them before the VF is probed.
    pub fn vf(vf_id: u16, domain_id: u16, stack_line_ptrs: u64) -> Self {
        let bar = Self::new(Self::base_for(usize::from(vf_id)));
        bar.preset(Register::AuraCountThreshold, 0, identity::encode(domain_id, vf_id));
        bar.preset(Register::PoolThreshold, 0, stack_line_ptrs);
        bar
    }

    /// Store `value` in register `reg` of `slot` without going through
    /// [`RegisterIo::write64`].
    pub fn preset(&self, reg: Register, slot: usize, value: u64) {
        if let Some(offset) = fpa_chip::regs::offset(reg, slot) {
            self.regs.lock().insert(offset, value);
        }
    }

    /// Current value of register `reg` of `slot`.
    pub fn register(&self, reg: Register, slot: usize) -> u64 {
        read_reg(self, reg, slot).unwrap_or(0)
    }

    /// Make every later write to `offset` fail.
    pub fn fail_writes_at(&self, offset: usize) {
        self.failing_writes.lock().insert(offset);
    }

    /// Make every later write to register `reg` of `slot` fail.
    pub fn fail_writes_to(&self, reg: Register, slot: usize) {
        if let Some(offset) = fpa_chip::regs::offset(reg, slot) {
            self.fail_writes_at(offset);
        }
    }

    /// Remove all injected write failures.
    pub fn clear_failures(&self) {
        self.failing_writes.lock().clear();
    }

    fn check(offset: usize) -> Result<()> {
        if offset % 8 != 0 || offset + 8 > WINDOW_SIZE {
            return Err(FpaError::no_device(format!(
                "offset {offset:#x} outside emulated window"
            )));
        }
        Ok(())
    }
}

impl RegisterIo for EmulatedBar {
    fn base_address(&self) -> u64 {
        self.base
    }

    fn read64(&self, offset: usize) -> Result<u64> {
        Self::check(offset)?;
        Ok(self.regs.lock().get(&offset).copied().unwrap_or(0))
    }

    fn write64(&self, offset: usize, value: u64) -> Result<()> {
        Self::check(offset)?;
        if self.failing_writes.lock().contains(&offset) {
            return Err(std::io::Error::other(format!("injected write fault at {offset:#x}")).into());
        }
        self.regs.lock().insert(offset, value);
        Ok(())
    }
}

/// One request seen by [`EmulatedPf`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Decoded opcode
    pub op: Opcode,
    /// Target gpool
    pub vfid: u16,
    /// Request payload
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct PfState {
    messages: Vec<Message>,
    failures: HashMap<Opcode, (i32, u8)>,
    pools: HashMap<u16, PoolConfigMsg>,
    attached: HashSet<u16>,
    counting: HashSet<u16>,
    levels: HashMap<u16, u32>,
}

/// A PF that accepts every request unless told otherwise.
///
/// Tracks configured pools, attached auras, counting state and aura levels so
/// tests can check what a rollback left behind.
#[derive(Debug, Default)]
pub struct EmulatedPf {
    state: Mutex<PfState>,
}

impl EmulatedPf {
    /// PF with no pools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every later `op` with transport `status` and PF `res_code`.
    pub fn fail_on(&self, op: Opcode, status: i32, res_code: u8) {
        self.state.lock().failures.insert(op, (status, res_code));
    }

    /// Stop failing `op`.
    pub fn succeed_on(&self, op: Opcode) {
        self.state.lock().failures.remove(&op);
    }

    /// Requests received so far, in order.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    /// Number of `op` requests received.
    pub fn count(&self, op: Opcode) -> usize {
        self.state.lock().messages.iter().filter(|m| m.op == op).count()
    }

    /// Enabled configuration of gpool `slot`.
    pub fn pool(&self, slot: usize) -> Option<PoolConfigMsg> {
        let slot = u16::try_from(slot).ok()?;
        self.state.lock().pools.get(&slot).copied()
    }

    /// Whether aura `slot` is attached.
    pub fn is_attached(&self, slot: usize) -> bool {
        u16::try_from(slot).is_ok_and(|s| self.state.lock().attached.contains(&s))
    }

    /// Whether buffer counting runs on aura `slot`.
    pub fn is_counting(&self, slot: usize) -> bool {
        u16::try_from(slot).is_ok_and(|s| self.state.lock().counting.contains(&s))
    }

    /// Gpools with an enabled configuration.
    pub fn live_pools(&self) -> usize {
        self.state.lock().pools.len()
    }
}

fn fill<T: bytemuck::Pod>(response: &mut [u8], value: &T) -> usize {
    let bytes = bytemuck::bytes_of(value);
    let len = bytes.len().min(response.len());
    response[..len].copy_from_slice(&bytes[..len]);
    len
}

impl MboxTransport for EmulatedPf {
    fn send(
        &self,
        hdr: &mut MboxHeader,
        request: &[u8],
        response: &mut [u8],
    ) -> std::result::Result<usize, i32> {
        let op = hdr.opcode().ok_or(-libc::EINVAL)?;
        let vfid = hdr.vfid;
        let mut state = self.state.lock();
        state.messages.push(Message {
            op,
            vfid,
            payload: request.to_vec(),
        });

        if let Some(&(status, res_code)) = state.failures.get(&op) {
            hdr.res_code = res_code;
            return Err(status);
        }
        hdr.res_code = 0;

        let len = match op {
            Opcode::Identify => {
                #[allow(clippy::cast_possible_truncation)]
                let counts = DeviceCounts {
                    fpa: MAX_SLOTS as u8,
                    ..DeviceCounts::zeroed()
                };
                fill(response, &counts)
            }
            Opcode::ConfigSet => {
                let cfg: PoolConfigMsg =
                    bytemuck::try_pod_read_unaligned(request).map_err(|_| -libc::EINVAL)?;
                if cfg == PoolConfigMsg::disabled() {
                    state.pools.remove(&vfid);
                } else {
                    state.pools.insert(vfid, cfg);
                }
                0
            }
            Opcode::ConfigGet => {
                let cfg = state.pools.get(&vfid).copied().unwrap_or_default();
                fill(response, &cfg)
            }
            Opcode::StartCount => {
                state.counting.insert(vfid);
                0
            }
            Opcode::StopCount => {
                state.counting.remove(&vfid);
                0
            }
            Opcode::AttachAura => {
                state.attached.insert(vfid);
                0
            }
            Opcode::DetachAura => {
                state.attached.remove(&vfid);
                0
            }
            Opcode::SetAuraLevel => {
                let level: AuraLevel =
                    bytemuck::try_pod_read_unaligned(request).map_err(|_| -libc::EINVAL)?;
                state.levels.insert(vfid, level.value);
                fill(response, &level)
            }
            Opcode::GetAuraLevel => {
                let value = state.levels.get(&vfid).copied().unwrap_or(0);
                fill(response, &AuraLevel { value })
            }
        };
        Ok(len)
    }
}

/// Heap block standing in for pinned memory.
#[derive(Debug)]
pub struct HeapMemory {
    buf: Vec<u8>,
    live: Arc<AtomicUsize>,
}

impl DmaMemory for HeapMemory {
    fn va(&self) -> u64 {
        self.buf.as_ptr() as u64
    }

    fn iova(&self) -> u64 {
        self.va()
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

impl Drop for HeapMemory {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Allocator that counts outstanding blocks and can be made to fail.
#[derive(Debug, Default)]
pub struct TrackingAllocator {
    live: Arc<AtomicUsize>,
    total: AtomicUsize,
    failing: AtomicBool,
}

impl TrackingAllocator {
    /// Allocator with nothing outstanding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks allocated and not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Blocks handed out since creation.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Refuse (or resume) allocations.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }
}

impl DmaAllocator for TrackingAllocator {
    fn allocate(&self, len: usize, _align: usize) -> Result<Box<dyn DmaMemory>> {
        if len == 0 || self.failing.load(Ordering::Acquire) {
            return Err(FpaError::OutOfMemory { size: len });
        }
        self.live.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(HeapMemory {
            buf: vec![0; len],
            live: Arc::clone(&self.live),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::write_reg;
    use fpa_chip::pool::SLOT_MASK;

    #[test]
    fn test_bases_distinct_and_aligned() {
        let a = EmulatedBar::base_for(0);
        let b = EmulatedBar::base_for(31);
        assert_ne!(a, b);
        assert_eq!(a & SLOT_MASK, 0);
        assert_eq!(EmulatedBar::base_for(40) & SLOT_MASK, 0);
    }

    #[test]
    fn test_bar_write_fault() {
        let bar = EmulatedBar::new(EmulatedBar::base_for(0));
        write_reg(&bar, Register::PoolStartAddr, 2, 0x1000).unwrap();
        assert_eq!(bar.register(Register::PoolStartAddr, 2), 0x1000);

        bar.fail_writes_to(Register::PoolStartAddr, 2);
        assert!(write_reg(&bar, Register::PoolStartAddr, 2, 0x2000).is_err());
        assert_eq!(bar.register(Register::PoolStartAddr, 2), 0x1000);

        bar.clear_failures();
        write_reg(&bar, Register::PoolStartAddr, 2, 0x2000).unwrap();
    }

    #[test]
    fn test_bar_rejects_out_of_window() {
        let bar = EmulatedBar::new(EmulatedBar::base_for(0));
        assert!(bar.read64(WINDOW_SIZE).is_err());
        assert!(bar.write64(3, 0).is_err());
    }

    #[test]
    fn test_pf_tracks_pools() {
        let pf = EmulatedPf::new();
        let cfg = PoolConfigMsg::new(0, 1, 0x1000, 0x2000, 0);
        let mut hdr = MboxHeader::new(Opcode::ConfigSet, 3);
        pf.send(&mut hdr, bytemuck::bytes_of(&cfg), &mut []).unwrap();
        assert_eq!(pf.pool(3), Some(cfg));

        let off = PoolConfigMsg::disabled();
        pf.send(&mut hdr, bytemuck::bytes_of(&off), &mut []).unwrap();
        assert_eq!(pf.pool(3), None);
        assert_eq!(pf.count(Opcode::ConfigSet), 2);
    }

    #[test]
    fn test_allocator_counts_drops() {
        let alloc = TrackingAllocator::new();
        let a = alloc.allocate(4096, 4096).unwrap();
        let b = alloc.allocate(8192, 4096).unwrap();
        assert_eq!(alloc.live(), 2);
        drop(a);
        assert_eq!(alloc.live(), 1);
        assert_eq!(b.len(), 8192);

        alloc.set_failing(true);
        assert!(matches!(
            alloc.allocate(4096, 4096),
            Err(FpaError::OutOfMemory { size: 4096 })
        ));
        assert_eq!(alloc.total(), 2);
    }
}
