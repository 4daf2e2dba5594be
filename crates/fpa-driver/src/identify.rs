//! VF self-identification
//!
//! Before the PF configures anything, two registers of a freshly mapped VF
//! describe it: `VHAURA_CNT_THRESHOLD(0)` carries the domain and VF id, and
//! `VHPOOL_THRESHOLD(0)` the number of pointers per pool stack line.
//! Identification decodes them and records the VF in its slot. A failure
//! leaves only that VF unusable.

use crate::error::{FpaError, Result};
use crate::mmio::{read_reg, RegisterIo};
use crate::table::SlotTable;
use fpa_chip::pool::MAX_SLOTS;
use fpa_chip::regs::{identity, Register};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What a VF reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfIdentity {
    /// Isolation domain
    pub domain_id: u16,
    /// VF id, which is also its gpool slot
    pub vf_id: u16,
    /// Pointers per pool stack line
    pub stack_line_ptrs: u64,
}

impl VfIdentity {
    /// Read the identity registers of `device`.
    ///
    /// # Errors
    ///
    /// Returns the register access error.
    pub fn read(device: &dyn RegisterIo) -> Result<Self> {
        let word = read_reg(device, Register::AuraCountThreshold, 0)?;
        let (domain_id, vf_id) = identity::decode(word);
        let stack_line_ptrs = read_reg(device, Register::PoolThreshold, 0)?;
        Ok(Self {
            domain_id,
            vf_id,
            stack_line_ptrs,
        })
    }
}

/// Identify `device` and record it in `table`. Returns the slot index.
///
/// # Errors
///
/// - [`FpaError::InvalidSlot`] if the reported VF id is out of range
/// - [`FpaError::AlreadyInUse`] if the slot holds a live pool
/// - register access errors
pub fn identify_vf(table: &SlotTable, device: Arc<dyn RegisterIo>) -> Result<usize> {
    let id = VfIdentity::read(device.as_ref())?;
    let slot = usize::from(id.vf_id);

    if slot >= MAX_SLOTS {
        error!("vf_id({slot}) greater than max vf ({MAX_SLOTS})");
        return Err(FpaError::InvalidSlot { slot });
    }

    let base = device.base_address();
    let fresh = table
        .lock()
        .register(slot, device, id.domain_id, id.stack_line_ptrs)
        .inspect_err(|e| error!("vf_id {slot}: identification failed: {e}"))?;
    if !fresh {
        debug!("vf_id {slot}: bar0 {base:#x} already identified");
        return Ok(slot);
    }

    let total = table.note_identified();
    info!(
        "total_fpavfs {total} bar0 {base:#x} domain {} vf {slot} stk_ln_ptr {:#x}",
        id.domain_id, id.stack_line_ptrs
    );
    Ok(slot)
}
