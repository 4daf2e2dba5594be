//! Mailbox client for VF → PF requests
//!
//! The VF cannot configure pools itself; it asks the privileged PF over a
//! synchronous mailbox. This module defines the message layouts and the typed
//! calls. Moving the bytes is the job of an external [`MboxTransport`].
//!
//! ```text
//! VF                                   PF
//!  │  MboxHeader{coproc,msg,vfid} + payload ─▶│
//!  │◀─ MboxHeader{res_code} + response ───────│
//! ```
//!
//! No call is retried. A transport failure becomes [`FpaError::AccessDenied`]
//! carrying both the transport status and the PF result code.

use crate::error::{FpaError, Result};
use bytemuck::{Pod, Zeroable};
use fpa_chip::mbox::{Opcode, FPA_COPROC};
use fpa_chip::pool::MAX_SLOTS;
use std::sync::Arc;
use tracing::{debug, error};

/// Mailbox message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MboxHeader {
    /// Coprocessor tag
    pub coproc: u8,
    /// Raw opcode
    pub msg: u8,
    /// Target VF / gpool
    pub vfid: u16,
    /// PF functional result, filled in by the reply
    pub res_code: u8,
}

impl MboxHeader {
    /// Header for an FPA request targeting `vfid`.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(op: Opcode, vfid: usize) -> Self {
        Self {
            coproc: FPA_COPROC,
            msg: op as u8,
            vfid: vfid as u16,
            res_code: 0,
        }
    }

    /// Decoded opcode, if known.
    pub const fn opcode(&self) -> Option<Opcode> {
        Opcode::from_raw(self.msg)
    }
}

/// Configure-pool payload (also the config-get reply)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PoolConfigMsg {
    /// Aura id
    pub aid: i32,
    _reserved: u32,
    /// POOL_CFG word, see [`fpa_chip::pool::PoolControl`]
    pub pool_cfg: u64,
    /// Pool stack physical start
    pub stack_base: u64,
    /// Pool stack physical end
    pub stack_end: u64,
    /// Aura control word
    pub aura_cfg: u64,
}

impl PoolConfigMsg {
    /// Build a configure-pool payload.
    pub const fn new(aid: i32, pool_cfg: u64, stack_base: u64, stack_end: u64, aura_cfg: u64) -> Self {
        Self {
            aid,
            _reserved: 0,
            pool_cfg,
            stack_base,
            stack_end,
            aura_cfg,
        }
    }

    /// Payload naming only an aura.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub const fn aura(aid: usize) -> Self {
        Self::new(aid as i32, 0, 0, 0, 0)
    }

    /// All-zero payload: disables the pool.
    pub const fn disabled() -> Self {
        Self::new(0, 0, 0, 0, 0)
    }
}

/// Aura level request/reply
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct AuraLevel {
    /// Level value
    pub value: u32,
}

/// Identify reply: hardware units assigned to this domain
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceCounts {
    /// SSO groups
    pub sso: u8,
    /// SSO workslots
    pub ssow: u8,
    /// FPA VFs
    pub fpa: u8,
    /// PKO VFs
    pub pko: u8,
    /// Timer rings
    pub tim: u8,
    /// Network ports
    pub net_port: u8,
    /// Virtual ports
    pub virt_port: u8,
}

/// Byte-level mailbox transport (external collaborator)
///
/// Blocks until the PF replies. `Err` carries the negative transport status;
/// the PF result code is reported in `hdr.res_code` either way.
pub trait MboxTransport: Send + Sync {
    /// Send `request`, fill `response`, return the reply length.
    ///
    /// # Errors
    ///
    /// Returns the negative transport status on failure.
    fn send(
        &self,
        hdr: &mut MboxHeader,
        request: &[u8],
        response: &mut [u8],
    ) -> std::result::Result<usize, i32>;
}

/// Typed FPA mailbox calls over a shared transport
#[derive(Clone)]
pub struct MailboxClient {
    transport: Arc<dyn MboxTransport>,
}

impl std::fmt::Debug for MailboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxClient").finish_non_exhaustive()
    }
}

impl MailboxClient {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn MboxTransport>) -> Self {
        Self { transport }
    }

    fn call(&self, op: Opcode, slot: usize, request: &[u8], response: &mut [u8]) -> Result<usize> {
        if slot >= MAX_SLOTS {
            return Err(FpaError::InvalidSlot { slot });
        }
        let mut hdr = MboxHeader::new(op, slot);
        match self.transport.send(&mut hdr, request, response) {
            Ok(len) => {
                debug!("mbox {op} gpool {slot}: ok, {len} byte reply, res_code {}", hdr.res_code);
                Ok(len)
            }
            Err(status) => {
                error!(
                    "mbox {op} gpool {slot} failed. Err={status}. FuncErr={}",
                    hdr.res_code
                );
                Err(FpaError::AccessDenied {
                    op,
                    status,
                    result_code: hdr.res_code,
                })
            }
        }
    }

    /// Ask the PF which hardware units this domain owns.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the request fails.
    pub fn identify(&self) -> Result<DeviceCounts> {
        let mut counts = DeviceCounts::zeroed();
        self.call(Opcode::Identify, 0, &[], bytemuck::bytes_of_mut(&mut counts))?;
        Ok(counts)
    }

    /// Configure gpool `slot` on the PF.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the PF rejects the request.
    pub fn configure_pool(&self, slot: usize, cfg: &PoolConfigMsg) -> Result<()> {
        self.call(Opcode::ConfigSet, slot, bytemuck::bytes_of(cfg), &mut [])?;
        Ok(())
    }

    /// Send a zeroed configure-pool, disabling gpool `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the PF rejects the request.
    pub fn disable_pool(&self, slot: usize) -> Result<()> {
        self.configure_pool(slot, &PoolConfigMsg::disabled())
    }

    /// Read back gpool `slot`'s configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the request fails.
    pub fn pool_config(&self, slot: usize) -> Result<PoolConfigMsg> {
        let request = PoolConfigMsg::aura(slot);
        let mut reply = PoolConfigMsg::zeroed();
        self.call(
            Opcode::ConfigGet,
            slot,
            bytemuck::bytes_of(&request),
            bytemuck::bytes_of_mut(&mut reply),
        )?;
        Ok(reply)
    }

    /// Start aura buffer counting.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the request fails.
    pub fn start_count(&self, slot: usize) -> Result<()> {
        self.call(Opcode::StartCount, slot, &[], &mut [])?;
        Ok(())
    }

    /// Stop aura buffer counting.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the request fails.
    pub fn stop_count(&self, slot: usize) -> Result<()> {
        self.call(Opcode::StopCount, slot, &[], &mut [])?;
        Ok(())
    }

    /// Bind aura `slot` to gpool `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the PF rejects the request.
    pub fn attach_aura(&self, slot: usize) -> Result<()> {
        let cfg = PoolConfigMsg::aura(slot);
        self.call(Opcode::AttachAura, slot, bytemuck::bytes_of(&cfg), &mut [])?;
        Ok(())
    }

    /// Unbind aura `slot` from its gpool.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the PF rejects the request.
    pub fn detach_aura(&self, slot: usize) -> Result<()> {
        let cfg = PoolConfigMsg::aura(slot);
        self.call(Opcode::DetachAura, slot, bytemuck::bytes_of(&cfg), &mut [])?;
        Ok(())
    }

    /// Set the level of aura `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the request fails.
    pub fn set_aura_level(&self, slot: usize, value: u32) -> Result<u32> {
        let request = AuraLevel { value };
        let mut reply = AuraLevel::zeroed();
        self.call(
            Opcode::SetAuraLevel,
            slot,
            bytemuck::bytes_of(&request),
            bytemuck::bytes_of_mut(&mut reply),
        )?;
        Ok(reply.value)
    }

    /// Read the level of aura `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::AccessDenied`] if the request fails.
    pub fn aura_level(&self, slot: usize) -> Result<u32> {
        let mut reply = AuraLevel::zeroed();
        self.call(
            Opcode::GetAuraLevel,
            slot,
            &[],
            bytemuck::bytes_of_mut(&mut reply),
        )?;
        Ok(reply.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulated::EmulatedPf;

    #[test]
    fn test_pool_config_layout() {
        assert_eq!(std::mem::size_of::<PoolConfigMsg>(), 40);
        assert_eq!(std::mem::size_of::<DeviceCounts>(), 7);
        assert!(bytemuck::bytes_of(&PoolConfigMsg::disabled()).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_header_tags_fpa() {
        let hdr = MboxHeader::new(Opcode::AttachAura, 5);
        assert_eq!(hdr.coproc, FPA_COPROC);
        assert_eq!(hdr.opcode(), Some(Opcode::AttachAura));
        assert_eq!(hdr.vfid, 5);
    }

    #[test]
    fn test_failure_surfaces_both_codes() {
        let pf = Arc::new(EmulatedPf::new());
        pf.fail_on(Opcode::AttachAura, -13, 7);
        let client = MailboxClient::new(pf.clone());
        match client.attach_aura(2) {
            Err(FpaError::AccessDenied {
                op,
                status,
                result_code,
            }) => {
                assert_eq!(op, Opcode::AttachAura);
                assert_eq!(status, -13);
                assert_eq!(result_code, 7);
            }
            other => panic!("expected AccessDenied, got {other:?}"),
        }
        // no retry
        assert_eq!(pf.count(Opcode::AttachAura), 1);
    }

    #[test]
    fn test_out_of_range_slot_not_sent() {
        let pf = Arc::new(EmulatedPf::new());
        let client = MailboxClient::new(pf.clone());
        assert!(matches!(
            client.start_count(MAX_SLOTS),
            Err(FpaError::InvalidSlot { .. })
        ));
        assert_eq!(pf.messages().len(), 0);
    }

    #[test]
    fn test_aura_level_roundtrip() {
        let pf = Arc::new(EmulatedPf::new());
        let client = MailboxClient::new(pf);
        client.set_aura_level(4, 77).unwrap();
        assert_eq!(client.aura_level(4).unwrap(), 77);
        assert_eq!(client.aura_level(5).unwrap(), 0);
    }

    #[test]
    fn test_identify_counts() {
        let pf = Arc::new(EmulatedPf::new());
        let client = MailboxClient::new(pf);
        let counts = client.identify().unwrap();
        assert_eq!(usize::from(counts.fpa), MAX_SLOTS);
    }
}
