//! VF BAR0 register map for the FPA.
//!
//! Every VF owns one vhpool and one vhaura. The vhpool registers sit at fixed
//! offsets; the vhaura registers are banked by aura number in bits 18..21.
//!
//! ```text
//! 0x04150  VHPOOL_AVAILABLE       free buffers on the pool stack
//! 0x04160  VHPOOL_THRESHOLD       reads stack-line pointer count at reset
//! 0x04200  VHPOOL_START_ADDR      lowest buffer address
//! 0x04210  VHPOOL_END_ADDR        highest buffer address
//! 0x20120  VHAURA_CNT(a)          buffers currently allocated from aura a
//! 0x20128  VHAURA_CNT_ADD(a)      atomic add to VHAURA_CNT
//! 0x20130  VHAURA_CNT_LIMIT(a)    allocation limit
//! 0x20140  VHAURA_CNT_THRESHOLD(a) threshold; reads identity at reset
//! ```

use crate::pool::MAX_SLOTS;

// ── vhpool ───────────────────────────────────────────────────────────────────

/// Free buffers currently on the pool stack.
pub const VHPOOL_AVAILABLE: usize = 0x04150;
/// Pool threshold. Before configuration it reports the stack-line pointer count.
pub const VHPOOL_THRESHOLD: usize = 0x04160;
/// Buffer range start address.
pub const VHPOOL_START_ADDR: usize = 0x04200;
/// Buffer range end address.
pub const VHPOOL_END_ADDR: usize = 0x04210;

// ── vhaura ───────────────────────────────────────────────────────────────────

/// Aura buffer count.
pub const VHAURA_CNT: usize = 0x20120;
/// Aura buffer count atomic add.
pub const VHAURA_CNT_ADD: usize = 0x20128;
/// Aura buffer count limit.
pub const VHAURA_CNT_LIMIT: usize = 0x20130;
/// Aura buffer count threshold. Before configuration it reports the VF identity.
pub const VHAURA_CNT_THRESHOLD: usize = 0x20140;

const VHAURA_SHIFT: u32 = 18;
const VHAURA_MASK: usize = 0xf;

/// Size of the register window the driver touches.
pub const WINDOW_SIZE: usize = 0x40_0000;

/// Named VF registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// [`VHPOOL_AVAILABLE`]
    PoolAvailable,
    /// [`VHPOOL_THRESHOLD`]
    PoolThreshold,
    /// [`VHPOOL_START_ADDR`]
    PoolStartAddr,
    /// [`VHPOOL_END_ADDR`]
    PoolEndAddr,
    /// [`VHAURA_CNT`]
    AuraCount,
    /// [`VHAURA_CNT_ADD`]
    AuraCountAdd,
    /// [`VHAURA_CNT_LIMIT`]
    AuraCountLimit,
    /// [`VHAURA_CNT_THRESHOLD`]
    AuraCountThreshold,
}

impl Register {
    /// Every register, in map order.
    pub const ALL: [Self; 8] = [
        Self::PoolAvailable,
        Self::PoolThreshold,
        Self::PoolStartAddr,
        Self::PoolEndAddr,
        Self::AuraCount,
        Self::AuraCountAdd,
        Self::AuraCountLimit,
        Self::AuraCountThreshold,
    ];

    /// Upper-case register name as it appears in the hardware manual.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PoolAvailable => "VHPOOL_AVAILABLE",
            Self::PoolThreshold => "VHPOOL_THRESHOLD",
            Self::PoolStartAddr => "VHPOOL_START_ADDR",
            Self::PoolEndAddr => "VHPOOL_END_ADDR",
            Self::AuraCount => "VHAURA_CNT",
            Self::AuraCountAdd => "VHAURA_CNT_ADD",
            Self::AuraCountLimit => "VHAURA_CNT_LIMIT",
            Self::AuraCountThreshold => "VHAURA_CNT_THRESHOLD",
        }
    }
}

/// Byte offset of `reg` for gpool `slot`, or `None` if `slot` is out of range.
#[must_use]
pub const fn offset(reg: Register, slot: usize) -> Option<usize> {
    if slot >= MAX_SLOTS {
        return None;
    }
    let aura = (slot & VHAURA_MASK) << VHAURA_SHIFT;
    Some(match reg {
        Register::PoolAvailable => VHPOOL_AVAILABLE,
        Register::PoolThreshold => VHPOOL_THRESHOLD,
        Register::PoolStartAddr => VHPOOL_START_ADDR,
        Register::PoolEndAddr => VHPOOL_END_ADDR,
        Register::AuraCount => VHAURA_CNT | aura,
        Register::AuraCountAdd => VHAURA_CNT_ADD | aura,
        Register::AuraCountLimit => VHAURA_CNT_LIMIT | aura,
        Register::AuraCountThreshold => VHAURA_CNT_THRESHOLD | aura,
    })
}

// ── identity ─────────────────────────────────────────────────────────────────

/// Identity word read from `VHAURA_CNT_THRESHOLD(0)` before configuration.
pub mod identity {
    /// Domain id field shift.
    pub const DOMAIN_SHIFT: u32 = 8;
    /// VF id field shift.
    pub const VF_SHIFT: u32 = 24;
    /// Width mask of both fields.
    pub const FIELD_MASK: u64 = 0xffff;

    /// Decode `(domain_id, vf_id)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn decode(word: u64) -> (u16, u16) {
        (
            ((word >> DOMAIN_SHIFT) & FIELD_MASK) as u16,
            ((word >> VF_SHIFT) & FIELD_MASK) as u16,
        )
    }

    /// Encode `(domain_id, vf_id)`; what the PF leaves in the register.
    #[must_use]
    pub const fn encode(domain_id: u16, vf_id: u16) -> u64 {
        ((domain_id as u64) << DOMAIN_SHIFT) | ((vf_id as u64) << VF_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_banked_by_aura() {
        assert_eq!(offset(Register::AuraCount, 0), Some(0x20120));
        assert_eq!(offset(Register::AuraCount, 1), Some(0x20120 | (1 << 18)));
        assert_eq!(offset(Register::AuraCountLimit, 3), Some(0x20130 | (3 << 18)));
        assert_eq!(offset(Register::PoolStartAddr, 7), Some(VHPOOL_START_ADDR));
    }

    #[test]
    fn test_offset_rejects_out_of_range_slot() {
        assert_eq!(offset(Register::PoolEndAddr, MAX_SLOTS), None);
        assert_eq!(offset(Register::AuraCount, usize::MAX), None);
    }

    #[test]
    fn test_offsets_fit_window() {
        for reg in Register::ALL {
            for slot in 0..MAX_SLOTS {
                let off = offset(reg, slot).unwrap();
                assert!(off + 8 <= WINDOW_SIZE, "{} slot {slot}", reg.name());
                assert_eq!(off % 8, 0);
            }
        }
    }

    #[test]
    fn test_identity_fields() {
        let word = identity::encode(0x0102, 7) | 0xff;
        assert_eq!(identity::decode(word), (0x0102, 7));
    }
}
