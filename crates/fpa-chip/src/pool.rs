//! Pool geometry and the pool/aura control words.
//!
//! ```text
//! POOL_CFG (sent to the PF in a configure-pool message)
//!
//!  63      43 42        32 31  30          16 15   5  4  3  2   1     0
//! ┌──────────┬────────────┬───┬──────────────┬──────┬─────┬───┬─────┬─────┐
//! │ reserved │  BUF_SIZE  │ - │  BUF_OFFSET  │  -   │LTYPE│STY│ NAT │ ENA │
//! └──────────┴────────────┴───┴──────────────┴──────┴─────┴───┴─────┴─────┘
//!              (lines)          (lines, signed)
//! ```

/// Number of gpool slots (one per VF the platform can hand out).
pub const MAX_SLOTS: usize = 32;

/// Low-order handle bits that carry the slot index.
pub const SLOT_MASK: u64 = (MAX_SLOTS as u64) - 1;

/// Cache-line granularity of block sizes and buffer offsets.
pub const CACHE_LINE_SIZE: usize = 128;

/// Largest object the FPA can serve.
pub const MAX_OBJECT_SIZE: usize = 128 * 1024;

/// Unit in which the pool stack is laid out.
pub const STACK_LINE_SIZE: usize = 128;

/// PF page size; pool stack memory is rounded up to it.
pub const PF_PAGE_SIZE: usize = 4096;

/// Default headroom reserved in front of every buffer.
pub const DEFAULT_BUF_OFFSET: usize = 128;

/// Aura control word sent with configure-pool.
pub const AURA_CFG: u64 = 1 << 9;

/// Load type the driver always requests (LDT).
pub const LTYPE_LDT: u8 = 0x2;

const ENA: u64 = 1 << 0;
const NAT_ALIGN: u64 = 1 << 1;
const STYPE_SHIFT: u32 = 2;
const LTYPE_SHIFT: u32 = 3;
const BUF_OFFSET_SHIFT: u32 = 16;
const BUF_OFFSET_MASK: u64 = 0x7fff;
const BUF_SIZE_SHIFT: u32 = 32;
const BUF_SIZE_MASK: u64 = 0x7ff;

/// Decoded POOL_CFG word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolControl {
    /// Buffer size in cache lines.
    pub buf_size: u64,
    /// Offset of the buffer start in cache lines.
    pub buf_offset: u64,
    /// Load type.
    pub ltype: u8,
    /// Store type.
    pub stype: u8,
    /// Buffers are naturally aligned to their size.
    pub natural_align: bool,
    /// Pool enabled.
    pub enable: bool,
}

impl PoolControl {
    /// Encode into the 64-bit word the PF expects.
    #[must_use]
    pub const fn bits(&self) -> u64 {
        let mut reg = ((self.buf_size & BUF_SIZE_MASK) << BUF_SIZE_SHIFT)
            | ((self.buf_offset & BUF_OFFSET_MASK) << BUF_OFFSET_SHIFT)
            | (((self.ltype & 0x3) as u64) << LTYPE_SHIFT)
            | (((self.stype & 0x1) as u64) << STYPE_SHIFT);
        if self.natural_align {
            reg |= NAT_ALIGN;
        }
        if self.enable {
            reg |= ENA;
        }
        reg
    }

    /// Decode a POOL_CFG word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_bits(reg: u64) -> Self {
        Self {
            buf_size: (reg >> BUF_SIZE_SHIFT) & BUF_SIZE_MASK,
            buf_offset: (reg >> BUF_OFFSET_SHIFT) & BUF_OFFSET_MASK,
            ltype: ((reg >> LTYPE_SHIFT) & 0x3) as u8,
            stype: ((reg >> STYPE_SHIFT) & 0x1) as u8,
            natural_align: reg & NAT_ALIGN != 0,
            enable: reg & ENA != 0,
        }
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
#[must_use]
pub const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Bytes of pool stack needed to track `object_count` buffers when the VF
/// reports `stack_line_ptrs` pointers per stack line.
///
/// Returns 0 when `stack_line_ptrs` is 0 (VF not identified).
#[must_use]
pub const fn stack_bytes(object_count: usize, stack_line_ptrs: usize, page_size: usize) -> usize {
    if stack_line_ptrs == 0 {
        return 0;
    }
    let lines = round_up(object_count.div_ceil(stack_line_ptrs), STACK_LINE_SIZE);
    round_up(lines * STACK_LINE_SIZE, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_mask_covers_slots() {
        assert_eq!(SLOT_MASK, 0x1f);
        assert!(MAX_SLOTS.is_power_of_two());
    }

    #[test]
    fn test_pool_control_layout() {
        let cfg = PoolControl {
            buf_size: 2,
            buf_offset: 1,
            ltype: LTYPE_LDT,
            stype: 0,
            natural_align: true,
            enable: true,
        };
        assert_eq!(cfg.bits(), (2 << 32) | (1 << 16) | (2 << 3) | 0b11);
        assert_eq!(PoolControl::from_bits(cfg.bits()), cfg);
    }

    #[test]
    fn test_disabled_word_is_zero() {
        assert_eq!(PoolControl::default().bits(), 0);
    }

    #[test]
    fn test_stack_bytes_page_rounded() {
        assert_eq!(stack_bytes(1000, 0, PF_PAGE_SIZE), 0);
        // 1000 / 8 -> 125 lines -> 128 lines -> 16 KiB
        assert_eq!(stack_bytes(1000, 8, PF_PAGE_SIZE), 16 * 1024);
        // tiny pools still get a full page
        assert_eq!(stack_bytes(1, 8, PF_PAGE_SIZE), 16 * 1024);
        assert_eq!(stack_bytes(1, 8, 64 * 1024), 64 * 1024);
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(100, CACHE_LINE_SIZE), 128);
        assert_eq!(round_up(129, CACHE_LINE_SIZE), 256);
        assert_eq!(round_up(128, CACHE_LINE_SIZE), 128);
    }
}
