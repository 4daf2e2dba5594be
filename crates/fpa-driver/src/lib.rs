//! VF-side resource core for the OCTEON TX FPA buffer-pool allocator.
//!
//! The FPA hands out fixed-size buffers from hardware pools. Each pool is a
//! *gpool* slot backed by one VF; the privileged PF configures pools on the
//! VF's behalf over a mailbox. This crate owns the VF side:
//!
//! ```text
//!  create_pool ─▶ SlotTable ─▶ pool stack ─▶ MailboxClient ─▶ VF registers
//!       │            (claim)     (DmaAllocator)  (PF config,     (start/end,
//!       ▼                                         aura attach)    counts)
//!  PoolHandle = VF BAR address | slot index
//! ```
//!
//! | Module | Role |
//! |--------|------|
//! | [`table`] | 32-slot gpool table behind one lock |
//! | [`handle`] | opaque pool handles |
//! | [`mailbox`] | typed VF → PF requests over an [`MboxTransport`] |
//! | [`identify`] | VF self-identification from its registers |
//! | [`pool`] | create/destroy state machine with rollback |
//! | [`memory`] | pinned pool stack memory |
//! | [`mmio`] | register window access |
//! | [`discovery`] | sysfs scan for FPA VFs |
//! | [`emulated`] | in-memory VF, PF and allocator |
//!
//! # Quick start
//!
//! ```no_run
//! use fpa_driver::emulated::{EmulatedBar, EmulatedPf, TrackingAllocator};
//! use fpa_driver::{FpaConfig, FpaDev};
//! use std::sync::Arc;
//!
//! # fn main() -> fpa_driver::Result<()> {
//! let dev = FpaDev::new(
//!     Arc::new(EmulatedPf::new()),
//!     Arc::new(TrackingAllocator::new()),
//!     FpaConfig::default(),
//! )?;
//! dev.attach(Arc::new(EmulatedBar::vf(0, 1, 8)))?;
//!
//! let handle = dev.create_pool(2048, 1024, 128, 0x10_0000_0000)?;
//! assert_eq!(dev.block_size_of(handle)?, 2048);
//! dev.destroy_pool(handle)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod discovery;
pub mod emulated;
mod error;
pub mod handle;
pub mod identify;
pub mod mailbox;
pub mod memory;
pub mod mmio;
pub mod pool;
pub mod table;

/// Hardware identification constants (re-exported from fpa-chip).
pub mod pcie_ids {
    pub use fpa_chip::pcie::device_id;
    pub use fpa_chip::pcie::{lspci_filter, ALL_DEVICE_IDS, CAVIUM_VENDOR_ID, REGISTER_BAR};
}

pub use config::FpaConfig;
pub use discovery::{find_fpa_vfs, VfInfo};
pub use error::{FpaError, Result};
pub use handle::PoolHandle;
pub use identify::{identify_vf, VfIdentity};
pub use mailbox::{DeviceCounts, MailboxClient, MboxHeader, MboxTransport, PoolConfigMsg};
pub use memory::{DmaAllocator, DmaMemory, IovaMode, LockedMemory, LockedMemoryAllocator};
pub use mmio::{MappedBar, RegisterIo};
pub use pool::{FpaDev, PoolStage};
pub use table::{Slot, SlotTable};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        FpaConfig, FpaDev, FpaError, MailboxClient, MappedBar, MboxTransport, PoolHandle,
        RegisterIo, Result, SlotTable,
    };
}
