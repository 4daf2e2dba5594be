//! Error types for FPA VF operations

use fpa_chip::mbox::Opcode;
use thiserror::Error;

/// Result type alias for FPA operations
pub type Result<T> = std::result::Result<T, FpaError>;

/// Errors that can occur during FPA operations
#[derive(Debug, Error)]
pub enum FpaError {
    /// Bad size, bad slot index, null handle or region
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for rejection
        reason: String,
    },

    /// Slot index out of range or slot not allocated (double free)
    #[error("Invalid gpool slot {slot}")]
    InvalidSlot {
        /// Offending slot index
        slot: usize,
    },

    /// No mapped, unallocated gpool slot left
    #[error("No free gpool slot")]
    NoSpace,

    /// Mailbox request rejected by the PF or failed in transport
    #[error("PF denied {op}: status {status}, result code {result_code}")]
    AccessDenied {
        /// Request that failed
        op: Opcode,
        /// Transport-level return value
        status: i32,
        /// PF functional result code from the reply header
        result_code: u8,
    },

    /// Operation on an unmapped device or invalid handle
    #[error("No device: {reason}")]
    NoDevice {
        /// Reason for failure
        reason: String,
    },

    /// Slot is already identified or still holds a live pool
    #[error("gpool slot {slot} already in use")]
    AlreadyInUse {
        /// Busy slot
        slot: usize,
    },

    /// Pool stack memory could not be allocated
    #[error("Out of memory allocating {size} bytes of pool stack")]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
    },

    /// I/O error while mapping a BAR or reading sysfs
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl FpaError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a no device error
    pub fn no_device(reason: impl Into<String>) -> Self {
        Self::NoDevice {
            reason: reason.into(),
        }
    }

    /// Negative errno equivalent, for callers bridging into C status codes.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Self::InvalidArgument { .. } | Self::InvalidSlot { .. } => libc::EINVAL,
            Self::NoSpace => libc::ENOSPC,
            Self::AccessDenied { .. } => libc::EACCES,
            Self::NoDevice { .. } => libc::ENODEV,
            Self::AlreadyInUse { .. } => libc::EBUSY,
            Self::OutOfMemory { .. } => libc::ENOMEM,
            Self::Io { source } => source.raw_os_error().unwrap_or(libc::EIO),
        };
        -code
    }
}
