//! PCIe identifiers for the FPA virtual function.
//!
//! Each FPA VF is its own PCIe function with a single 64-bit BAR0 holding the
//! VF register window described in [`crate::regs`].

/// Cavium vendor ID (PCI-SIG assigned).
pub const CAVIUM_VENDOR_ID: u16 = 0x177D;

/// Device IDs for the OCTEON TX FPA.
pub mod device_id {
    /// FPA virtual function (`lspci: 177d:a053`).
    pub const FPA_VF: u16 = 0xA053;
}

/// All device IDs this driver attaches to.
pub const ALL_DEVICE_IDS: &[u16] = &[device_id::FPA_VF];

/// BAR holding the VF register window.
pub const REGISTER_BAR: usize = 0;

/// Returns the `lspci -d` filter string for FPA VFs.
#[must_use]
pub fn lspci_filter() -> String {
    format!("{CAVIUM_VENDOR_ID:04x}:{:04x}", device_id::FPA_VF)
}
