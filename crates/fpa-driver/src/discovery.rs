//! Runtime VF discovery
//!
//! Finds FPA VFs by scanning PCIe sysfs for the Cavium vendor id and the
//! FPA VF device id. Nothing is hardcoded beyond the ids.

use crate::error::{FpaError, Result};
use crate::mmio::MappedBar;
use fpa_chip::pcie::{ALL_DEVICE_IDS, CAVIUM_VENDOR_ID};
use std::path::{Path, PathBuf};

const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// A discovered FPA VF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfInfo {
    /// PCIe bus address (0000:05:00.1, etc.)
    pub pcie_address: String,

    /// sysfs directory of the function
    pub path: PathBuf,

    /// PCI device id
    pub device_id: u16,

    /// Bound kernel driver, if any
    pub driver: Option<String>,
}

impl VfInfo {
    /// Map this VF's register BAR.
    ///
    /// # Errors
    ///
    /// Returns [`FpaError::NoDevice`] if the resource file cannot be mapped.
    pub fn map(&self) -> Result<MappedBar> {
        MappedBar::open(self.path.join("resource0"))
    }
}

/// Every FPA VF on the system, sorted by address.
///
/// # Errors
///
/// Returns [`FpaError::NoDevice`] if sysfs cannot be read. An empty list is
/// not an error.
pub fn find_fpa_vfs() -> Result<Vec<VfInfo>> {
    find_fpa_vfs_in(Path::new(SYSFS_PCI_DEVICES))
}

/// [`find_fpa_vfs`] over an arbitrary sysfs-style directory.
///
/// # Errors
///
/// Returns [`FpaError::NoDevice`] if `root` cannot be read.
pub fn find_fpa_vfs_in(root: &Path) -> Result<Vec<VfInfo>> {
    let entries = std::fs::read_dir(root)
        .map_err(|e| FpaError::no_device(format!("Cannot read {}: {e}", root.display())))?;

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let vendor = read_hex_sysfs(&path.join("vendor")).ok();
        let device = read_hex_sysfs(&path.join("device")).ok();

        if let (Some(vendor), Some(device_id)) = (vendor, device) {
            if vendor == CAVIUM_VENDOR_ID && ALL_DEVICE_IDS.contains(&device_id) {
                let driver = std::fs::read_link(path.join("driver"))
                    .ok()
                    .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
                tracing::debug!("FPA VF at {}", path.display());
                found.push(VfInfo {
                    pcie_address: entry.file_name().to_string_lossy().into_owned(),
                    path,
                    device_id,
                    driver,
                });
            }
        }
    }

    found.sort_by(|a, b| a.pcie_address.cmp(&b.pcie_address));
    tracing::info!("Discovered {} FPA VF(s)", found.len());
    Ok(found)
}

fn read_hex_sysfs(path: &Path) -> Result<u16> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FpaError::no_device(format!("Cannot read {}: {e}", path.display())))?;
    let trimmed = content.trim().trim_start_matches("0x");
    u16::from_str_radix(trimmed, 16)
        .map_err(|e| FpaError::invalid_argument(format!("Invalid hex value in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_function(root: &Path, addr: &str, vendor: &str, device: &str) {
        let dir = root.join(addr);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("{vendor}\n")).unwrap();
        fs::write(dir.join("device"), format!("{device}\n")).unwrap();
    }

    #[test]
    fn test_filters_and_sorts() {
        let root = tempfile::tempdir().unwrap();
        fake_function(root.path(), "0000:05:00.2", "0x177d", "0xa053");
        fake_function(root.path(), "0000:05:00.1", "0x177d", "0xa053");
        fake_function(root.path(), "0000:05:00.0", "0x177d", "0xa052");
        fake_function(root.path(), "0000:01:00.0", "0x8086", "0xa053");
        fs::create_dir_all(root.path().join("0000:07:00.0")).unwrap();

        let vfs = find_fpa_vfs_in(root.path()).unwrap();
        let addrs: Vec<&str> = vfs.iter().map(|v| v.pcie_address.as_str()).collect();
        assert_eq!(addrs, ["0000:05:00.1", "0000:05:00.2"]);
        assert!(vfs.iter().all(|v| v.driver.is_none()));
    }

    #[test]
    fn test_missing_root() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_fpa_vfs_in(&root.path().join("nope")),
            Err(FpaError::NoDevice { .. })
        ));
    }

    #[test]
    fn test_hex_parse() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vendor");
        fs::write(&file, "0x177d\n").unwrap();
        assert_eq!(read_hex_sysfs(&file).unwrap(), CAVIUM_VENDOR_ID);
        fs::write(&file, "zz\n").unwrap();
        assert!(read_hex_sysfs(&file).is_err());
    }

    #[test]
    fn test_system_scan() {
        // Needs an OCTEON TX host to find anything
        match find_fpa_vfs() {
            Ok(vfs) => println!("✅ Found {} FPA VF(s)", vfs.len()),
            Err(e) => println!("ℹ️  sysfs unavailable: {e}"),
        }
    }
}
