//! `fpa` — command-line interface for OCTEON TX FPA virtual functions.
//!
//! ```text
//! USAGE:
//!   fpa list                          List FPA VFs found in sysfs
//!   fpa identify <pcie-addr>          Map BAR0 and decode the VF identity
//!   fpa regs [--slot N]               Print VF register offsets
//!   fpa simulate [--pools N] ...      Create and destroy pools on an emulated PF
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fpa_chip::regs::Register;
use fpa_driver::emulated::{EmulatedBar, EmulatedPf, TrackingAllocator};
use fpa_driver::{FpaConfig, FpaDev, MappedBar, RegisterIo, VfIdentity};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fpa", about = "OCTEON TX FPA VF tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List all FPA VFs.
    List,
    /// Decode the identity registers of one VF.
    Identify {
        /// PCIe address (e.g. 0000:05:00.1).
        pcie_addr: String,
    },
    /// Print register offsets for a gpool slot.
    Regs {
        /// Slot index (0-31).
        #[arg(long, default_value_t = 0)]
        slot: usize,
    },
    /// Exercise the pool lifecycle against an emulated PF and VFs.
    Simulate {
        /// Number of pools to create.
        #[arg(long, default_value_t = 4)]
        pools: u16,
        /// Object size in bytes.
        #[arg(long, default_value_t = 2048)]
        object_size: usize,
        /// Objects per pool.
        #[arg(long, default_value_t = 1024)]
        count: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::List => cmd_list()?,
        Cmd::Identify { pcie_addr } => cmd_identify(&pcie_addr)?,
        Cmd::Regs { slot } => cmd_regs(slot)?,
        Cmd::Simulate {
            pools,
            object_size,
            count,
        } => cmd_simulate(pools, object_size, count)?,
    }

    Ok(())
}

fn cmd_list() -> Result<()> {
    let vfs = fpa_driver::find_fpa_vfs()?;

    println!("FPA VFs: {}  (lspci -d {})", vfs.len(), fpa_chip::pcie::lspci_filter());
    for vf in &vfs {
        println!(
            "  {}  {:04x}  driver={}",
            vf.pcie_address,
            vf.device_id,
            vf.driver.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn cmd_identify(pcie_addr: &str) -> Result<()> {
    let bar = MappedBar::for_pci(pcie_addr).with_context(|| format!("mapping {pcie_addr}"))?;
    let id = VfIdentity::read(&bar)?;

    println!("PCIe address : {pcie_addr}");
    println!("BAR0         : {:#x} ({} KiB)", bar.base_address(), bar.size() / 1024);
    println!("Domain       : {}", id.domain_id);
    println!("VF / gpool   : {}", id.vf_id);
    println!("Stack line   : {} pointers", id.stack_line_ptrs);
    Ok(())
}

fn cmd_regs(slot: usize) -> Result<()> {
    println!("gpool {slot} registers:");
    for reg in Register::ALL {
        let offset = fpa_chip::regs::offset(reg, slot)
            .with_context(|| format!("slot {slot} out of range"))?;
        println!("  {:<24} {offset:#08x}", reg.name());
    }
    Ok(())
}

fn cmd_simulate(pools: u16, object_size: usize, count: u32) -> Result<()> {
    let pf = Arc::new(EmulatedPf::new());
    let alloc = Arc::new(TrackingAllocator::new());
    let dev = FpaDev::new(pf.clone(), alloc.clone(), FpaConfig::default())?;

    for vf in 0..pools {
        dev.attach(Arc::new(EmulatedBar::vf(vf, 1, 8)))?;
    }
    println!("Identified {} emulated VF(s)", dev.identified_count());

    let region = 0x10_0000_0000u64;
    let mut handles = Vec::new();
    for _ in 0..pools {
        let handle = dev.create_pool(object_size, count, 128, region)?;
        let cfg = dev.pool_config(handle)?;
        println!(
            "  pool {handle}  slot {:>2}  block {:>6} B  stack {:#x}..{:#x}",
            handle.slot_index(),
            dev.block_size_of(handle)?,
            cfg.stack_base,
            cfg.stack_end
        );
        handles.push(handle);
    }

    for handle in handles {
        dev.destroy_pool(handle)?;
    }
    println!(
        "Destroyed {pools} pool(s): {} mailbox messages, {} stack block(s) outstanding",
        pf.messages().len(),
        alloc.live()
    );
    Ok(())
}
