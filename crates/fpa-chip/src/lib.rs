//! Silicon model for the OCTEON TX FPA (Free Pool Allocator) virtual function.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the VF-visible contract, covering register offsets, the bit layout of
//! the self-describing identity registers, the pool/aura control words sent to
//! the PF, mailbox opcodes, and PCIe identifiers.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | Vendor/device IDs of the FPA VF function |
//! | [`regs`] | VF BAR0 register map, `offset(register, slot)` |
//! | [`pool`] | Slot count, size granularities, pool control word |
//! | [`mbox`] | Mailbox coprocessor tag and FPA opcodes |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod mbox;
pub mod pcie;
pub mod pool;
pub mod regs;
