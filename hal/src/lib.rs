//! # AHA-154x Hardware Abstraction Layer
//!
//! Hardware definitions and access traits for the Adaptec 154x family of
//! bus-master SCSI host adapters.
//!
//! This crate knows *what the hardware looks like*: the three-register
//! handshake window, the adapter opcodes, the mailbox and Command Control
//! Block (CCB) wire layouts, and the 24-bit big-endian address format the
//! firmware uses everywhere. It knows nothing about the protocol state
//! machine; that lives in the `aha154x` driver crate.
//!
//! ## Design Philosophy
//!
//! Every point where the driver touches hardware is a trait:
//! - [`regs::RegisterIo`]: byte-wide register reads and writes
//! - [`dma::DmaWindow`]: the adapter-visible memory holding mailboxes and CCBs
//! - [`timer::Stall`]: the calibrated busy-wait used by polling loops
//!
//! Real implementations (port I/O, volatile MMIO, raw DMA memory) sit next
//! to in-memory ones, so the whole protocol can run against a simulated
//! adapter.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod addr;
pub mod command;
pub mod dma;
pub mod layout;
pub mod regs;
pub mod timer;

pub use addr::{PhysAddr, U24};

use core::fmt;

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Address does not fit the adapter's 24-bit address space
    InvalidAddress(u64),
    /// Value does not fit a 24-bit field
    OutOfRange(u64),
    /// Address is not aligned as the hardware requires
    Misaligned {
        /// Offending address
        addr: u64,
        /// Required alignment in bytes
        align: u64,
    },
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::InvalidAddress(addr) => {
                write!(f, "physical address {:#x} is above the 16 MiB DMA limit", addr)
            }
            HalError::OutOfRange(value) => {
                write!(f, "value {:#x} does not fit in 24 bits", value)
            }
            HalError::Misaligned { addr, align } => {
                write!(f, "address {:#x} is not {}-byte aligned", addr, align)
            }
        }
    }
}
