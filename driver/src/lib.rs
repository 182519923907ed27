//! # AHA-154x Mailbox Protocol Engine
//!
//! Drives Adaptec 154x-family bus-master SCSI host adapters. Generic I/O
//! requests are encoded into Command Control Blocks (CCBs), handed to the
//! adapter firmware through a ring of outbound mailboxes, and matched back
//! to their requests when the firmware posts an inbound mailbox and raises
//! an interrupt.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Dispatch layer                          |
//! |            (implements PortNotify, owns requests)            |
//! +--------------------------------------------------------------+
//!        | start_io                              ^ request_complete
//!        v                                       | next_request_ready
//! +--------------------------------------------------------------+
//! |                         Adapter                              |
//! |  +-----------+  +-------+  +----------+  +----------------+  |
//! |  | Encoder   |  | CCB   |  | Mailbox  |  | Quirks, config |  |
//! |  |           |  | arena |  | rings    |  |                |  |
//! |  +-----------+  +-------+  +----------+  +----------------+  |
//! |  +--------------------------------------------------------+  |
//! |  |                Register handshake                      |  |
//! |  +--------------------------------------------------------+  |
//! +--------------------------------------------------------------+
//!        |                                        |
//!        v                                        v
//!   RegisterIo                               DmaWindow
//!   (port I/O, MMIO, simulator)              (raw, heap, simulator)
//! ```
//!
//! ## Lifecycle
//!
//! 1. [`Adapter::attach`]: validate the DMA window, read resources, probe
//!    quirks
//! 2. [`Adapter::initialize`]: reset, program mailboxes and timing
//! 3. [`Adapter::start_io`] / [`Adapter::interrupt`]: steady state
//! 4. [`Adapter::reset_bus`], [`Adapter::stop`], [`Adapter::restart`]:
//!    recovery and power transitions
//!
//! Every physical address the adapter sees is 24 bits wide. The DMA window
//! and every data buffer must lie below 16 MiB.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod adapter;
pub mod ccb;
pub mod config;
pub mod encoder;
pub mod error;
pub mod handshake;
pub mod lun;
pub mod notify;
pub mod quirks;
pub mod request;
pub mod ring;
pub mod shared;

#[cfg(test)]
mod tests;

pub use adapter::{Adapter, SetupData};
pub use config::AdapterConfig;
pub use encoder::CcbEncoding;
pub use error::{Error, Result};
pub use notify::{ErrorCode, PortNotify};
pub use quirks::{AdapterResources, BoardId, Quirks};
pub use request::{
    Completion, Direction, LunAddress, Request, RequestStatus, RequestTag, ScsiRequest, Segment,
};
pub use shared::SharedAdapter;

/// Driver version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
