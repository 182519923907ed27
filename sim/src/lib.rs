//! # Simulated AHA-154x Adapter
//!
//! An in-memory adapter for driving the protocol engine without hardware.
//! [`SimAdapter`] implements [`RegisterIo`]: writes to its registers feed a
//! firmware model that interprets adapter commands and serves the mailbox
//! rings out of a shared [`HeapDma`] window.
//!
//! ```text
//! test ──knobs──► SimAdapter ◄──RegisterIo── driver
//!                     │                        │
//!                     └──────── HeapDma ───────┘
//! ```
//!
//! Clones of a [`SimAdapter`] share one adapter, so a test keeps a handle
//! for knobs and observations while the driver owns another.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

mod clock;
mod firmware;

pub use clock::SimClock;
pub use firmware::{CommandRecord, FirmwareProfile, Outcome, SeenCcb};

use aha154x_hal::command::InboundCode;
use aha154x_hal::dma::HeapDma;
use aha154x_hal::layout::WINDOW_SIZE;
use aha154x_hal::regs::{Control, InterruptFlags, Register, RegisterIo};
use aha154x_hal::{PhysAddr, U24};
use alloc::sync::Arc;
use alloc::vec::Vec;
use firmware::Firmware;
use spin::Mutex;

/// Physical base the default window claims
pub const DEFAULT_WINDOW_BASE: u64 = 0x0001_0000;

/// A simulated adapter
#[derive(Clone)]
pub struct SimAdapter {
    dma: HeapDma,
    firmware: Arc<Mutex<Firmware>>,
}

impl core::fmt::Debug for SimAdapter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimAdapter").field("dma", &self.dma).finish_non_exhaustive()
    }
}

impl Default for SimAdapter {
    fn default() -> Self {
        Self::new(FirmwareProfile::default())
    }
}

impl SimAdapter {
    /// Adapter with a full-size window at [`DEFAULT_WINDOW_BASE`]
    pub fn new(profile: FirmwareProfile) -> Self {
        Self::with_window(profile, HeapDma::new(PhysAddr::new(DEFAULT_WINDOW_BASE), WINDOW_SIZE))
    }

    /// Adapter sharing a caller-supplied window
    pub fn with_window(profile: FirmwareProfile, dma: HeapDma) -> Self {
        Self {
            firmware: Arc::new(Mutex::new(Firmware::new(profile, dma.clone()))),
            dma,
        }
    }

    /// Handle on the DMA window, for the driver
    pub fn window(&self) -> HeapDma {
        self.dma.clone()
    }

    // =========================================================================
    // Knobs
    // =========================================================================

    /// Answer every CCB addressed to `target` with `outcome`
    pub fn set_outcome(&self, target: u8, outcome: Outcome) {
        self.firmware.lock().outcomes.insert(target, outcome);
    }

    /// Keep started CCBs instead of completing them
    pub fn hold(&self, hold: bool) {
        self.firmware.lock().hold = hold;
    }

    /// Complete every held CCB with its target's outcome
    ///
    /// Returns how many were completed.
    pub fn complete_held(&self) -> usize {
        let mut fw = self.firmware.lock();
        let held = core::mem::take(&mut fw.held);
        for addr in &held {
            let outcome = fw.outcome_for(*addr);
            fw.finish_ccb(*addr, outcome);
        }
        held.len()
    }

    /// Reject the next `count` residual-reporting CCBs as invalid opcodes
    pub fn reject_residual_opcodes(&self, count: u32) {
        self.firmware.lock().reject_residual = count;
    }

    /// Hold the command/data-out port full
    pub fn set_port_busy(&self, busy: bool) {
        self.firmware.lock().port_busy = busy;
    }

    /// Never leave self-test after the next hard reset
    pub fn set_stuck_after_reset(&self, stuck: bool) {
        let mut fw = self.firmware.lock();
        if stuck {
            fw.stuck_after_reset = true;
        } else {
            fw.recover();
        }
    }

    /// Signal a SCSI bus reset from another initiator
    pub fn raise_scsi_reset(&self) {
        self.firmware.lock().flags |= InterruptFlags::ANY | InterruptFlags::SCSI_RESET_DETECTED;
    }

    /// Post an arbitrary inbound mailbox
    pub fn inject_inbound(&self, code: u8, addr: U24) {
        self.firmware.lock().post_inbound(code, addr);
    }

    /// Post an inbound mailbox with a known code
    pub fn inject_completion(&self, code: InboundCode, addr: U24) {
        self.inject_inbound(code.as_u8(), addr);
    }

    // =========================================================================
    // Observations
    // =========================================================================

    /// CCBs picked up so far, oldest first
    pub fn seen(&self) -> Vec<SeenCcb> {
        self.firmware.lock().seen.clone()
    }

    /// Adapter commands received so far, oldest first
    pub fn commands(&self) -> Vec<CommandRecord> {
        self.firmware.lock().commands.clone()
    }

    /// Forget recorded commands and CCBs
    pub fn clear_history(&self) {
        let mut fw = self.firmware.lock();
        fw.commands.clear();
        fw.seen.clear();
        fw.aborts.clear();
    }

    /// CCB addresses named by abort mailboxes
    pub fn aborts(&self) -> Vec<U24> {
        self.firmware.lock().aborts.clone()
    }

    /// CCBs currently held
    pub fn held_count(&self) -> usize {
        self.firmware.lock().held.len()
    }

    /// Start-mailbox doorbells received
    pub fn doorbells(&self) -> usize {
        self.firmware.lock().doorbells
    }

    /// Hard resets received
    pub fn hard_resets(&self) -> usize {
        self.firmware.lock().hard_resets
    }

    /// SCAM runs performed
    pub fn scam_runs(&self) -> usize {
        self.firmware.lock().scam_runs
    }

    /// Mailbox array address from the last mailbox init
    pub fn mailbox_base(&self) -> Option<U24> {
        self.firmware.lock().mailbox_base
    }

    /// Mailbox count from the last mailbox init
    pub fn mailbox_count(&self) -> u8 {
        self.firmware.lock().mailbox_count
    }

    /// Whether the mailbox interface is locked
    pub fn is_locked(&self) -> bool {
        self.firmware.lock().locked
    }

    /// Current setup data
    pub fn setup(&self) -> [u8; 17] {
        self.firmware.lock().setup
    }

    /// Last selection timeout parameters
    pub fn selection_timeout(&self) -> [u8; 4] {
        self.firmware.lock().selection_timeout
    }

    /// Pending interrupt flags
    pub fn interrupt_pending(&self) -> InterruptFlags {
        self.firmware.lock().flags
    }
}

impl RegisterIo for SimAdapter {
    fn read(&mut self, reg: Register) -> u8 {
        let mut fw = self.firmware.lock();
        match reg {
            Register::StatusControl => fw.status().bits(),
            Register::CommandData => fw.read_data(),
            Register::Interrupt => fw.flags.bits(),
        }
    }

    fn write(&mut self, reg: Register, value: u8) {
        let mut fw = self.firmware.lock();
        match reg {
            Register::StatusControl => fw.control(Control::from_bits_retain(value)),
            Register::CommandData => fw.write_data(value),
            Register::Interrupt => log::warn!("sim: write {:#04x} to the interrupt register", value),
        }
    }
}
