//! # Register Handshake
//!
//! Adapter-level commands are a byte stream through the command/data
//! register, paced by status bits:
//!
//! 1. Wait until the command/data-out port is empty (and, for most
//!    commands, the adapter is idle), then write the opcode.
//! 2. For each parameter byte, wait until the port is empty again.
//! 3. For each reply byte, wait for data-in-full, then read it.
//! 4. Wait for the command-complete interrupt flag and clear it.
//!
//! Every wait is a bounded poll with a fixed stall between reads. Nothing
//! here is re-entrant: one adapter, one handshake at a time.

use crate::error::{HandshakeStep, HandshakeTimeout};
use aha154x_hal::command::AdapterCommand;
use aha154x_hal::regs::{Control, InterruptFlags, Register, RegisterIo, Status};
use aha154x_hal::timer::Stall;

/// Polling budget: iterations and stall per iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Status reads before giving up
    pub polls: u32,
    /// Microseconds between reads
    pub stall_us: u32,
}

impl Budget {
    /// Opcode write: 500 ms
    pub const WRITE_COMMAND: Self = Self { polls: 5000, stall_us: 100 };
    /// Parameter write: 500 µs
    pub const WRITE_DATA: Self = Self { polls: 500, stall_us: 1 };
    /// Reply read: 5 ms
    pub const READ_BYTE: Self = Self { polls: 5000, stall_us: 1 };
    /// Command-complete wait: 5 ms
    pub const WAIT_COMPLETE: Self = Self { polls: 5000, stall_us: 1 };
    /// Idle after hard reset: 500 ms
    pub const RESET_IDLE: Self = Self { polls: 5000, stall_us: 100 };

    /// Upper bound on the time spent, in microseconds
    pub const fn total_us(&self) -> u64 {
        self.polls as u64 * self.stall_us as u64
    }
}

/// What a tolerable timeout does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnTimeout {
    /// Report the timeout
    Fail,
    /// Carry on as if the adapter had answered
    Proceed,
}

/// Register window plus the clock pacing it
#[derive(Debug)]
pub struct Handshake<R, C> {
    regs: R,
    clock: C,
}

impl<R: RegisterIo, C: Stall> Handshake<R, C> {
    /// Wrap a register window
    pub fn new(regs: R, clock: C) -> Self {
        Self { regs, clock }
    }

    /// Direct register access
    pub fn regs(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Stall for `micros`
    pub fn stall(&mut self, micros: u32) {
        self.clock.stall_us(micros);
    }

    /// Read the status register
    pub fn status(&mut self) -> Status {
        self.regs.status()
    }

    /// Clear the adapter interrupt
    pub fn acknowledge(&mut self) {
        self.regs.acknowledge_interrupt();
    }

    /// Poll until `ready` accepts the status, stalling between reads
    fn poll_status(
        &mut self,
        budget: Budget,
        step: HandshakeStep,
        ready: impl Fn(Status) -> bool,
    ) -> Result<Status, HandshakeTimeout> {
        let mut status = Status::empty();
        for _ in 0..budget.polls {
            status = self.regs.status();
            if ready(status) {
                return Ok(status);
            }
            self.clock.stall_us(budget.stall_us);
        }
        Err(HandshakeTimeout { step, status: status.bits() })
    }

    /// Write an adapter opcode
    ///
    /// With `require_idle`, also waits for the idle bit; the doorbell is
    /// the one opcode sent while the adapter is busy.
    pub fn write_command(&mut self, opcode: u8, require_idle: bool) -> Result<(), HandshakeTimeout> {
        let ready = |status: Status| {
            !status.contains(Status::COMMAND_OUT_FULL) && (!require_idle || status.contains(Status::IDLE))
        };
        match self.poll_status(Budget::WRITE_COMMAND, HandshakeStep::WriteCommand, ready) {
            Ok(_) => {
                self.regs.write(Register::CommandData, opcode);
                Ok(())
            }
            Err(timeout) => {
                log::error!("adapter not ready for opcode {:#04x}: {}", opcode, timeout);
                Err(timeout)
            }
        }
    }

    /// Write a parameter byte
    pub fn write_data(&mut self, byte: u8) -> Result<(), HandshakeTimeout> {
        let ready = |status: Status| !status.contains(Status::COMMAND_OUT_FULL);
        match self.poll_status(Budget::WRITE_DATA, HandshakeStep::WriteData, ready) {
            Ok(_) => {
                self.regs.write(Register::CommandData, byte);
                Ok(())
            }
            Err(timeout) => {
                log::error!("adapter not accepting parameter bytes: {}", timeout);
                Err(timeout)
            }
        }
    }

    /// Read a reply byte
    ///
    /// With [`OnTimeout::Proceed`] the data register is read anyway.
    pub fn read_byte(&mut self, on_timeout: OnTimeout) -> Result<u8, HandshakeTimeout> {
        let ready = |status: Status| status.contains(Status::DATA_IN_FULL);
        if let Err(timeout) = self.poll_status(Budget::READ_BYTE, HandshakeStep::ReadByte, ready) {
            if on_timeout == OnTimeout::Fail {
                log::warn!("no reply byte from adapter: {}", timeout);
                return Err(timeout);
            }
            log::trace!("reply byte timeout tolerated");
        }
        Ok(self.regs.read(Register::CommandData))
    }

    /// Poll for command-complete; `true` if it was seen
    fn poll_complete(&mut self) -> bool {
        let budget = Budget::WAIT_COMPLETE;
        for _ in 0..budget.polls {
            if self.regs.interrupt_flags().contains(InterruptFlags::COMMAND_COMPLETE) {
                return true;
            }
            self.clock.stall_us(budget.stall_us);
        }
        false
    }

    /// Wait for command-complete and clear it
    pub fn wait_complete(&mut self) -> Result<(), HandshakeTimeout> {
        if !self.poll_complete() {
            let status = self.regs.status().bits();
            let timeout = HandshakeTimeout { step: HandshakeStep::WaitComplete, status };
            log::warn!("adapter command did not complete: {}", timeout);
            return Err(timeout);
        }
        self.regs.acknowledge_interrupt();
        Ok(())
    }

    /// Give command-complete its budget, then clear the interrupt either way
    ///
    /// For commands whose completion the firmware does not always signal.
    pub fn acknowledge_complete(&mut self) {
        if !self.poll_complete() {
            log::trace!("command-complete timeout tolerated");
        }
        self.regs.acknowledge_interrupt();
    }

    /// Opcode (adapter idle) followed by its parameter bytes
    pub fn command(&mut self, command: AdapterCommand, params: &[u8]) -> Result<(), HandshakeTimeout> {
        self.write_command(command.opcode(), true)?;
        for &byte in params {
            self.write_data(byte)?;
        }
        Ok(())
    }

    /// Read `reply.len()` bytes
    pub fn read_reply(&mut self, reply: &mut [u8], on_timeout: OnTimeout) -> Result<(), HandshakeTimeout> {
        for byte in reply.iter_mut() {
            *byte = self.read_byte(on_timeout)?;
        }
        Ok(())
    }

    /// Hard-reset the adapter and wait for idle
    pub fn hard_reset(&mut self) -> Result<Status, HandshakeTimeout> {
        log::debug!("hard reset");
        self.regs.control(Control::HARD_RESET);
        let ready = |status: Status| status.contains(Status::IDLE);
        self.poll_status(Budget::RESET_IDLE, HandshakeStep::ResetIdle, ready)
            .inspect_err(|timeout| log::error!("adapter stuck after reset: {}", timeout))
    }

    /// Ring the doorbell for a newly posted outbound mailbox
    pub fn start_command(&mut self) -> Result<(), HandshakeTimeout> {
        self.write_command(AdapterCommand::StartCommand.opcode(), false)
    }
}
