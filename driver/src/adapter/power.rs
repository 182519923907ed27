//! # Adapter State and Control
//!
//! Snapshot of the adapter's setup data for power transitions, plus the
//! stop/restart pair a host uses around them.

use super::Adapter;
use crate::error::{Error, Result};
use crate::handshake::OnTimeout;
use crate::notify::PortNotify;
use aha154x_hal::command::{params, AdapterCommand};
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::regs::{InterruptFlags, RegisterIo};
use aha154x_hal::timer::Stall;
use aha154x_hal::U24;

/// Hard resets attempted by [`Adapter::stop`]
pub const STOP_ATTEMPTS: usize = 10;

/// The 17-byte return-setup-data reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupData {
    bytes: [u8; params::SETUP_DATA_LEN],
}

impl SetupData {
    /// Wrap a raw reply
    pub const fn from_bytes(bytes: [u8; params::SETUP_DATA_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw reply
    pub const fn as_bytes(&self) -> &[u8; params::SETUP_DATA_LEN] {
        &self.bytes
    }

    /// Synchronous negotiation and parity flags
    pub const fn sync_flags(&self) -> u8 {
        self.bytes[0]
    }

    /// DMA transfer speed
    pub const fn transfer_speed(&self) -> u8 {
        self.bytes[1]
    }

    /// Bus-on time
    pub const fn bus_on_time(&self) -> u8 {
        self.bytes[2]
    }

    /// Bus-off time
    pub const fn bus_off_time(&self) -> u8 {
        self.bytes[3]
    }

    /// Number of mailboxes, zero if never initialised
    pub const fn mailbox_count(&self) -> u8 {
        self.bytes[4]
    }

    /// Physical address of the mailbox arrays
    pub const fn mailbox_address(&self) -> U24 {
        U24::from_be_bytes([self.bytes[5], self.bytes[6], self.bytes[7]])
    }

    /// Negotiated synchronous parameters of `target`
    pub fn target_sync(&self, target: u8) -> Option<u8> {
        self.bytes[8..16].get(target as usize).copied()
    }

    /// Disconnect options
    pub const fn disconnect_options(&self) -> u8 {
        self.bytes[16]
    }
}

impl<R: RegisterIo, M: DmaWindow, C: Stall> Adapter<R, M, C> {
    /// Capture the adapter's setup data
    pub fn save_state(&mut self) -> Result<SetupData> {
        self.port
            .command(AdapterCommand::ReturnSetupData, &[params::SETUP_DATA_LEN as u8])?;
        let mut bytes = [0u8; params::SETUP_DATA_LEN];
        self.port.read_reply(&mut bytes, OnTimeout::Fail)?;
        self.port.wait_complete()?;
        let setup = SetupData::from_bytes(bytes);
        log::debug!(
            "saved setup: {} mailboxes at {}, bus on {} off {}",
            setup.mailbox_count(),
            setup.mailbox_address(),
            setup.bus_on_time(),
            setup.bus_off_time()
        );
        self.saved = Some(setup);
        Ok(setup)
    }

    /// Reprogram the adapter from the last saved setup data
    pub fn restore_state(&mut self) -> Result<()> {
        let setup = self.saved.ok_or(Error::NoSavedState)?;
        if setup.mailbox_count() != 0 {
            let [hi, mid, lo] = setup.mailbox_address().to_be_bytes();
            self.port
                .command(AdapterCommand::MailboxInit, &[setup.mailbox_count(), hi, mid, lo])?;
            self.port.wait_complete()?;
        }
        let replay = [
            (AdapterCommand::SetTransferSpeed, setup.transfer_speed()),
            (AdapterCommand::SetBusOnTime, setup.bus_on_time()),
            (AdapterCommand::SetBusOffTime, setup.bus_off_time()),
        ];
        for (command, value) in replay {
            self.port.command(command, &[value])?;
            self.port.wait_complete()?;
        }
        self.port.acknowledge();
        log::debug!("setup data restored");
        Ok(())
    }

    /// Quiesce the adapter before a power transition
    ///
    /// Saves the setup data, then hard-resets until the adapter is idle
    /// with no interrupt pending.
    pub fn stop(&mut self) -> Result<()> {
        self.save_state()?;
        for attempt in 1..=STOP_ATTEMPTS {
            if self.port.hard_reset().is_ok() {
                self.port.acknowledge();
                if !self.port.regs().interrupt_flags().contains(InterruptFlags::ANY) {
                    log::info!("adapter stopped after {} reset(s)", attempt);
                    return Ok(());
                }
            }
        }
        log::error!("adapter did not quiesce after {} resets", STOP_ATTEMPTS);
        Err(Error::ResetFailed)
    }

    /// Bring a stopped adapter back
    ///
    /// Restores the saved setup data, then resets the bus, which fails
    /// anything still outstanding and reprograms the rings.
    pub fn restart(&mut self, notify: &mut dyn PortNotify) -> Result<()> {
        self.restore_state()?;
        self.reset_bus(0, notify)
    }
}
