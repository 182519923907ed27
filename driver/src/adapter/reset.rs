//! # Reset and Recovery
//!
//! Both first-time initialisation and a bus reset follow one sequence:
//! hard reset, wait for idle, clear the rings, unlock the mailbox
//! interface if the BIOS locked it, hand the adapter the ring address,
//! then replay the timing configuration. Replay steps are best-effort;
//! only the idle wait decides success.

use super::completion::detail;
use super::Adapter;
use crate::ccb::SlotState;
use crate::error::{Error, HandshakeStep, HandshakeTimeout, Result};
use crate::notify::{ErrorCode, PortNotify};
use crate::quirks;
use crate::request::{Completion, RequestStatus};
use aha154x_hal::command::AdapterCommand;
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::layout::RING_SIZE;
use aha154x_hal::regs::{RegisterIo, Status};
use aha154x_hal::timer::Stall;

fn check_reset(
    reset: core::result::Result<Status, HandshakeTimeout>,
    notify: &mut dyn PortNotify,
) -> Result<Status> {
    reset.map_err(|timeout| {
        notify.log_internal_error(ErrorCode::InternalAdapterError, timeout.unique());
        Error::ResetFailed
    })
}

impl<R: RegisterIo, M: DmaWindow, C: Stall> Adapter<R, M, C> {
    /// Bring the adapter to a ready state after attach
    ///
    /// Unlike [`reset_bus`](Self::reset_bus), a failure to program the
    /// mailbox address is fatal here.
    pub fn initialize(&mut self, notify: &mut dyn PortNotify) -> Result<()> {
        log::info!("initializing adapter");
        let reset = self.port.hard_reset();
        notify.bus_reset_detected();
        let status = check_reset(reset, notify)?;
        if !status.contains(Status::MAILBOX_INIT_REQUIRED) {
            log::error!("adapter idle but not awaiting mailbox setup (status {:#04x})", status.bits());
            let unexpected = HandshakeTimeout { step: HandshakeStep::ResetIdle, status: status.bits() };
            notify.log_internal_error(ErrorCode::InternalAdapterError, unexpected.unique());
            return Err(Error::ResetFailed);
        }

        self.fail_outstanding(notify);
        self.rings.reinitialize(&mut self.dma);
        self.pending_retry = false;
        self.unlock_mailboxes(notify);
        self.mailbox_init().inspect_err(|timeout| {
            notify.log_internal_error(ErrorCode::InternalAdapterError, timeout.unique());
        })?;
        self.replay_settings(notify);
        self.perform_scam(notify);
        log::info!("adapter ready, {:?} opcodes", self.encoder.encoding);
        Ok(())
    }

    /// Reset the adapter and the SCSI bus
    ///
    /// Every outstanding request is completed with
    /// [`RequestStatus::BusReset`] before the hardware is touched. Fails
    /// only if the adapter never returns to idle.
    pub fn reset_bus(&mut self, path: u8, notify: &mut dyn PortNotify) -> Result<()> {
        log::warn!("resetting SCSI bus {}", path);
        let failed = self.fail_outstanding(notify);
        let reset = self.port.hard_reset();
        self.rings.reinitialize(&mut self.dma);
        if self.pending_retry {
            self.pending_retry = false;
            notify.next_request_ready();
        }
        check_reset(reset, notify)?;

        self.unlock_mailboxes(notify);
        if let Err(timeout) = self.mailbox_init() {
            log::error!("mailbox setup after reset failed: {}", timeout);
            notify.log_internal_error(ErrorCode::InternalAdapterError, timeout.unique());
        }
        self.replay_settings(notify);
        self.perform_scam(notify);
        log::info!("bus {} reset, {} requests failed", path, failed);
        Ok(())
    }

    /// Complete everything in flight with bus-reset status
    fn fail_outstanding(&mut self, notify: &mut dyn PortNotify) -> usize {
        let failed = Completion::status(RequestStatus::BusReset);
        let mut count = 0;
        for state in self.inflight.pool.take_all() {
            match state {
                SlotState::Active(ccb) => {
                    notify.request_complete(ccb.tag, failed);
                    if let Some(abort) = ccb.abort {
                        notify.request_complete(abort, failed);
                    }
                    count += 1;
                }
                SlotState::AbortPending { abort } => notify.request_complete(abort, failed),
                SlotState::Free => {}
            }
        }
        self.inflight.luns.clear_all();
        count
    }

    fn unlock_mailboxes(&mut self, notify: &mut dyn PortNotify) {
        let Some(lock_type) = self.quirks.mailbox_lock else {
            return;
        };
        log::debug!("unlocking mailbox interface (type {:#04x})", lock_type);
        if let Err(timeout) = quirks::unlock_mailboxes(&mut self.port, lock_type) {
            log::warn!("mailbox unlock failed: {}", timeout);
            notify.log_internal_error(ErrorCode::InternalAdapterError, timeout.unique());
        }
    }

    fn mailbox_init(&mut self) -> core::result::Result<(), HandshakeTimeout> {
        let [hi, mid, lo] = self.mailbox_base.to_be_bytes();
        self.port.command(AdapterCommand::MailboxInit, &[RING_SIZE as u8, hi, mid, lo])?;
        self.port.acknowledge_complete();
        Ok(())
    }

    /// Program transfer speed, bus timing and selection timeout
    fn replay_settings(&mut self, notify: &mut dyn PortNotify) {
        let config = self.config;
        if let Some(speed) = config.transfer_speed() {
            self.setting(AdapterCommand::SetTransferSpeed, &[speed], notify);
        }
        self.setting(AdapterCommand::SetBusOnTime, &[config.bus_on_time()], notify);
        self.setting(AdapterCommand::SetBusOffTime, &[config.bus_off_time()], notify);
        self.setting(AdapterCommand::SetSelectionTimeout, &config.selection_timeout_bytes(), notify);
    }

    fn setting(&mut self, command: AdapterCommand, params: &[u8], notify: &mut dyn PortNotify) {
        let result = self
            .port
            .command(command, params)
            .and_then(|()| self.port.wait_complete());
        if let Err(timeout) = result {
            log::warn!("{:?} {:02x?} not accepted: {}", command, params, timeout);
            notify.log_internal_error(ErrorCode::InternalAdapterError, timeout.unique());
        }
    }

    /// Issue perform-SCAM if the adapter supports it
    pub(super) fn perform_scam(&mut self, notify: &mut dyn PortNotify) {
        if !self.quirks.scam {
            return;
        }
        log::debug!("performing SCAM");
        let result = self
            .port
            .command(AdapterCommand::PerformScam, &[])
            .and_then(|()| self.port.wait_complete());
        if let Err(timeout) = result {
            log::warn!("SCAM failed: {}", timeout);
            notify.log_internal_error(ErrorCode::InternalAdapterError, detail::SCAM_FAILED);
        }
    }
}
