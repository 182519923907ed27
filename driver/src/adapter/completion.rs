//! # Completion Path
//!
//! Runs in interrupt context. Each inbound entry is matched back to its CCB
//! slot through [`CcbPool::resolve`], classified, reported upstream and
//! recycled. A malformed entry is logged and freed; it never stops the
//! drain and never leaves the ring stuck.

use super::{Adapter, Inflight};
use crate::ccb::{ActiveCcb, CcbHandle, CcbPool, CcbResult, ResolveError, SlotState};
use crate::encoder::{CcbEncoding, CommandEncoder};
use crate::notify::{ErrorCode, PortNotify};
use crate::request::{Completion, RequestStatus, RequestTag};
use crate::ring::InboundEntry;
use aha154x_hal::command::{HostStatus, InboundCode, CHECK_CONDITION};
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::regs::{InterruptFlags, RegisterIo};
use aha154x_hal::timer::Stall;

// =============================================================================
// Log Detail Codes
// =============================================================================

/// `detail` values passed with [`PortNotify::log_internal_error`]
pub mod detail {
    /// Inbound entry with an unknown status code (low byte: the code)
    pub const UNKNOWN_CODE: u32 = 1 << 8;
    /// Mapped host status (low byte: the status)
    pub const HOST_STATUS: u32 = 2 << 8;
    /// Inbound entry naming no live CCB
    pub const BAD_ADDRESS: u32 = 5 << 8;
    /// Completion for a logical unit with nothing outstanding (low byte: the code)
    pub const NO_REQUEST: u32 = 6 << 8;
    /// Perform-SCAM was not accepted
    pub const SCAM_FAILED: u32 = 0xA << 8;
    /// Negative residual on a successful request
    pub const NEGATIVE_RESIDUAL: u32 = 0xB;
    /// Negative residual with CHECK CONDITION
    pub const NEGATIVE_RESIDUAL_CHECK: u32 = 0xC << 8;
    /// Negative residual on an over/underrun
    pub const NEGATIVE_RESIDUAL_RUN: u32 = 0xD << 8;
}

/// Bytes moved once `residual` bytes were left over
///
/// `None` when the residual exceeds the request, which some firmware
/// revisions report on requests that actually succeeded.
fn transferred(requested: u32, residual: u32) -> Option<u32> {
    requested.checked_sub(residual)
}

/// Completion of a successful CCB
fn map_success(ccb: &ActiveCcb, result: &CcbResult, notify: &mut dyn PortNotify) -> Completion {
    let mut completion = Completion {
        status: RequestStatus::Success,
        target_status: result.target_status,
        transferred: ccb.transfer_length,
    };
    if !ccb.opcode.reports_residual() || result.residual == 0 {
        return completion;
    }
    match transferred(ccb.transfer_length, result.residual) {
        Some(moved) => {
            log::debug!("{:?}: underrun, {} of {} bytes", ccb.tag, moved, ccb.transfer_length);
            completion.status = RequestStatus::DataOverrun;
            completion.transferred = moved;
        }
        None => {
            log::warn!(
                "{:?}: residual {} exceeds request length {}",
                ccb.tag,
                result.residual,
                ccb.transfer_length
            );
            completion.status = RequestStatus::PhaseSequenceFailure;
            completion.transferred = 0;
            notify.log_internal_error(ErrorCode::ProtocolError, detail::NEGATIVE_RESIDUAL);
            notify.log_internal_error(ErrorCode::ProtocolError, result.residual);
        }
    }
    completion
}

/// Completion of a CCB the firmware finished with an error
///
/// An invalid-opcode status switches `encoder` to the legacy opcode pair
/// for every later request.
fn map_error(
    ccb: &ActiveCcb,
    result: &CcbResult,
    encoder: &mut CommandEncoder,
    notify: &mut dyn PortNotify,
) -> Completion {
    let mut completion = Completion {
        status: RequestStatus::Error,
        target_status: result.target_status,
        transferred: ccb.transfer_length,
    };
    let residual = ccb.opcode.reports_residual().then_some(result.residual);
    let (status, code) = match result.host_status {
        HostStatus::SelectionTimeout => {
            completion.status = RequestStatus::SelectionTimeout;
            completion.transferred = 0;
            return completion;
        }
        HostStatus::Complete => {
            if result.target_status == CHECK_CONDITION {
                if let Some(residual) = residual {
                    match transferred(ccb.transfer_length, residual) {
                        Some(moved) => completion.transferred = moved,
                        None => {
                            notify.log_internal_error(ErrorCode::ProtocolError, detail::NEGATIVE_RESIDUAL_CHECK);
                            completion.status = RequestStatus::PhaseSequenceFailure;
                            completion.transferred = 0;
                        }
                    }
                }
            }
            return completion;
        }
        HostStatus::DataOverUnderRun => {
            completion.status = RequestStatus::DataOverrun;
            match residual.filter(|r| *r != 0).map(|r| transferred(ccb.transfer_length, r)) {
                Some(Some(moved)) => completion.transferred = moved,
                Some(None) => {
                    notify.log_internal_error(ErrorCode::ProtocolError, detail::NEGATIVE_RESIDUAL_RUN);
                    completion.status = RequestStatus::PhaseSequenceFailure;
                    completion.transferred = 0;
                }
                None => {}
            }
            return completion;
        }
        HostStatus::UnexpectedBusFree => (RequestStatus::UnexpectedBusFree, ErrorCode::UnexpectedDisconnect),
        HostStatus::PhaseSequenceFailure | HostStatus::InvalidDirection => {
            (RequestStatus::PhaseSequenceFailure, ErrorCode::ProtocolError)
        }
        HostStatus::InvalidOpcode => {
            if encoder.encoding != CcbEncoding::Legacy {
                log::warn!("firmware rejected residual CCB opcodes, falling back to legacy");
            }
            encoder.encoding = CcbEncoding::Legacy;
            (RequestStatus::InvalidRequest, ErrorCode::BadFirmwareWarning)
        }
        HostStatus::InvalidCcb
        | HostStatus::BadMailboxCommand
        | HostStatus::BadLinkedLun
        | HostStatus::DuplicateCcb => (RequestStatus::InvalidRequest, ErrorCode::InternalAdapterError),
        HostStatus::Other(_) => (RequestStatus::Error, ErrorCode::InternalAdapterError),
    };
    log::debug!("{:?}: host status {:?} -> {:?}", ccb.tag, result.host_status, status);
    notify.log_internal_error(code, detail::HOST_STATUS | result.host_status.as_u8() as u32);
    completion.status = status;
    completion.transferred = 0;
    completion
}

impl Inflight {
    /// Handle one consumed inbound entry
    fn complete<M: DmaWindow>(
        &mut self,
        entry: InboundEntry,
        dma: &M,
        encoder: &mut CommandEncoder,
        notify: &mut dyn PortNotify,
    ) {
        if let InboundCode::Unknown(code) = entry.code {
            log::error!("MBI[{}]: unknown status {:#04x}", entry.index, code);
            notify.log_internal_error(ErrorCode::InternalAdapterError, detail::UNKNOWN_CODE | code as u32);
            return;
        }
        let handle = match self.pool.resolve(entry.addr) {
            Ok(handle) => handle,
            Err(ResolveError::Null) => {
                log::trace!("MBI[{}]: null CCB address", entry.index);
                return;
            }
            Err(err) => {
                log::error!("MBI[{}]: {:?} for {}", entry.index, err, entry.addr);
                notify.log_internal_error(ErrorCode::InternalAdapterError, detail::BAD_ADDRESS);
                return;
            }
        };
        match self.pool.state(handle) {
            SlotState::Active(ccb) => self.complete_active(handle, ccb, entry.code, dma, encoder, notify),
            SlotState::AbortPending { abort } => self.complete_abort_answer(handle, abort, entry.code, notify),
            SlotState::Free => {}
        }
    }

    fn complete_active<M: DmaWindow>(
        &mut self,
        handle: CcbHandle,
        ccb: ActiveCcb,
        code: InboundCode,
        dma: &M,
        encoder: &mut CommandEncoder,
        notify: &mut dyn PortNotify,
    ) {
        let owns_lun = self.luns.current(ccb.address).is_some_and(|o| o.ccb == handle);
        if !owns_lun && code != InboundCode::NotFound {
            log::error!(
                "CCB {}: target {} lun {} has no request outstanding",
                handle.index(),
                ccb.address.target,
                ccb.address.lun
            );
            notify.log_internal_error(ErrorCode::InternalAdapterError, detail::NO_REQUEST | code.as_u8() as u32);
            // Dropped: nothing upstream is waiting on this tag
            if let Some(abort) = ccb.abort {
                notify.request_complete(abort, Completion::status(RequestStatus::AbortFailed));
            }
            self.pool.release(handle);
            return;
        }

        match code {
            InboundCode::Success | InboundCode::Error => {
                let result = CcbPool::read_result(dma, handle);
                let completion = if code == InboundCode::Success {
                    map_success(&ccb, &result, notify)
                } else {
                    map_error(&ccb, &result, encoder, notify)
                };
                log::trace!("{:?} done: {:?}", ccb.tag, completion);
                self.luns.clear_if(ccb.address, handle);
                notify.request_complete(ccb.tag, completion);
                match ccb.abort {
                    // The firmware still owes an answer to the abort
                    Some(abort) => self.pool.set_state(handle, SlotState::AbortPending { abort }),
                    None => self.pool.release(handle),
                }
            }
            InboundCode::Aborted => {
                log::debug!("{:?} aborted", ccb.tag);
                self.luns.clear_if(ccb.address, handle);
                notify.request_complete(ccb.tag, Completion::status(RequestStatus::Aborted));
                if let Some(abort) = ccb.abort {
                    notify.request_complete(abort, Completion::status(RequestStatus::Success));
                }
                self.pool.release(handle);
            }
            InboundCode::NotFound => {
                if let Some(abort) = ccb.abort {
                    log::debug!("abort {:?}: CCB {} not found", abort, handle.index());
                    notify.request_complete(abort, Completion::status(RequestStatus::AbortFailed));
                }
                if self.luns.clear_if(ccb.address, handle).is_some() {
                    log::warn!("{:?} lost by firmware, timing out", ccb.tag);
                    notify.request_complete(ccb.tag, Completion::status(RequestStatus::Timeout));
                }
                self.pool.release(handle);
            }
            InboundCode::Free | InboundCode::Unknown(_) => {}
        }
    }

    /// Firmware answer to an abort whose victim already completed
    fn complete_abort_answer(
        &mut self,
        handle: CcbHandle,
        abort: RequestTag,
        code: InboundCode,
        notify: &mut dyn PortNotify,
    ) {
        let status = match code {
            InboundCode::NotFound => RequestStatus::AbortFailed,
            InboundCode::Aborted => RequestStatus::Success,
            other => {
                log::error!("CCB {}: {:?} after completion", handle.index(), other);
                notify.log_internal_error(ErrorCode::InternalAdapterError, detail::NO_REQUEST | other.as_u8() as u32);
                RequestStatus::AbortFailed
            }
        };
        log::debug!("abort {:?} answered: {:?}", abort, status);
        notify.request_complete(abort, Completion::status(status));
        self.pool.release(handle);
    }
}

impl<R: RegisterIo, M: DmaWindow, C: Stall> Adapter<R, M, C> {
    /// Service an adapter interrupt
    ///
    /// Returns `false` if the adapter had nothing pending, so a shared
    /// line can be passed on.
    pub fn interrupt(&mut self, notify: &mut dyn PortNotify) -> bool {
        let flags = self.port.regs().interrupt_flags();
        if flags.is_empty() {
            return false;
        }
        self.port.acknowledge();

        if flags.contains(InterruptFlags::COMMAND_COMPLETE) {
            log::trace!("adapter command complete");
            return true;
        }
        if !flags.contains(InterruptFlags::MAILBOX_IN_FULL) && flags.contains(InterruptFlags::SCSI_RESET_DETECTED) {
            log::warn!("SCSI bus reset detected");
            notify.bus_reset_detected();
            self.perform_scam(notify);
            return true;
        }

        self.drain_inbound(notify);
        if self.pending_retry {
            log::debug!("retrying deferred start-command");
            self.ring_doorbell(notify);
        }
        true
    }

    fn drain_inbound(&mut self, notify: &mut dyn PortNotify) {
        let Self { rings, dma, inflight, encoder, .. } = self;
        let mut drain = rings.drain_inbound(dma);
        while let Some(entry) = drain.next() {
            inflight.complete(entry, drain.window(), encoder, notify);
        }
    }
}
