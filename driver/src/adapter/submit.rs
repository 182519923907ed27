//! Submission and abort paths.

use super::Adapter;
use crate::ccb::{ActiveCcb, CcbPool};
use crate::lun::Outstanding;
use crate::notify::{ErrorCode, PortNotify};
use crate::request::{Completion, LunAddress, Request, RequestStatus, RequestTag, ScsiRequest};
use aha154x_hal::command::OutboundCode;
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::layout;
use aha154x_hal::regs::RegisterIo;
use aha154x_hal::timer::Stall;

/// Complete `tag` without touching the adapter and ask for more work
fn finish(notify: &mut dyn PortNotify, tag: RequestTag, status: RequestStatus) {
    notify.request_complete(tag, Completion::status(status));
    notify.next_request_ready();
}

impl<R: RegisterIo, M: DmaWindow, C: Stall> Adapter<R, M, C> {
    /// Accept one request from the dispatch layer
    ///
    /// Every outcome is reported through `notify`: rejected requests are
    /// completed immediately, accepted ones when the firmware answers.
    /// `next_request_ready` is raised once the adapter can take another
    /// request; the caller must not submit again before that.
    pub fn start_io(&mut self, request: Request, notify: &mut dyn PortNotify) {
        match request {
            Request::Execute(request) => self.execute(request, notify),
            Request::Abort { tag, address, victim } => self.abort(tag, address, victim, notify),
            Request::ResetBus { tag, path } => {
                let status = match self.reset_bus(path, notify) {
                    Ok(()) => RequestStatus::Success,
                    Err(err) => {
                        log::error!("bus reset failed: {}", err);
                        RequestStatus::Error
                    }
                };
                finish(notify, tag, status);
            }
            Request::ResetDevice { tag, address } => {
                log::debug!("device reset of target {} not supported", address.target);
                finish(notify, tag, RequestStatus::InvalidRequest);
            }
        }
    }

    fn execute(&mut self, request: ScsiRequest, notify: &mut dyn PortNotify) {
        let tag = request.tag;
        let address = request.address;
        if !address.is_valid() {
            log::debug!("{:?}: no such logical unit {:?}", tag, address);
            return finish(notify, tag, RequestStatus::InvalidRequest);
        }
        if let Some(max) = self.max_cdb {
            if request.cdb.len() > max as usize {
                log::debug!("{:?}: {}-byte CDB exceeds limit of {}", tag, request.cdb.len(), max);
                return finish(notify, tag, RequestStatus::InvalidRequest);
            }
        }
        if self.inflight.luns.current(address).is_some() {
            log::debug!("{:?}: target {} lun {} busy", tag, address.target, address.lun);
            return finish(notify, tag, RequestStatus::Busy);
        }

        let active = ActiveCcb {
            tag,
            address,
            transfer_length: request.transfer_length,
            opcode: self.encoder.encoding.initiator(),
            abort: None,
        };
        let Ok(handle) = self.inflight.pool.allocate(active) else {
            return finish(notify, tag, RequestStatus::Busy);
        };
        let image = match self.encoder.encode(&request, self.inflight.pool.sg_list_phys(handle)) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("{:?}: {}", tag, err);
                self.inflight.pool.release(handle);
                return finish(notify, tag, RequestStatus::InvalidRequest);
            }
        };
        let ccb_addr = match self.inflight.pool.phys(handle).to_u24() {
            Ok(addr) => addr,
            Err(err) => {
                log::error!("{:?}: CCB unreachable: {}", tag, err);
                self.inflight.pool.release(handle);
                return finish(notify, tag, RequestStatus::InvalidRequest);
            }
        };
        let Ok(index) = self.rings.allocate_outbound(&self.dma) else {
            self.inflight.pool.release(handle);
            return finish(notify, tag, RequestStatus::Busy);
        };

        if let (Some(ccb), Some(opcode)) = (self.inflight.pool.active_mut(handle), image.opcode()) {
            ccb.opcode = opcode;
        }
        image.write_to(&mut self.dma, CcbPool::offset(handle), layout::slot_sg_list(handle.index()));
        self.inflight.luns.set(address, Outstanding { tag, ccb: handle });
        self.rings.post(&mut self.dma, index, OutboundCode::Start, ccb_addr);
        log::debug!("{:?} -> CCB {} via MBO[{}]", tag, handle.index(), index);
        self.ring_doorbell(notify);
    }

    fn abort(&mut self, tag: RequestTag, address: LunAddress, victim: RequestTag, notify: &mut dyn PortNotify) {
        let Some(outstanding) = self.inflight.luns.current(address).filter(|o| o.tag == victim) else {
            log::debug!("abort {:?}: {:?} not outstanding", tag, victim);
            return finish(notify, tag, RequestStatus::AbortFailed);
        };
        let handle = outstanding.ccb;
        match self.inflight.pool.active_mut(handle) {
            Some(ccb) if ccb.abort.is_none() => ccb.abort = Some(tag),
            _ => {
                log::debug!("abort {:?}: {:?} already being aborted", tag, victim);
                return finish(notify, tag, RequestStatus::AbortFailed);
            }
        }
        let posted = self.inflight.pool.phys(handle).to_u24().ok().zip(self.rings.allocate_outbound(&self.dma).ok());
        let Some((ccb_addr, index)) = posted else {
            if let Some(ccb) = self.inflight.pool.active_mut(handle) {
                ccb.abort = None;
            }
            return finish(notify, tag, RequestStatus::Busy);
        };
        self.rings.post(&mut self.dma, index, OutboundCode::Abort, ccb_addr);
        log::debug!("abort {:?} -> CCB {} via MBO[{}]", tag, handle.index(), index);
        self.ring_doorbell(notify);
    }

    /// Tell the firmware an outbound entry is waiting
    ///
    /// A timeout leaves the entry posted and defers the doorbell to the
    /// next interrupt.
    pub(super) fn ring_doorbell(&mut self, notify: &mut dyn PortNotify) {
        match self.port.start_command() {
            Ok(()) => {
                self.pending_retry = false;
                notify.next_request_ready();
            }
            Err(timeout) => {
                log::warn!("start-command deferred: {}", timeout);
                notify.log_internal_error(ErrorCode::InternalAdapterError, timeout.unique());
                self.pending_retry = true;
            }
        }
    }
}
