//! End-to-end scenarios against the simulated adapter.

use crate::adapter::{detail, STOP_ATTEMPTS};
use crate::{
    Adapter, AdapterConfig, CcbEncoding, Completion, Direction, Error, ErrorCode, LunAddress, PortNotify, Request,
    RequestStatus, RequestTag, ScsiRequest, Segment, SharedAdapter,
};
use aha154x_hal::command::{lock, AdapterCommand, CcbOpcode, InboundCode};
use aha154x_hal::dma::HeapDma;
use aha154x_hal::layout::WINDOW_SIZE;
use aha154x_hal::{PhysAddr, U24};
use aha154x_sim::{FirmwareProfile, Outcome, SimAdapter, SimClock, DEFAULT_WINDOW_BASE};
use alloc::vec;
use alloc::vec::Vec;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct Recorder {
    completions: Vec<(RequestTag, Completion)>,
    ready: usize,
    bus_resets: usize,
    errors: Vec<(ErrorCode, u32)>,
}

impl Recorder {
    fn completion(&self, tag: u32) -> Option<Completion> {
        self.completions.iter().rev().find(|(t, _)| *t == RequestTag(tag)).map(|(_, c)| *c)
    }

    fn status(&self, tag: u32) -> Option<RequestStatus> {
        self.completion(tag).map(|c| c.status)
    }

    fn count(&self, tag: u32) -> usize {
        self.completions.iter().filter(|(t, _)| *t == RequestTag(tag)).count()
    }
}

impl PortNotify for Recorder {
    fn request_complete(&mut self, tag: RequestTag, completion: Completion) {
        self.completions.push((tag, completion));
    }

    fn next_request_ready(&mut self) {
        self.ready += 1;
    }

    fn bus_reset_detected(&mut self) {
        self.bus_resets += 1;
    }

    fn log_internal_error(&mut self, code: ErrorCode, detail: u32) {
        self.errors.push((code, detail));
    }
}

type SimDriver = Adapter<SimAdapter, HeapDma, SimClock>;

const BUFFER: u64 = 0x0020_0000;

fn attach(profile: FirmwareProfile, config: AdapterConfig) -> (SimAdapter, SimDriver) {
    let sim = SimAdapter::new(profile);
    let adapter = Adapter::attach(sim.clone(), sim.window(), SimClock::new(), config).unwrap();
    (sim, adapter)
}

fn bring_up(profile: FirmwareProfile, config: AdapterConfig) -> (SimAdapter, SimDriver, Recorder) {
    let (sim, mut adapter) = attach(profile, config);
    let mut rec = Recorder::default();
    adapter.initialize(&mut rec).unwrap();
    (sim, adapter, rec)
}

fn ready() -> (SimAdapter, SimDriver, Recorder) {
    bring_up(FirmwareProfile::default(), AdapterConfig::default())
}

const READ_10: [u8; 10] = [0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0];

fn read(tag: u32, target: u8, lun: u8, len: u32) -> Request {
    let req = ScsiRequest::new(RequestTag(tag), LunAddress::new(target, lun), &READ_10).unwrap();
    Request::Execute(req.with_data(Direction::IN, vec![Segment::new(BUFFER, len)], len))
}

fn abort(tag: u32, target: u8, lun: u8, victim: u32) -> Request {
    Request::Abort { tag: RequestTag(tag), address: LunAddress::new(target, lun), victim: RequestTag(victim) }
}

fn opcodes(sim: &SimAdapter) -> Vec<u8> {
    sim.commands().iter().map(|c| c.opcode).filter(|op| *op != AdapterCommand::StartCommand.opcode()).collect()
}

// =============================================================================
// Attach and Initialisation
// =============================================================================

#[test]
fn test_attach_reads_identity() {
    let (_sim, adapter) = attach(FirmwareProfile::default(), AdapterConfig::default());
    let res = adapter.resources();
    assert_eq!((res.dma_channel, res.irq, res.host_id), (Some(5), Some(11), 7));
    assert_eq!(adapter.encoding(), CcbEncoding::Residual);
    assert!(adapter.scatter_gather());
    assert_eq!(adapter.max_cdb_length(), None);
    assert_eq!(adapter.quirks().mailbox_lock, None);
    assert!(!adapter.quirks().scam);
}

#[test]
fn test_attach_rejects_bad_windows() {
    let sim = SimAdapter::default();
    let short = HeapDma::new(PhysAddr::new(DEFAULT_WINDOW_BASE), 128);
    let err = Adapter::attach(sim.clone(), short, SimClock::new(), AdapterConfig::default()).unwrap_err();
    assert_eq!(err, Error::WindowTooSmall { required: WINDOW_SIZE, actual: 128 });

    let high = HeapDma::new(PhysAddr::new(0x00FF_FF00), WINDOW_SIZE);
    let err = Adapter::attach(sim.clone(), high, SimClock::new(), AdapterConfig::default()).unwrap_err();
    assert!(matches!(err, Error::AddressRange(_)));

    let crooked = HeapDma::new(PhysAddr::new(DEFAULT_WINDOW_BASE + 4), WINDOW_SIZE);
    let err = Adapter::attach(sim, crooked, SimClock::new(), AdapterConfig::default()).unwrap_err();
    assert!(matches!(err, Error::AddressRange(_)));
}

#[test]
fn test_attach_reports_diagnostic_failure() {
    let sim = SimAdapter::new(FirmwareProfile { diag_failed: true, ..FirmwareProfile::default() });
    let err = Adapter::attach(sim.clone(), sim.window(), SimClock::new(), AdapterConfig::default()).unwrap_err();
    assert!(matches!(err, Error::SelfTestFailed(status) if status & 0x40 != 0));
}

#[test]
fn test_initialize_programs_adapter() {
    let (sim, adapter, rec) = ready();
    assert_eq!(rec.bus_resets, 1);
    assert!(rec.errors.is_empty());
    assert_eq!(sim.hard_resets(), 1);
    assert_eq!(sim.mailbox_count(), 8);
    assert_eq!(sim.mailbox_base(), Some(U24::from_be_bytes([0x01, 0x00, 0x00])));
    assert_eq!(&sim.setup()[1..4], &[0x00, 7, 4]);
    assert_eq!(sim.selection_timeout(), [0x01, 0x00, 0x01, 0xF4]);
    assert!(adapter.rings_clear());
}

#[test]
fn test_initialize_replays_configuration() {
    let mut config = AdapterConfig::default();
    config.set_bus_on_time(10).unwrap();
    config.set_bus_off_time(6);
    config.set_transfer_speed(Some(0x01));
    config.set_selection_timeout_ms(250);
    let (sim, _adapter, _rec) = bring_up(FirmwareProfile::default(), config);
    assert_eq!(&sim.setup()[1..4], &[0x01, 10, 6]);
    assert_eq!(sim.selection_timeout(), [0x01, 0x00, 0x00, 250]);
}

#[test]
fn test_initialize_skips_unset_transfer_speed() {
    let mut config = AdapterConfig::default();
    config.set_transfer_speed(None);
    let (sim, _adapter, _rec) = bring_up(FirmwareProfile::default(), config);
    assert!(!opcodes(&sim).contains(&AdapterCommand::SetTransferSpeed.opcode()));
}

#[test]
fn test_initialize_fails_when_adapter_stays_busy() {
    let (sim, mut adapter) = attach(FirmwareProfile::default(), AdapterConfig::default());
    sim.set_stuck_after_reset(true);
    let mut rec = Recorder::default();
    assert_eq!(adapter.initialize(&mut rec), Err(Error::ResetFailed));
    assert_eq!(rec.bus_resets, 1);
    assert_eq!(rec.errors, [(ErrorCode::InternalAdapterError, 0x0E80)]);
}

#[test]
fn test_locked_mailboxes_are_unlocked() {
    let (sim, adapter, rec) = bring_up(FirmwareProfile::locked(lock::TRANSLATION_LOCK), AdapterConfig::default());
    assert_eq!(adapter.quirks().mailbox_lock, Some(lock::TRANSLATION_LOCK));
    assert!(!sim.is_locked());
    assert!(sim.mailbox_base().is_some());
    assert!(rec.errors.is_empty());

    let ops = opcodes(&sim);
    let unlock = ops.iter().position(|op| *op == AdapterCommand::SetMailboxInterface.opcode()).unwrap();
    let init = ops.iter().rposition(|op| *op == AdapterCommand::MailboxInit.opcode()).unwrap();
    assert!(unlock < init);
}

// =============================================================================
// Quirks
// =============================================================================

#[test]
fn test_first_generation_board_uses_legacy_single_run() {
    let (sim, mut adapter, mut rec) = bring_up(FirmwareProfile::first_generation(), AdapterConfig::default());
    assert_eq!(adapter.encoding(), CcbEncoding::Legacy);
    assert!(!adapter.scatter_gather());
    assert_eq!(adapter.max_cdb_length(), Some(10));

    sim.set_outcome(0, Outcome::underrun(100));
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    assert!(adapter.interrupt(&mut rec));
    assert_eq!(sim.seen()[0].opcode, CcbOpcode::LegacyInitiator as u8);
    let done = rec.completion(1).unwrap();
    assert_eq!((done.status, done.transferred), (RequestStatus::Success, 512));

    let runs = vec![Segment::new(BUFFER, 256), Segment::new(BUFFER + 0x1000, 256)];
    let req = ScsiRequest::new(RequestTag(2), LunAddress::new(0, 0), &READ_10).unwrap();
    adapter.start_io(Request::Execute(req.with_data(Direction::IN, runs, 512)), &mut rec);
    assert_eq!(rec.status(2), Some(RequestStatus::InvalidRequest));
}

#[test]
fn test_buggy_firmware_disables_scatter_gather() {
    let (sim, adapter) = attach(FirmwareProfile::aha1540a_buggy(), AdapterConfig::default());
    assert!(!adapter.scatter_gather());
    assert_eq!(adapter.encoding(), CcbEncoding::Residual);
    assert_eq!(adapter.max_cdb_length(), Some(10));
    assert!(opcodes(&sim).contains(&AdapterCommand::SetAdapterOptions.opcode()));
}

#[test]
fn test_healthy_1540a_keeps_scatter_gather() {
    let profile = FirmwareProfile { firmware_bug: false, ..FirmwareProfile::aha1540a_buggy() };
    let (_sim, adapter) = attach(profile, AdapterConfig::default());
    assert!(adapter.scatter_gather());
}

#[test]
fn test_bad_hardware_firmware_pair_disables_scatter_gather() {
    let profile = FirmwareProfile { inquiry: [b'D', 0, b'0', b'3'], ..FirmwareProfile::default() };
    let (_sim, adapter) = attach(profile, AdapterConfig::default());
    assert!(!adapter.scatter_gather());
}

#[test]
fn test_invalid_opcode_switches_to_legacy() {
    let (sim, mut adapter, mut rec) = ready();
    sim.reject_residual_opcodes(1);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::InvalidRequest));
    assert_eq!(rec.errors, [(ErrorCode::BadFirmwareWarning, detail::HOST_STATUS | 0x16)]);
    assert_eq!(adapter.encoding(), CcbEncoding::Legacy);

    adapter.start_io(read(2, 0, 0, 512), &mut rec);
    adapter.interrupt(&mut rec);
    assert_eq!(sim.seen()[1].opcode, CcbOpcode::LegacyInitiator as u8);
    assert_eq!(rec.status(2), Some(RequestStatus::Success));
}

#[test]
fn test_max_cdb_length_enforced() {
    let (_sim, mut adapter, mut rec) = ready();
    let long = ScsiRequest::new(RequestTag(1), LunAddress::new(0, 0), &[0xA8; 12]).unwrap();
    adapter.start_io(Request::Execute(long.clone()), &mut rec);
    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::Success));

    let mut config = AdapterConfig::default();
    config.set_max_cdb_length(10).unwrap();
    let (_sim, mut adapter, mut rec) = bring_up(FirmwareProfile::default(), config);
    adapter.start_io(Request::Execute(long), &mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::InvalidRequest));
    assert_eq!(adapter.outstanding(), 0);
}

// =============================================================================
// Submission and Completion
// =============================================================================

#[test]
fn test_single_run_read() {
    let (sim, mut adapter, mut rec) = ready();
    adapter.start_io(read(1, 2, 3, 512), &mut rec);
    assert_eq!(rec.ready, 1);
    assert_eq!(adapter.outstanding(), 1);
    assert_eq!(adapter.busy_luns(), 1);

    let seen = &sim.seen()[0];
    assert_eq!(seen.opcode, CcbOpcode::Initiator as u8);
    assert_eq!((seen.target, seen.lun, seen.direction), (2, 3, 0x10));
    assert_eq!(seen.cdb, READ_10);
    assert_eq!(seen.segments, [(BUFFER as u32, 512)]);

    assert!(adapter.interrupt(&mut rec));
    let done = rec.completion(1).unwrap();
    assert_eq!(done, Completion { status: RequestStatus::Success, target_status: 0, transferred: 512 });
    assert_eq!(adapter.outstanding(), 0);
    assert_eq!(adapter.busy_luns(), 0);
}

#[test]
fn test_multi_run_write_uses_descriptor_list() {
    let (sim, mut adapter, mut rec) = ready();
    let runs = vec![
        Segment::new(BUFFER, 4096),
        Segment::new(BUFFER + 0x10000, 4096),
        Segment::new(BUFFER + 0x20000, 4096),
    ];
    let req = ScsiRequest::new(RequestTag(7), LunAddress::new(1, 0), &[0x2A, 0, 0, 0, 0, 0, 0, 0, 20, 0]).unwrap();
    adapter.start_io(Request::Execute(req.with_data(Direction::OUT, runs, 10_000)), &mut rec);

    let seen = &sim.seen()[0];
    assert_eq!(seen.opcode, CcbOpcode::ScatterGather as u8);
    assert_eq!(seen.direction, 0x08);
    assert_eq!(seen.data_length, 18);
    assert_eq!(
        seen.segments,
        [(BUFFER as u32, 4096), (BUFFER as u32 + 0x10000, 4096), (BUFFER as u32 + 0x20000, 1808)]
    );
    adapter.interrupt(&mut rec);
    assert_eq!(rec.completion(7).unwrap().transferred, 10_000);
}

#[test]
fn test_no_data_command() {
    let (sim, mut adapter, mut rec) = ready();
    let tur = ScsiRequest::new(RequestTag(3), LunAddress::new(4, 0), &[0u8; 6]).unwrap();
    adapter.start_io(Request::Execute(tur), &mut rec);
    adapter.interrupt(&mut rec);
    let seen = &sim.seen()[0];
    assert_eq!((seen.data_length, seen.direction), (0, 0));
    assert!(seen.segments.is_empty());
    assert_eq!(rec.status(3), Some(RequestStatus::Success));
}

#[test]
fn test_buffers_above_16mib_rejected() {
    let (sim, mut adapter, mut rec) = ready();
    let req = ScsiRequest::new(RequestTag(1), LunAddress::new(0, 0), &READ_10).unwrap();
    let high = req.clone().with_data(Direction::IN, vec![Segment::new(0x0100_0000, 512)], 512);
    adapter.start_io(Request::Execute(high), &mut rec);
    let straddle = req.with_data(Direction::IN, vec![Segment::new(0x00FF_FF00, 512)], 512);
    adapter.start_io(Request::Execute(straddle), &mut rec);

    assert_eq!(rec.count(1), 2);
    assert!(rec.completions.iter().all(|(_, c)| c.status == RequestStatus::InvalidRequest));
    assert_eq!(adapter.outstanding(), 0);
    assert_eq!(adapter.busy_luns(), 0);
    assert!(sim.seen().is_empty());
    assert_eq!(rec.ready, 2);
}

#[test]
fn test_short_buffer_rejected() {
    let (_sim, mut adapter, mut rec) = ready();
    let req = ScsiRequest::new(RequestTag(1), LunAddress::new(0, 0), &READ_10).unwrap();
    let req = req.with_data(Direction::IN, vec![Segment::new(BUFFER, 256)], 512);
    adapter.start_io(Request::Execute(req), &mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::InvalidRequest));
    assert_eq!(adapter.outstanding(), 0);
}

#[test]
fn test_invalid_address_and_device_reset_rejected() {
    let (_sim, mut adapter, mut rec) = ready();
    adapter.start_io(read(1, 8, 0, 512), &mut rec);
    adapter.start_io(Request::ResetDevice { tag: RequestTag(2), address: LunAddress::new(0, 0) }, &mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::InvalidRequest));
    assert_eq!(rec.status(2), Some(RequestStatus::InvalidRequest));
    assert_eq!(rec.ready, 2);
}

#[test]
fn test_outcome_mapping_end_to_end() {
    let (sim, mut adapter, mut rec) = ready();
    sim.set_outcome(1, Outcome::underrun(100));
    sim.set_outcome(2, Outcome::underrun(1024));
    sim.set_outcome(3, Outcome::SELECTION_TIMEOUT);
    sim.set_outcome(4, Outcome { residual: 12, ..Outcome::error(0x00, 0x02) });
    sim.set_outcome(5, Outcome::error(0x13, 0));
    for target in 1..=5 {
        adapter.start_io(read(target as u32, target, 0, 512), &mut rec);
    }
    assert!(adapter.interrupt(&mut rec));

    let done = rec.completion(1).unwrap();
    assert_eq!((done.status, done.transferred), (RequestStatus::DataOverrun, 412));
    let done = rec.completion(2).unwrap();
    assert_eq!((done.status, done.transferred), (RequestStatus::PhaseSequenceFailure, 0));
    assert_eq!(rec.status(3), Some(RequestStatus::SelectionTimeout));
    let done = rec.completion(4).unwrap();
    assert_eq!((done.status, done.target_status, done.transferred), (RequestStatus::Error, 0x02, 500));
    assert_eq!(rec.status(5), Some(RequestStatus::UnexpectedBusFree));

    assert_eq!(
        rec.errors,
        [
            (ErrorCode::ProtocolError, detail::NEGATIVE_RESIDUAL),
            (ErrorCode::ProtocolError, 1024),
            (ErrorCode::UnexpectedDisconnect, detail::HOST_STATUS | 0x13),
        ]
    );
    assert_eq!(adapter.outstanding(), 0);
}

#[test]
fn test_lun_busy_and_pool_exhaustion() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    adapter.start_io(read(2, 0, 0, 512), &mut rec);
    assert_eq!(rec.status(2), Some(RequestStatus::Busy));

    for tag in 3..10u32 {
        adapter.start_io(read(tag, tag as u8 - 2, 0, 512), &mut rec);
    }
    assert_eq!(adapter.outstanding(), 8);
    adapter.start_io(read(10, 0, 1, 512), &mut rec);
    assert_eq!(rec.status(10), Some(RequestStatus::Busy));
    assert_eq!(adapter.outstanding(), 8);
    assert_eq!(adapter.busy_luns(), 8);

    assert_eq!(sim.complete_held(), 8);
    adapter.interrupt(&mut rec);
    assert_eq!(adapter.outstanding(), 0);
    assert_eq!(adapter.busy_luns(), 0);
    for tag in [1, 3, 4, 5, 6, 7, 8, 9] {
        assert_eq!(rec.status(tag), Some(RequestStatus::Success), "tag {}", tag);
    }
}

#[test]
fn test_sustained_traffic_leaks_nothing() {
    let (sim, mut adapter, mut rec) = ready();
    sim.set_outcome(1, Outcome::underrun(64));
    sim.set_outcome(2, Outcome::SELECTION_TIMEOUT);
    sim.set_outcome(3, Outcome::error(0x14, 0));
    for round in 0..40u32 {
        for target in 0..4u8 {
            adapter.start_io(read(round * 4 + target as u32, target, 0, 512), &mut rec);
        }
        assert!(adapter.interrupt(&mut rec));
        assert_eq!(adapter.outstanding(), 0);
        assert_eq!(adapter.busy_luns(), 0);
    }
    assert_eq!(rec.completions.len(), 160);
    assert_eq!(rec.ready, 160);
    assert!(!adapter.interrupt(&mut rec));
}

#[test]
fn test_deferred_doorbell_retried_on_interrupt() {
    let (sim, mut adapter, mut rec) = ready();
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    assert_eq!(rec.ready, 1);

    sim.set_port_busy(true);
    adapter.start_io(read(2, 1, 0, 512), &mut rec);
    assert!(adapter.pending_retry());
    assert_eq!(rec.ready, 1);
    assert_eq!(rec.errors.len(), 1);
    assert_eq!(rec.errors[0].0, ErrorCode::InternalAdapterError);
    assert_eq!(rec.errors[0].1 & 0xFF00, 4 << 8);

    sim.set_port_busy(false);
    assert!(adapter.interrupt(&mut rec));
    assert_eq!(rec.status(1), Some(RequestStatus::Success));
    assert!(!adapter.pending_retry());
    assert_eq!(rec.ready, 2);

    assert!(adapter.interrupt(&mut rec));
    assert_eq!(rec.status(2), Some(RequestStatus::Success));
    assert_eq!(adapter.outstanding(), 0);
}

#[test]
fn test_malformed_inbound_entries() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    let addr = sim.seen()[0].addr;

    sim.inject_inbound(0x7F, addr);
    sim.inject_inbound(0x01, U24::from_be_bytes([0x00, 0x20, 0x00]));
    sim.inject_inbound(0x01, U24::ZERO);
    assert!(adapter.interrupt(&mut rec));
    assert_eq!(
        rec.errors,
        [
            (ErrorCode::InternalAdapterError, detail::UNKNOWN_CODE | 0x7F),
            (ErrorCode::InternalAdapterError, detail::BAD_ADDRESS),
        ]
    );
    assert_eq!(adapter.outstanding(), 1);

    sim.complete_held();
    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::Success));
}

#[test]
fn test_lost_ccb_times_out() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    sim.inject_completion(InboundCode::NotFound, sim.seen()[0].addr);
    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::Timeout));
    assert_eq!(adapter.outstanding(), 0);
}

#[test]
fn test_interrupt_without_cause() {
    let (_sim, mut adapter, mut rec) = ready();
    assert!(!adapter.interrupt(&mut rec));
    assert!(rec.completions.is_empty());
}

// =============================================================================
// Abort
// =============================================================================

#[test]
fn test_abort_running_request() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    adapter.start_io(abort(2, 0, 0, 1), &mut rec);
    assert_eq!(sim.aborts(), [sim.seen()[0].addr]);
    assert_eq!(sim.held_count(), 0);

    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::Aborted));
    assert_eq!(rec.status(2), Some(RequestStatus::Success));
    assert_eq!(adapter.outstanding(), 0);
    assert_eq!(adapter.busy_luns(), 0);
}

#[test]
fn test_abort_racing_completion() {
    let (sim, mut adapter, mut rec) = ready();
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    // Completion is already in the inbound ring when the abort goes out
    adapter.start_io(abort(2, 0, 0, 1), &mut rec);
    assert_eq!(sim.aborts().len(), 1);

    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::Success));
    assert_eq!(rec.status(2), Some(RequestStatus::AbortFailed));
    assert_eq!(rec.count(1), 1);
    assert_eq!(adapter.outstanding(), 0);
}

#[test]
fn test_abort_answered_with_unexpected_code() {
    let (sim, mut adapter, mut rec) = ready();
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    sim.set_port_busy(true);
    adapter.start_io(abort(2, 0, 0, 1), &mut rec);
    assert!(adapter.pending_retry());
    sim.inject_completion(InboundCode::Error, sim.seen()[0].addr);

    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::Success));
    assert_eq!(rec.status(2), Some(RequestStatus::AbortFailed));
    assert!(rec.errors.contains(&(ErrorCode::InternalAdapterError, detail::NO_REQUEST | 0x04)));
    assert_eq!(rec.count(2), 1);
    assert_eq!(adapter.outstanding(), 0);
}

#[test]
fn test_abort_after_completion_drained() {
    let (sim, mut adapter, mut rec) = ready();
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    adapter.interrupt(&mut rec);
    adapter.start_io(abort(2, 0, 0, 1), &mut rec);
    assert_eq!(rec.status(2), Some(RequestStatus::AbortFailed));
    assert!(sim.aborts().is_empty());
}

#[test]
fn test_abort_wrong_victim_or_twice() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    adapter.start_io(abort(2, 0, 1, 1), &mut rec);
    assert_eq!(rec.status(2), Some(RequestStatus::AbortFailed));
    adapter.start_io(abort(3, 0, 0, 99), &mut rec);
    assert_eq!(rec.status(3), Some(RequestStatus::AbortFailed));

    adapter.start_io(abort(4, 0, 0, 1), &mut rec);
    adapter.start_io(abort(5, 0, 0, 1), &mut rec);
    assert_eq!(rec.status(5), Some(RequestStatus::AbortFailed));
    assert_eq!(sim.aborts().len(), 1);

    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::Aborted));
    assert_eq!(rec.status(4), Some(RequestStatus::Success));
}

// =============================================================================
// Bus Reset and Power
// =============================================================================

#[test]
fn test_bus_reset_fails_everything_in_flight() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    for target in 0..3u8 {
        adapter.start_io(read(target as u32 + 1, target, 0, 512), &mut rec);
    }
    adapter.start_io(abort(10, 0, 0, 1), &mut rec);
    sim.clear_history();

    adapter.start_io(Request::ResetBus { tag: RequestTag(99), path: 0 }, &mut rec);
    for tag in [1, 2, 3, 10] {
        assert_eq!(rec.status(tag), Some(RequestStatus::BusReset), "tag {}", tag);
        assert_eq!(rec.count(tag), 1);
    }
    assert_eq!(rec.status(99), Some(RequestStatus::Success));
    assert_eq!(adapter.outstanding(), 0);
    assert_eq!(adapter.busy_luns(), 0);
    assert!(adapter.rings_clear());
    assert_eq!(sim.held_count(), 0);
    assert_eq!(sim.hard_resets(), 2);
    assert_eq!(
        opcodes(&sim),
        [
            AdapterCommand::MailboxInit.opcode(),
            AdapterCommand::SetTransferSpeed.opcode(),
            AdapterCommand::SetBusOnTime.opcode(),
            AdapterCommand::SetBusOffTime.opcode(),
            AdapterCommand::SetSelectionTimeout.opcode(),
        ]
    );

    sim.hold(false);
    adapter.start_io(read(20, 0, 0, 512), &mut rec);
    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(20), Some(RequestStatus::Success));
}

#[test]
fn test_bus_reset_releases_deferred_doorbell() {
    let (sim, mut adapter, mut rec) = ready();
    sim.set_port_busy(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    assert!(adapter.pending_retry());
    sim.set_port_busy(false);
    let before = rec.ready;
    adapter.reset_bus(0, &mut rec).unwrap();
    assert!(!adapter.pending_retry());
    assert_eq!(rec.ready, before + 1);
    assert_eq!(rec.status(1), Some(RequestStatus::BusReset));
}

#[test]
fn test_bus_reset_stuck_adapter() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);
    sim.set_stuck_after_reset(true);
    adapter.start_io(Request::ResetBus { tag: RequestTag(2), path: 0 }, &mut rec);
    assert_eq!(rec.status(1), Some(RequestStatus::BusReset));
    assert_eq!(rec.status(2), Some(RequestStatus::Error));
    assert!(rec.errors.contains(&(ErrorCode::InternalAdapterError, 0x0E80)));
}

#[test]
fn test_scsi_reset_interrupt_reruns_scam() {
    let mut config = AdapterConfig::default();
    config.set_scam(true);
    let (sim, mut adapter, mut rec) = bring_up(FirmwareProfile::scam_capable(), config);
    assert!(adapter.quirks().scam);
    assert_eq!(sim.scam_runs(), 1);

    sim.raise_scsi_reset();
    assert!(adapter.interrupt(&mut rec));
    assert_eq!(rec.bus_resets, 2);
    assert_eq!(sim.scam_runs(), 2);
    assert!(sim.interrupt_pending().is_empty());
}

#[test]
fn test_scam_needs_board_eeprom_and_config() {
    let (sim, adapter, _rec) = bring_up(FirmwareProfile::scam_capable(), AdapterConfig::default());
    assert!(!adapter.quirks().scam);
    assert_eq!(sim.scam_runs(), 0);

    let mut config = AdapterConfig::default();
    config.set_scam(true);
    let profile = FirmwareProfile { eeprom_bus_control: 0x80, ..FirmwareProfile::default() };
    let (sim, adapter, _rec) = bring_up(profile, config);
    assert!(!adapter.quirks().scam);
    assert_eq!(sim.scam_runs(), 0);
}

#[test]
fn test_save_and_restore_state() {
    let (sim, mut adapter, _rec) = ready();
    assert_eq!(adapter.restore_state(), Err(Error::NoSavedState));

    let setup = adapter.save_state().unwrap();
    assert_eq!(setup.mailbox_count(), 8);
    assert_eq!(Some(setup.mailbox_address()), sim.mailbox_base());
    assert_eq!((setup.bus_on_time(), setup.bus_off_time()), (7, 4));
    assert_eq!(adapter.saved_state(), Some(&setup));

    sim.clear_history();
    adapter.restore_state().unwrap();
    assert_eq!(
        opcodes(&sim),
        [
            AdapterCommand::MailboxInit.opcode(),
            AdapterCommand::SetTransferSpeed.opcode(),
            AdapterCommand::SetBusOnTime.opcode(),
            AdapterCommand::SetBusOffTime.opcode(),
        ]
    );
    assert_eq!(sim.commands()[0].params, [8, 0x01, 0x00, 0x00]);
}

#[test]
fn test_stop_and_restart() {
    let (sim, mut adapter, mut rec) = ready();
    sim.hold(true);
    adapter.start_io(read(1, 0, 0, 512), &mut rec);

    adapter.stop().unwrap();
    assert_eq!(sim.hard_resets(), 2);
    assert_eq!(sim.mailbox_base(), None);

    adapter.restart(&mut rec).unwrap();
    assert_eq!(rec.status(1), Some(RequestStatus::BusReset));
    assert_eq!(sim.mailbox_base(), Some(U24::from_be_bytes([0x01, 0x00, 0x00])));
    assert_eq!(adapter.outstanding(), 0);

    sim.hold(false);
    adapter.start_io(read(2, 0, 0, 512), &mut rec);
    adapter.interrupt(&mut rec);
    assert_eq!(rec.status(2), Some(RequestStatus::Success));
}

#[test]
fn test_stop_gives_up_on_stuck_adapter() {
    let (sim, mut adapter, _rec) = ready();
    sim.set_stuck_after_reset(true);
    assert_eq!(adapter.stop(), Err(Error::ResetFailed));
    assert_eq!(sim.hard_resets(), 1 + STOP_ATTEMPTS);
    assert!(adapter.saved_state().is_some());
}

// =============================================================================
// Shared Access
// =============================================================================

#[test]
fn test_shared_adapter_serialises_contexts() {
    let (sim, adapter, mut rec) = ready();
    let shared = SharedAdapter::new(adapter);
    shared.start_io(read(1, 0, 0, 512), &mut rec);

    {
        let _guard = shared.lock();
        assert_eq!(shared.try_interrupt(&mut rec), None);
    }
    assert_eq!(shared.try_interrupt(&mut rec), Some(true));
    assert_eq!(rec.status(1), Some(RequestStatus::Success));

    shared.reset_bus(0, &mut rec).unwrap();
    assert_eq!(sim.hard_resets(), 2);
    assert_eq!(shared.into_inner().outstanding(), 0);
}
