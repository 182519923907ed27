//! # Firmware Model
//!
//! What the adapter's microcontroller does, as far as the driver can
//! observe it: a byte-stream command interpreter behind the three
//! registers, and a mailbox engine that picks CCBs out of the shared DMA
//! window and answers through the inbound ring.
//!
//! CCBs are handled synchronously when the doorbell is rung. A held CCB
//! stays with the "firmware" until the test releases it, which is how
//! aborts, bus resets and deferred doorbells get something to race
//! against.

use aha154x_hal::command::{lock, AdapterCommand, CcbOpcode, HostStatus, InboundCode, OutboundCode};
use aha154x_hal::dma::{DmaWindow, HeapDma};
use aha154x_hal::layout::{ccb, MAILBOX_ENTRY_SIZE, SG_DESCRIPTOR_SIZE};
use aha154x_hal::regs::{Control, InterruptFlags, Status};
use aha154x_hal::{PhysAddr, U24};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

/// Low 24 bits of `value`
fn u24(value: u32) -> U24 {
    let [_, hi, mid, lo] = value.to_be_bytes();
    U24::from_be_bytes([hi, mid, lo])
}

// =============================================================================
// Test-Facing Types
// =============================================================================

/// How the simulated target answers a CCB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Inbound mailbox code
    pub code: InboundCode,
    /// Host status written into the CCB
    pub host_status: u8,
    /// Target status written into the CCB
    pub target_status: u8,
    /// Residual written into the data-length field (residual opcodes only)
    pub residual: u32,
}

impl Outcome {
    /// Clean completion
    pub const SUCCESS: Self = Self { code: InboundCode::Success, host_status: 0, target_status: 0, residual: 0 };

    /// Nobody answered selection
    pub const SELECTION_TIMEOUT: Self = Self::error(HostStatus::SelectionTimeout.as_u8(), 0);

    /// Success with `residual` bytes untransferred
    pub const fn underrun(residual: u32) -> Self {
        Self { residual, ..Self::SUCCESS }
    }

    /// Error completion
    pub const fn error(host_status: u8, target_status: u8) -> Self {
        Self { code: InboundCode::Error, host_status, target_status, residual: 0 }
    }
}

/// Identity and behaviour of the simulated board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareProfile {
    /// Inquiry reply: board, options, hardware, firmware
    pub inquiry: [u8; 4],
    /// Return-configuration reply: DMA mask, IRQ mask, SCSI id
    pub configuration: [u8; 3],
    /// Get-BIOS-info reply: translation flag, lock type
    pub bios_info: [u8; 2],
    /// Set-adapter-options is rejected (1540A/B scatter/gather defect)
    pub firmware_bug: bool,
    /// EEPROM bus-control byte
    pub eeprom_bus_control: u8,
    /// Report a diagnostic failure in the status register
    pub diag_failed: bool,
    /// Status reads that show busy after a hard reset
    pub reset_busy_polls: u32,
}

impl Default for FirmwareProfile {
    fn default() -> Self {
        Self {
            inquiry: [b'E', 0x00, b'1', b'1'],
            configuration: [0x20, 0x04, 0x07],
            bios_info: [0x00, 0x00],
            firmware_bug: false,
            eeprom_bus_control: 0x00,
            diag_failed: false,
            reset_busy_polls: 3,
        }
    }
}

impl FirmwareProfile {
    /// A 1540A/B with the scatter/gather defect
    pub fn aha1540a_buggy() -> Self {
        Self { inquiry: [b'A', 0x00, b'1', b'1'], firmware_bug: true, ..Self::default() }
    }

    /// First-generation board without scatter/gather
    pub fn first_generation() -> Self {
        Self { inquiry: [0x30, 0x00, b'1', b'0'], ..Self::default() }
    }

    /// A 1542CP-class board with SCAM enabled in EEPROM
    pub fn scam_capable() -> Self {
        Self { inquiry: [b'F', 0x00, b'1', b'1'], eeprom_bus_control: 0x80, ..Self::default() }
    }

    /// BIOS translation active with the mailbox interface locked
    pub fn locked(lock_type: u8) -> Self {
        Self { bios_info: [lock::TRANSLATION_ENABLED, lock_type], ..Self::default() }
    }
}

/// A CCB the firmware picked up, as decoded from the window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenCcb {
    /// Physical address it was posted with
    pub addr: U24,
    /// Operation code
    pub opcode: u8,
    /// Target id
    pub target: u8,
    /// Logical unit
    pub lun: u8,
    /// Direction bits of the control byte
    pub direction: u8,
    /// Command bytes
    pub cdb: Vec<u8>,
    /// Data-length field
    pub data_length: u32,
    /// Data-pointer field
    pub data_pointer: u32,
    /// Data runs as `(address, length)`, read through the list if there is one
    pub segments: Vec<(u32, u32)>,
}

/// One adapter command as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    /// Opcode byte
    pub opcode: u8,
    /// Parameter bytes
    pub params: Vec<u8>,
}

// =============================================================================
// Firmware State
// =============================================================================

struct Pending {
    opcode: AdapterCommand,
    params: Vec<u8>,
    expected: usize,
}

pub(crate) struct Firmware {
    pub(crate) profile: FirmwareProfile,
    dma: HeapDma,

    // Register side
    pub(crate) flags: InterruptFlags,
    reply: VecDeque<u8>,
    last_data: u8,
    pending: Option<Pending>,
    invalid: bool,
    busy_polls: u32,
    pub(crate) port_busy: bool,
    pub(crate) stuck_after_reset: bool,

    // Adapter side
    mailbox_init_required: bool,
    pub(crate) mailbox_count: u8,
    pub(crate) mailbox_base: Option<U24>,
    pub(crate) locked: bool,
    pub(crate) setup: [u8; 17],
    pub(crate) selection_timeout: [u8; 4],
    out_cursor: usize,
    in_cursor: usize,
    pub(crate) held: Vec<U24>,
    pub(crate) hold: bool,
    pub(crate) outcomes: BTreeMap<u8, Outcome>,
    pub(crate) reject_residual: u32,

    // Observations
    pub(crate) commands: Vec<CommandRecord>,
    pub(crate) seen: Vec<SeenCcb>,
    pub(crate) aborts: Vec<U24>,
    pub(crate) doorbells: usize,
    pub(crate) hard_resets: usize,
    pub(crate) scam_runs: usize,
}

impl Firmware {
    pub(crate) fn new(profile: FirmwareProfile, dma: HeapDma) -> Self {
        let locked = profile.bios_info[1] != 0;
        Self {
            profile,
            dma,
            flags: InterruptFlags::empty(),
            reply: VecDeque::new(),
            last_data: 0,
            pending: None,
            invalid: false,
            busy_polls: 0,
            port_busy: false,
            stuck_after_reset: false,
            mailbox_init_required: true,
            mailbox_count: 0,
            mailbox_base: None,
            locked,
            setup: [0x00, 0x00, 7, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            selection_timeout: [0; 4],
            out_cursor: 0,
            in_cursor: 0,
            held: Vec::new(),
            hold: false,
            outcomes: BTreeMap::new(),
            reject_residual: 0,
            commands: Vec::new(),
            seen: Vec::new(),
            aborts: Vec::new(),
            doorbells: 0,
            hard_resets: 0,
            scam_runs: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Registers
    // -------------------------------------------------------------------------

    pub(crate) fn status(&mut self) -> Status {
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return Status::SELF_TEST;
        }
        let mut status = Status::empty();
        if self.pending.is_none() && self.reply.is_empty() {
            status |= Status::IDLE;
        }
        if self.mailbox_init_required {
            status |= Status::MAILBOX_INIT_REQUIRED;
        }
        if !self.reply.is_empty() {
            status |= Status::DATA_IN_FULL;
        }
        if self.port_busy {
            status |= Status::COMMAND_OUT_FULL;
        }
        if self.invalid {
            status |= Status::INVALID_COMMAND;
        }
        if self.profile.diag_failed {
            status |= Status::DIAG_FAILED;
        }
        status
    }

    pub(crate) fn read_data(&mut self) -> u8 {
        if let Some(byte) = self.reply.pop_front() {
            self.last_data = byte;
        }
        self.last_data
    }

    pub(crate) fn control(&mut self, bits: Control) {
        if bits.contains(Control::HARD_RESET) {
            self.hard_reset();
        }
        if bits.contains(Control::INTERRUPT_RESET) {
            self.flags = InterruptFlags::empty();
            self.invalid = false;
        }
        if bits.contains(Control::SCSI_BUS_RESET) {
            self.held.clear();
            self.flags |= InterruptFlags::ANY | InterruptFlags::SCSI_RESET_DETECTED;
        }
    }

    pub(crate) fn write_data(&mut self, byte: u8) {
        if self.port_busy {
            log::warn!("sim: byte {:#04x} written while the port is full", byte);
            return;
        }
        match self.pending.take() {
            Some(mut pending) => {
                pending.params.push(byte);
                if pending.params.len() == pending.expected {
                    self.execute(pending.opcode, pending.params);
                } else {
                    self.pending = Some(pending);
                }
            }
            None => self.begin(byte),
        }
    }

    fn hard_reset(&mut self) {
        self.hard_resets += 1;
        self.flags = InterruptFlags::empty();
        self.reply.clear();
        self.pending = None;
        self.invalid = false;
        self.mailbox_init_required = true;
        self.mailbox_count = 0;
        self.mailbox_base = None;
        self.out_cursor = 0;
        self.in_cursor = 0;
        self.held.clear();
        self.locked = self.profile.bios_info[1] != 0;
        self.busy_polls = if self.stuck_after_reset { u32::MAX } else { self.profile.reset_busy_polls };
    }

    pub(crate) fn recover(&mut self) {
        self.stuck_after_reset = false;
        self.busy_polls = 0;
    }

    // -------------------------------------------------------------------------
    // Command Interpreter
    // -------------------------------------------------------------------------

    fn begin(&mut self, opcode: u8) {
        self.invalid = false;
        let Some(command) = AdapterCommand::from_u8(opcode) else {
            log::debug!("sim: invalid opcode {:#04x}", opcode);
            self.commands.push(CommandRecord { opcode, params: Vec::new() });
            self.reject();
            return;
        };
        if command == AdapterCommand::SetAdapterOptions && self.profile.firmware_bug {
            self.commands.push(CommandRecord { opcode, params: Vec::new() });
            self.reject();
            return;
        }
        let expected = match command {
            AdapterCommand::MailboxInit | AdapterCommand::SetSelectionTimeout => 4,
            AdapterCommand::ReturnEeprom => 3,
            AdapterCommand::SetAdapterOptions | AdapterCommand::SetMailboxInterface => 2,
            AdapterCommand::SetBusOnTime
            | AdapterCommand::SetBusOffTime
            | AdapterCommand::SetTransferSpeed
            | AdapterCommand::ReturnSetupData => 1,
            AdapterCommand::StartCommand
            | AdapterCommand::Inquiry
            | AdapterCommand::ReturnConfiguration
            | AdapterCommand::GetBiosInfo
            | AdapterCommand::PerformScam => 0,
        };
        if expected == 0 {
            self.execute(command, Vec::new());
        } else {
            self.pending = Some(Pending { opcode: command, params: Vec::new(), expected });
        }
    }

    fn reject(&mut self) {
        self.invalid = true;
        self.raise_complete();
    }

    fn raise_complete(&mut self) {
        self.flags |= InterruptFlags::ANY | InterruptFlags::COMMAND_COMPLETE;
    }

    fn execute(&mut self, command: AdapterCommand, params: Vec<u8>) {
        log::trace!("sim: {:?} {:02x?}", command, params);
        self.commands.push(CommandRecord { opcode: command.opcode(), params: params.clone() });
        match command {
            AdapterCommand::StartCommand => {
                self.doorbells += 1;
                self.scan_outbound();
                return;
            }
            AdapterCommand::MailboxInit => {
                if self.locked {
                    log::debug!("sim: mailbox init while locked");
                    self.reject();
                    return;
                }
                self.mailbox_count = params[0];
                self.mailbox_base = Some(U24::from_be_bytes([params[1], params[2], params[3]]));
                self.mailbox_init_required = false;
                self.out_cursor = 0;
                self.in_cursor = 0;
                self.setup[4..8].copy_from_slice(&params);
            }
            AdapterCommand::Inquiry => self.reply.extend(self.profile.inquiry),
            AdapterCommand::SetSelectionTimeout => self.selection_timeout.copy_from_slice(&params),
            AdapterCommand::SetTransferSpeed => self.setup[1] = params[0],
            AdapterCommand::SetBusOnTime => self.setup[2] = params[0],
            AdapterCommand::SetBusOffTime => self.setup[3] = params[0],
            AdapterCommand::ReturnConfiguration => self.reply.extend(self.profile.configuration),
            AdapterCommand::ReturnSetupData => {
                let len = (params[0] as usize).min(self.setup.len());
                self.reply.extend(&self.setup[..len]);
            }
            AdapterCommand::SetAdapterOptions => {}
            AdapterCommand::ReturnEeprom => self.reply.push_back(self.profile.eeprom_bus_control),
            AdapterCommand::GetBiosInfo => self.reply.extend(self.profile.bios_info),
            AdapterCommand::SetMailboxInterface => {
                if params[0] == lock::MAILBOX_UNLOCK && params[1] == self.profile.bios_info[1] {
                    self.locked = false;
                }
            }
            AdapterCommand::PerformScam => self.scam_runs += 1,
        }
        self.raise_complete();
    }

    // -------------------------------------------------------------------------
    // Mailbox Engine
    // -------------------------------------------------------------------------

    fn ring_offset(&self) -> Option<usize> {
        if self.mailbox_count == 0 {
            return None;
        }
        let base = self.mailbox_base?;
        self.dma.offset_of(PhysAddr::new(base.get() as u64))
    }

    fn ccb_offset(&self, addr: U24) -> Option<usize> {
        self.dma.offset_of(PhysAddr::new(addr.get() as u64))
    }

    fn scan_outbound(&mut self) {
        let Some(base) = self.ring_offset() else {
            log::warn!("sim: doorbell before mailbox init");
            return;
        };
        let count = self.mailbox_count as usize;
        let start = self.out_cursor;
        for step in 0..count {
            let index = (start + step) % count;
            let entry = base + index * MAILBOX_ENTRY_SIZE;
            let code = self.dma.read_u8(entry);
            if code == OutboundCode::Free as u8 {
                continue;
            }
            let mut addr = [0u8; 3];
            self.dma.read(entry + 1, &mut addr);
            self.dma.write_u8(entry, OutboundCode::Free as u8);
            self.out_cursor = (index + 1) % count;
            let addr = U24::from_be_bytes(addr);
            match OutboundCode::from_u8(code) {
                Some(OutboundCode::Start) => self.start_ccb(addr),
                Some(OutboundCode::Abort) => self.abort_ccb(addr),
                _ => log::warn!("sim: MBO[{}] bad code {:#04x}", index, code),
            }
        }
    }

    fn decode_ccb(&self, addr: U24, offset: usize) -> SeenCcb {
        let mut bytes = [0u8; ccb::SIZE];
        self.dma.read(offset, &mut bytes);
        let field = |at: usize| U24::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2]]).get();
        let opcode = bytes[ccb::OPCODE];
        let data_length = field(ccb::DATA_LENGTH);
        let data_pointer = field(ccb::DATA_POINTER);
        let cdb_len = (bytes[ccb::CDB_LENGTH] as usize).min(ccb::SIZE - ccb::CDB);
        let mut segments = Vec::new();
        if CcbOpcode::from_u8(opcode).is_some_and(CcbOpcode::is_scatter_gather) {
            let list = self.dma.offset_of(PhysAddr::new(data_pointer as u64));
            for i in 0..data_length as usize / SG_DESCRIPTOR_SIZE {
                let Some(list) = list else { break };
                let mut desc = [0u8; SG_DESCRIPTOR_SIZE];
                self.dma.read(list + i * SG_DESCRIPTOR_SIZE, &mut desc);
                let len = U24::from_be_bytes([desc[0], desc[1], desc[2]]).get();
                let at = U24::from_be_bytes([desc[3], desc[4], desc[5]]).get();
                segments.push((at, len));
            }
        } else if data_length > 0 {
            segments.push((data_pointer, data_length));
        }
        SeenCcb {
            addr,
            opcode,
            target: bytes[ccb::CONTROL] >> 5,
            lun: bytes[ccb::CONTROL] & 0x07,
            direction: bytes[ccb::CONTROL] & 0x18,
            cdb: bytes[ccb::CDB..ccb::CDB + cdb_len].to_vec(),
            data_length,
            data_pointer,
            segments,
        }
    }

    fn start_ccb(&mut self, addr: U24) {
        let Some(offset) = self.ccb_offset(addr) else {
            log::warn!("sim: CCB {} outside the window", addr);
            return;
        };
        let seen = self.decode_ccb(addr, offset);
        let opcode = CcbOpcode::from_u8(seen.opcode);
        let target = seen.target;
        self.seen.push(seen);

        match opcode {
            None => return self.finish_ccb(addr, Outcome::error(HostStatus::InvalidOpcode.as_u8(), 0)),
            Some(op) if op.reports_residual() && self.reject_residual > 0 => {
                self.reject_residual -= 1;
                return self.finish_ccb(addr, Outcome::error(HostStatus::InvalidOpcode.as_u8(), 0));
            }
            Some(_) => {}
        }
        if self.hold {
            self.held.push(addr);
            return;
        }
        let outcome = self.outcomes.get(&target).copied().unwrap_or(Outcome::SUCCESS);
        self.finish_ccb(addr, outcome);
    }

    fn abort_ccb(&mut self, addr: U24) {
        self.aborts.push(addr);
        match self.held.iter().position(|held| *held == addr) {
            Some(pos) => {
                self.held.remove(pos);
                self.post_inbound(InboundCode::Aborted.as_u8(), addr);
            }
            None => self.post_inbound(InboundCode::NotFound.as_u8(), addr),
        }
    }

    pub(crate) fn finish_ccb(&mut self, addr: U24, outcome: Outcome) {
        let Some(offset) = self.ccb_offset(addr) else {
            return;
        };
        self.dma.write_u8(offset + ccb::HOST_STATUS, outcome.host_status);
        self.dma.write_u8(offset + ccb::TARGET_STATUS, outcome.target_status);
        let opcode = CcbOpcode::from_u8(self.dma.read_u8(offset + ccb::OPCODE));
        if opcode.is_some_and(CcbOpcode::reports_residual) {
            self.dma.write(offset + ccb::DATA_LENGTH, &u24(outcome.residual).to_be_bytes());
        }
        self.post_inbound(outcome.code.as_u8(), addr);
    }

    /// Fill the next inbound entry and raise mailbox-in-full
    pub(crate) fn post_inbound(&mut self, code: u8, addr: U24) {
        let Some(base) = self.ring_offset() else {
            log::warn!("sim: completion before mailbox init");
            return;
        };
        let count = self.mailbox_count as usize;
        let entry = base + (count + self.in_cursor) * MAILBOX_ENTRY_SIZE;
        if self.dma.read_u8(entry) != InboundCode::Free.as_u8() {
            log::warn!("sim: MBI[{}] overwritten while full", self.in_cursor);
        }
        self.dma.write(entry + 1, &addr.to_be_bytes());
        self.dma.write_u8(entry, code);
        self.in_cursor = (self.in_cursor + 1) % count;
        self.flags |= InterruptFlags::ANY | InterruptFlags::MAILBOX_IN_FULL;
    }

    /// Outcome for a held CCB, decided by its target
    pub(crate) fn outcome_for(&self, addr: U24) -> Outcome {
        let target = self.seen.iter().rev().find(|seen| seen.addr == addr).map(|seen| seen.target);
        target
            .and_then(|target| self.outcomes.get(&target).copied())
            .unwrap_or(Outcome::SUCCESS)
    }
}
