//! # Firmware Quirk Detection
//!
//! Probes run once at attach. The 154x family spans a decade of boards
//! and firmware, and several revisions misbehave in ways that can only be
//! told apart by their identity bytes:
//!
//! - first-generation boards have no scatter/gather at all
//! - some 1540A/B firmware corrupts multi-segment writes
//! - hardware '0' with firmware '3' has the same defect
//! - boards with extended BIOS translation lock the mailbox interface
//!   until an unlock code is sent
//!
//! Every probe is best-effort. A failed probe selects the conservative
//! behaviour: legacy opcodes, no scatter/gather.

use crate::config::AdapterConfig;
use crate::encoder::CcbEncoding;
use crate::error::HandshakeTimeout;
use crate::handshake::{Handshake, OnTimeout};
use aha154x_hal::command::{board, lock, params, AdapterCommand};
use aha154x_hal::regs::{RegisterIo, Status};
use aha154x_hal::timer::Stall;

/// Identity bytes returned by inquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardId {
    /// Board type
    pub board: u8,
    /// Special options
    pub options: u8,
    /// Hardware revision
    pub hardware: u8,
    /// Firmware revision
    pub firmware: u8,
}

impl BoardId {
    /// One of the first-generation boards
    pub fn is_old_board(&self) -> bool {
        board::OLD_BOARD_IDS.contains(&self.board)
    }

    /// Longest CDB the board accepts, if limited
    pub fn max_cdb_length(&self) -> Option<u8> {
        (self.board < board::LONG_CDB_BOARD).then_some(10)
    }
}

/// Adapter resources from return-configuration-data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterResources {
    /// ISA DMA channel, if one is jumpered
    pub dma_channel: Option<u8>,
    /// Interrupt line, if one is jumpered
    pub irq: Option<u8>,
    /// The adapter's own SCSI id
    pub host_id: u8,
}

impl AdapterResources {
    /// Decode the three reply bytes
    pub fn from_reply(reply: [u8; params::CONFIGURATION_LEN]) -> Self {
        let lowest = |mask: u8| (mask != 0).then(|| mask.trailing_zeros() as u8);
        Self {
            dma_channel: lowest(reply[0]),
            irq: lowest(reply[1]).map(|bit| 9 + bit),
            host_id: reply[2] & 0x07,
        }
    }
}

/// What the probes decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quirks {
    /// Identity, if inquiry answered
    pub board: Option<BoardId>,
    /// Whether multi-descriptor lists are safe
    pub scatter_gather: bool,
    /// Opcode pair to start with
    pub encoding: CcbEncoding,
    /// Lock type to clear before every mailbox initialisation
    pub mailbox_lock: Option<u8>,
    /// Whether SCAM is issued after bus resets
    pub scam: bool,
}

impl Quirks {
    /// Behaviour assumed when nothing could be probed
    pub const CONSERVATIVE: Self = Self {
        board: None,
        scatter_gather: false,
        encoding: CcbEncoding::Legacy,
        mailbox_lock: None,
        scam: false,
    };

    /// Longest CDB accepted, `None` for no limit beyond the CCB's own
    pub fn max_cdb_length(&self, config: &AdapterConfig) -> Option<u8> {
        match (config.max_cdb_length(), self.board) {
            (Some(max), _) => Some(max),
            (None, Some(id)) => id.max_cdb_length(),
            (None, None) => Some(10),
        }
    }
}

/// Run every probe
pub fn detect<R: RegisterIo, C: Stall>(hs: &mut Handshake<R, C>, config: &AdapterConfig) -> Quirks {
    let id = match inquiry(hs) {
        Ok(id) => id,
        Err(_) => {
            log::warn!("inquiry failed, assuming legacy firmware without scatter/gather");
            return Quirks { mailbox_lock: query_mailbox_lock(hs), ..Quirks::CONSERVATIVE };
        }
    };
    log::info!(
        "board {:#04x} hardware {:#04x} firmware {:#04x}",
        id.board,
        id.hardware,
        id.firmware
    );
    let scatter_gather = scatter_gather_supported(hs, &id);
    let encoding = if id.is_old_board() { CcbEncoding::Legacy } else { CcbEncoding::Residual };
    let scam = config.scam() && scam_enabled(hs, &id);
    let quirks = Quirks {
        board: Some(id),
        scatter_gather,
        encoding,
        mailbox_lock: query_mailbox_lock(hs),
        scam,
    };
    log::debug!("{:?}", quirks);
    quirks
}

/// Read board, hardware and firmware identity
pub fn inquiry<R: RegisterIo, C: Stall>(hs: &mut Handshake<R, C>) -> Result<BoardId, HandshakeTimeout> {
    hs.acknowledge();
    hs.write_command(AdapterCommand::Inquiry.opcode(), false)?;
    let mut reply = [0u8; params::INQUIRY_LEN];
    hs.read_reply(&mut reply, OnTimeout::Fail)?;
    hs.wait_complete()?;
    Ok(BoardId { board: reply[0], options: reply[1], hardware: reply[2], firmware: reply[3] })
}

/// Probe the 1540A/B scatter/gather firmware defect
///
/// Returns `true` if the defect is present or the probe could not finish.
pub fn firmware_bug<R: RegisterIo, C: Stall>(hs: &mut Handshake<R, C>) -> bool {
    let probe = |hs: &mut Handshake<R, C>| -> Result<bool, HandshakeTimeout> {
        hs.write_command(AdapterCommand::ReturnSetupData.opcode(), false)?;
        hs.write_data(params::SETUP_DATA_LEN as u8)?;
        let mut setup = [0u8; params::SETUP_DATA_LEN];
        hs.read_reply(&mut setup, OnTimeout::Fail)?;
        hs.acknowledge_complete();

        hs.write_command(AdapterCommand::SetAdapterOptions.opcode(), false)?;
        hs.stall(500);
        if hs.status().contains(Status::INVALID_COMMAND) {
            hs.acknowledge();
            return Ok(true);
        }
        hs.write_data(0x01)?;
        hs.write_data(setup[params::SETUP_DATA_LEN - 1])?;
        hs.acknowledge();
        Ok(false)
    };
    probe(hs).unwrap_or(true)
}

/// Decide whether scatter/gather lists are safe on this board
pub fn scatter_gather_supported<R: RegisterIo, C: Stall>(hs: &mut Handshake<R, C>, id: &BoardId) -> bool {
    if id.is_old_board() {
        log::info!("first-generation board, scatter/gather disabled");
        return false;
    }
    if id.board == board::AHA_154X_A && firmware_bug(hs) {
        log::warn!("scatter/gather firmware defect detected");
        return false;
    }
    if id.hardware != board::BAD_HARDWARE_ID || id.firmware != board::BAD_FIRMWARE_ID {
        return true;
    }
    log::warn!("hardware/firmware revision with scatter/gather defect");
    hs.acknowledge();
    false
}

/// Ask the BIOS interface whether the mailboxes are locked
///
/// Returns the lock type to send back with the unlock code.
pub fn query_mailbox_lock<R: RegisterIo, C: Stall>(hs: &mut Handshake<R, C>) -> Option<u8> {
    hs.write_command(AdapterCommand::GetBiosInfo.opcode(), true).ok()?;
    let translation = hs.read_byte(OnTimeout::Proceed).ok()?;
    let lock_type = hs.read_byte(OnTimeout::Proceed).ok()?;
    hs.acknowledge_complete();
    let locked = if translation == lock::TRANSLATION_ENABLED {
        lock_type == lock::TRANSLATION_LOCK || lock_type == lock::DYNAMIC_SCAN_LOCK
    } else {
        lock_type == lock::DYNAMIC_SCAN_LOCK
    };
    if locked {
        log::info!("mailbox interface locked (type {:#04x})", lock_type);
    }
    locked.then_some(lock_type)
}

/// Send the unlock code for `lock_type`
pub fn unlock_mailboxes<R: RegisterIo, C: Stall>(
    hs: &mut Handshake<R, C>,
    lock_type: u8,
) -> Result<(), HandshakeTimeout> {
    hs.command(AdapterCommand::SetMailboxInterface, &[lock::MAILBOX_UNLOCK, lock_type])?;
    hs.acknowledge_complete();
    Ok(())
}

/// Whether SCAM is enabled in the adapter's EEPROM
pub fn scam_enabled<R: RegisterIo, C: Stall>(hs: &mut Handshake<R, C>, id: &BoardId) -> bool {
    if id.board < board::SCAM_BOARD {
        return false;
    }
    let probe = |hs: &mut Handshake<R, C>| -> Result<u8, HandshakeTimeout> {
        hs.write_command(AdapterCommand::ReturnEeprom.opcode(), false)?;
        hs.write_data(params::EEPROM_CONFIGURED)?;
        hs.write_data(1)?;
        hs.write_data(params::EEPROM_BUS_CONTROL)?;
        let flags = hs.read_byte(OnTimeout::Fail)?;
        hs.acknowledge_complete();
        Ok(flags)
    };
    probe(hs).map(|flags| flags & params::EEPROM_SCAM_ENABLED != 0).unwrap_or(false)
}

/// Read DMA channel, IRQ and adapter SCSI id
pub fn read_resources<R: RegisterIo, C: Stall>(
    hs: &mut Handshake<R, C>,
) -> Result<AdapterResources, HandshakeTimeout> {
    hs.command(AdapterCommand::ReturnConfiguration, &[])?;
    let mut reply = [0u8; params::CONFIGURATION_LEN];
    hs.read_reply(&mut reply, OnTimeout::Fail)?;
    hs.acknowledge_complete();
    Ok(AdapterResources::from_reply(reply))
}
