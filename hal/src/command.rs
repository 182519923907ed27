//! # Adapter Command Set
//!
//! Opcodes written through the command register, mailbox codes exchanged
//! through the rings, and the status bytes the firmware writes back into a
//! Command Control Block (CCB).

/// Adapter-level opcodes (written to the command register)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterCommand {
    /// Set mailbox count and base address
    MailboxInit = 0x01,
    /// Doorbell: an outbound mailbox holds a new entry
    StartCommand = 0x02,
    /// Return board id, special options, hardware and firmware revision
    Inquiry = 0x04,
    /// Set the selection timeout
    SetSelectionTimeout = 0x06,
    /// Set the bus-on time (DMA burst length)
    SetBusOnTime = 0x07,
    /// Set the bus-off time between bursts
    SetBusOffTime = 0x08,
    /// Force the DMA transfer speed
    SetTransferSpeed = 0x09,
    /// Return DMA channel, IRQ and adapter SCSI id
    ReturnConfiguration = 0x0B,
    /// Return setup data
    ReturnSetupData = 0x0D,
    /// Set adapter options
    SetAdapterOptions = 0x21,
    /// Read bytes from the configuration EEPROM
    ReturnEeprom = 0x23,
    /// Return BIOS translation and mailbox lock state
    GetBiosInfo = 0x28,
    /// Lock or unlock the mailbox interface
    SetMailboxInterface = 0x29,
    /// Run the SCAM id-assignment protocol
    PerformScam = 0x58,
}

impl AdapterCommand {
    /// Raw opcode byte
    #[inline]
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Decode a raw opcode byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::MailboxInit,
            0x02 => Self::StartCommand,
            0x04 => Self::Inquiry,
            0x06 => Self::SetSelectionTimeout,
            0x07 => Self::SetBusOnTime,
            0x08 => Self::SetBusOffTime,
            0x09 => Self::SetTransferSpeed,
            0x0B => Self::ReturnConfiguration,
            0x0D => Self::ReturnSetupData,
            0x21 => Self::SetAdapterOptions,
            0x23 => Self::ReturnEeprom,
            0x28 => Self::GetBiosInfo,
            0x29 => Self::SetMailboxInterface,
            0x58 => Self::PerformScam,
            _ => return None,
        })
    }
}

/// Outbound mailbox codes (host to firmware)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundCode {
    /// Slot available
    Free = 0,
    /// Start the referenced CCB
    Start = 1,
    /// Abort the referenced CCB
    Abort = 2,
}

impl OutboundCode {
    /// Decode a raw byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Free),
            1 => Some(Self::Start),
            2 => Some(Self::Abort),
            _ => None,
        }
    }
}

/// Inbound mailbox codes (firmware to host)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundCode {
    /// Slot available
    Free,
    /// CCB completed without error
    Success,
    /// CCB was aborted at host request
    Aborted,
    /// Abort target was not found
    NotFound,
    /// CCB completed with error
    Error,
    /// Code the firmware is not documented to produce
    Unknown(u8),
}

impl InboundCode {
    /// Decode a raw byte
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Free,
            1 => Self::Success,
            2 => Self::Aborted,
            3 => Self::NotFound,
            4 => Self::Error,
            other => Self::Unknown(other),
        }
    }

    /// Raw byte
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Success => 1,
            Self::Aborted => 2,
            Self::NotFound => 3,
            Self::Error => 4,
            Self::Unknown(other) => other,
        }
    }
}

/// CCB operation codes
///
/// The residual variants write the untransferred byte count back into the
/// CCB data-length field. Early firmware rejects them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcbOpcode {
    /// Direct data pointer, no residual
    LegacyInitiator = 0x00,
    /// Scatter/gather list, no residual
    LegacyScatterGather = 0x02,
    /// Direct data pointer with residual
    Initiator = 0x03,
    /// Scatter/gather list with residual
    ScatterGather = 0x04,
}

impl CcbOpcode {
    /// Decode a raw byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::LegacyInitiator),
            0x02 => Some(Self::LegacyScatterGather),
            0x03 => Some(Self::Initiator),
            0x04 => Some(Self::ScatterGather),
            _ => None,
        }
    }

    /// Whether the firmware writes a residual count for this opcode
    pub const fn reports_residual(self) -> bool {
        matches!(self, Self::Initiator | Self::ScatterGather)
    }

    /// Whether the data pointer refers to a descriptor list
    pub const fn is_scatter_gather(self) -> bool {
        matches!(self, Self::LegacyScatterGather | Self::ScatterGather)
    }
}

/// CCB host status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// No adapter-detected error
    Complete,
    /// Target did not respond to selection
    SelectionTimeout,
    /// Data overrun or underrun
    DataOverUnderRun,
    /// Target dropped off the bus unexpectedly
    UnexpectedBusFree,
    /// Target phase sequence failure
    PhaseSequenceFailure,
    /// Invalid outbound mailbox command
    BadMailboxCommand,
    /// Invalid CCB operation code
    InvalidOpcode,
    /// Linked CCB targets a different LUN
    BadLinkedLun,
    /// Invalid target direction from host
    InvalidDirection,
    /// Duplicate CCB received
    DuplicateCcb,
    /// Invalid CCB or segment list parameter
    InvalidCcb,
    /// Undocumented value
    Other(u8),
}

impl HostStatus {
    /// Decode a raw byte
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Complete,
            0x11 => Self::SelectionTimeout,
            0x12 => Self::DataOverUnderRun,
            0x13 => Self::UnexpectedBusFree,
            0x14 => Self::PhaseSequenceFailure,
            0x15 => Self::BadMailboxCommand,
            0x16 => Self::InvalidOpcode,
            0x17 => Self::BadLinkedLun,
            0x18 => Self::InvalidDirection,
            0x19 => Self::DuplicateCcb,
            0x1A => Self::InvalidCcb,
            other => Self::Other(other),
        }
    }

    /// Raw byte
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Complete => 0x00,
            Self::SelectionTimeout => 0x11,
            Self::DataOverUnderRun => 0x12,
            Self::UnexpectedBusFree => 0x13,
            Self::PhaseSequenceFailure => 0x14,
            Self::BadMailboxCommand => 0x15,
            Self::InvalidOpcode => 0x16,
            Self::BadLinkedLun => 0x17,
            Self::InvalidDirection => 0x18,
            Self::DuplicateCcb => 0x19,
            Self::InvalidCcb => 0x1A,
            Self::Other(other) => other,
        }
    }
}

/// SCSI CHECK CONDITION target status
pub const CHECK_CONDITION: u8 = 0x02;

/// Target status preset before submission; firmware overwrites it
pub const TARGET_STATUS_PENDING: u8 = 0xFF;

/// Request-sense length meaning "no automatic request sense"
pub const NO_AUTO_SENSE: u8 = 0x01;

/// Values exchanged with specific adapter commands
pub mod params {
    /// Forced DMA transfer speed, 5.0 MB/s
    pub const DMA_SPEED_5_MBS: u8 = 0x00;

    /// Default bus-on time in microseconds
    pub const DEFAULT_BUS_ON_TIME: u8 = 7;

    /// Default bus-off time in microseconds
    pub const DEFAULT_BUS_OFF_TIME: u8 = 4;

    /// Selection timeout enable byte
    pub const SELECTION_TIMEOUT_ENABLE: u8 = 0x01;

    /// Bytes returned by inquiry
    pub const INQUIRY_LEN: usize = 4;

    /// Bytes returned by return-configuration-data
    pub const CONFIGURATION_LEN: usize = 3;

    /// Bytes of setup data requested by return-setup-data
    pub const SETUP_DATA_LEN: usize = 17;

    /// EEPROM read flag: return configured options
    pub const EEPROM_CONFIGURED: u8 = 0x01;

    /// EEPROM offset of the SCSI bus control flags
    pub const EEPROM_BUS_CONTROL: u8 = 0x03;

    /// Bus control flag: SCAM enabled in the setup utility
    pub const EEPROM_SCAM_ENABLED: u8 = 0x80;
}

/// Board identity bytes returned by inquiry
pub mod board {
    /// First-generation boards without scatter/gather
    pub const OLD_BOARD_IDS: [u8; 2] = [0x00, 0x30];

    /// 1540A/B, may carry the scatter/gather firmware defect
    pub const AHA_154X_A: u8 = b'A';

    /// Hardware revision of the defective scatter/gather boards
    pub const BAD_HARDWARE_ID: u8 = b'0';

    /// Firmware revision of the defective scatter/gather boards
    pub const BAD_FIRMWARE_ID: u8 = b'3';

    /// Boards below this id accept at most 10 CDB bytes
    pub const LONG_CDB_BOARD: u8 = b'E';

    /// Boards at or above this id may support SCAM
    pub const SCAM_BOARD: u8 = b'F';
}

/// Mailbox lock handling (get-bios-info / set-mailbox-interface)
pub mod lock {
    /// Extended BIOS translation is enabled
    pub const TRANSLATION_ENABLED: u8 = 0x08;

    /// Mailboxes locked by extended translation
    pub const TRANSLATION_LOCK: u8 = 0x01;

    /// Mailboxes locked by dynamic scan
    pub const DYNAMIC_SCAN_LOCK: u8 = 0x02;

    /// Unlock code for set-mailbox-interface
    pub const MAILBOX_UNLOCK: u8 = 0x00;
}
