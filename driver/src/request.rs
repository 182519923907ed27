//! # I/O Requests
//!
//! The generic request model the upstream dispatch layer hands to the
//! adapter, and the outcome it gets back.

use crate::error::EncodeError;
use aha154x_hal::layout::MAX_CDB_LEN;
use aha154x_hal::PhysAddr;
use alloc::vec::Vec;
use bitflags::bitflags;

/// Opaque upstream identifier of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestTag(pub u32);

/// Targets per bus
pub const MAX_TARGETS: u8 = 8;

/// Logical units per target
pub const MAX_LUNS: u8 = 8;

/// Buses per adapter
pub const MAX_PATHS: u8 = 1;

/// (bus path, target, logical unit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LunAddress {
    /// Bus path
    pub path: u8,
    /// Target id
    pub target: u8,
    /// Logical unit
    pub lun: u8,
}

impl LunAddress {
    /// Address on path 0
    pub const fn new(target: u8, lun: u8) -> Self {
        Self { path: 0, target, lun }
    }

    /// Whether the adapter can reach this address
    pub const fn is_valid(&self) -> bool {
        self.path < MAX_PATHS && self.target < MAX_TARGETS && self.lun < MAX_LUNS
    }
}

bitflags! {
    /// Requested transfer direction
    ///
    /// Both bits set means the caller did not say; the adapter then picks
    /// the direction from the target's bus phase.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Direction: u8 {
        /// Target to host
        const IN = 0x01;
        /// Host to target
        const OUT = 0x02;
    }
}

/// One physically contiguous piece of a data buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Physical start
    pub addr: PhysAddr,
    /// Bytes
    pub len: u32,
}

impl Segment {
    /// Create a segment
    pub const fn new(addr: u64, len: u32) -> Self {
        Self { addr: PhysAddr::new(addr), len }
    }
}

/// A SCSI command for one logical unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScsiRequest {
    /// Upstream identifier
    pub tag: RequestTag,
    /// Destination
    pub address: LunAddress,
    /// Data direction
    pub direction: Direction,
    /// Command descriptor block
    pub cdb: heapless::Vec<u8, MAX_CDB_LEN>,
    /// Physical runs of the data buffer, in order
    pub segments: Vec<Segment>,
    /// Bytes to transfer
    pub transfer_length: u32,
}

impl ScsiRequest {
    /// A request with no data phase
    pub fn new(tag: RequestTag, address: LunAddress, cdb: &[u8]) -> Result<Self, EncodeError> {
        let cdb = heapless::Vec::from_slice(cdb).map_err(|_| EncodeError::CdbTooLong)?;
        Ok(Self {
            tag,
            address,
            direction: Direction::empty(),
            cdb,
            segments: Vec::new(),
            transfer_length: 0,
        })
    }

    /// Attach a data buffer
    pub fn with_data(mut self, direction: Direction, segments: Vec<Segment>, transfer_length: u32) -> Self {
        self.direction = direction;
        self.segments = segments;
        self.transfer_length = transfer_length;
        self
    }

    /// Whether a data phase is requested
    pub fn has_data(&self) -> bool {
        !self.direction.is_empty() && self.transfer_length > 0
    }
}

/// Work submitted to the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Execute a SCSI command
    Execute(ScsiRequest),
    /// Abort the outstanding request `victim` on `address`
    Abort {
        /// Identifier of the abort itself
        tag: RequestTag,
        /// Logical unit of the victim
        address: LunAddress,
        /// Request to abort
        victim: RequestTag,
    },
    /// Reset the adapter and the SCSI bus
    ResetBus {
        /// Identifier of the reset request
        tag: RequestTag,
        /// Bus path
        path: u8,
    },
    /// Reset one target
    ResetDevice {
        /// Identifier of the reset request
        tag: RequestTag,
        /// Target to reset
        address: LunAddress,
    },
}

impl Request {
    /// Upstream identifier
    pub fn tag(&self) -> RequestTag {
        match self {
            Request::Execute(req) => req.tag,
            Request::Abort { tag, .. } | Request::ResetBus { tag, .. } | Request::ResetDevice { tag, .. } => *tag,
        }
    }
}

/// Final status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Completed without error
    Success,
    /// Aborted at host request
    Aborted,
    /// Abort target was not found
    AbortFailed,
    /// Generic failure; see target status
    Error,
    /// Target did not answer selection
    SelectionTimeout,
    /// Fewer or more bytes moved than requested
    DataOverrun,
    /// Target disconnected unexpectedly
    UnexpectedBusFree,
    /// Protocol violation by the target or adapter
    PhaseSequenceFailure,
    /// Request rejected by the driver or firmware
    InvalidRequest,
    /// Outstanding request forcibly timed out
    Timeout,
    /// Failed by a bus reset
    BusReset,
    /// Logical unit or adapter resources busy; resubmit later
    Busy,
}

/// Outcome delivered with a request completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Status
    pub status: RequestStatus,
    /// SCSI status byte returned by the target
    pub target_status: u8,
    /// Bytes actually transferred
    pub transferred: u32,
}

impl Completion {
    /// Completion carrying only a status
    pub const fn status(status: RequestStatus) -> Self {
        Self { status, target_status: 0, transferred: 0 }
    }
}
