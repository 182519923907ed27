//! # Driver Errors
//!
//! Operation-level failures returned to the caller. Per-request outcomes
//! are not errors; they travel to the upstream layer as
//! [`RequestStatus`](crate::RequestStatus) values.

use aha154x_hal::HalError;
use core::fmt;

/// Result type for driver operations
pub type Result<T> = core::result::Result<T, Error>;

/// Handshake step that timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Writing an adapter opcode
    WriteCommand,
    /// Writing a parameter byte
    WriteData,
    /// Reading a reply byte
    ReadByte,
    /// Waiting for the command-complete interrupt
    WaitComplete,
    /// Waiting for idle after a hard reset
    ResetIdle,
}

/// The adapter never became ready within the polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeout {
    /// Which step gave up
    pub step: HandshakeStep,
    /// Last status register value seen
    pub status: u8,
}

impl HandshakeTimeout {
    /// Unique value recorded with the internal-error log entry
    pub const fn unique(&self) -> u32 {
        match self.step {
            HandshakeStep::ReadByte => 3 << 8,
            HandshakeStep::WriteCommand => (4 << 8) | self.status as u32,
            HandshakeStep::WriteData => 8 << 8,
            HandshakeStep::WaitComplete => 9 << 8,
            HandshakeStep::ResetIdle => (0xE << 8) | self.status as u32,
        }
    }
}

impl fmt::Display for HandshakeTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handshake timeout in {:?} (status {:#04x})", self.step, self.status)
    }
}

/// Reasons a request cannot be encoded into a CCB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// More physical runs than descriptors, or a length beyond 24 bits
    TransferTooLarge,
    /// The buffer runs end before the transfer length is covered
    BufferTooShort,
    /// CDB longer than the CCB can carry
    CdbTooLong,
    /// A buffer address at or above 16 MiB
    AddressOutOfRange(u64),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::TransferTooLarge => write!(f, "transfer exceeds descriptor capacity"),
            EncodeError::BufferTooShort => write!(f, "buffer shorter than transfer length"),
            EncodeError::CdbTooLong => write!(f, "CDB too long"),
            EncodeError::AddressOutOfRange(addr) => {
                write!(f, "buffer address {:#x} above the DMA limit", addr)
            }
        }
    }
}

/// Rejected configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Value outside the accepted range
    OutOfRange {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: u32,
        /// Smallest accepted value
        min: u32,
        /// Largest accepted value
        max: u32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange { name, value, min, max } => {
                write!(f, "{} = {} outside {}..={}", name, value, min, max)
            }
        }
    }
}

/// Driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Register handshake timed out
    Handshake(HandshakeTimeout),
    /// Request could not be encoded
    Encode(EncodeError),
    /// No free outbound mailbox
    RingFull,
    /// No free CCB slot
    PoolExhausted,
    /// Adapter did not return to idle after a hard reset
    ResetFailed,
    /// DMA window unusable by a 24-bit bus master
    AddressRange(HalError),
    /// DMA window smaller than the mailbox and CCB layout
    WindowTooSmall {
        /// Bytes required
        required: usize,
        /// Bytes provided
        actual: usize,
    },
    /// Adapter reports a diagnostic failure
    SelfTestFailed(u8),
    /// Invalid configuration
    Config(ConfigError),
    /// No adapter state has been saved
    NoSavedState,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Handshake(timeout) => write!(f, "{}", timeout),
            Error::Encode(err) => write!(f, "encode: {}", err),
            Error::RingFull => write!(f, "outbound mailbox ring full"),
            Error::PoolExhausted => write!(f, "CCB pool exhausted"),
            Error::ResetFailed => write!(f, "adapter did not become idle after reset"),
            Error::AddressRange(err) => write!(f, "DMA window: {}", err),
            Error::WindowTooSmall { required, actual } => {
                write!(f, "DMA window is {} bytes, need {}", actual, required)
            }
            Error::SelfTestFailed(status) => {
                write!(f, "adapter diagnostics failed (status {:#04x})", status)
            }
            Error::Config(err) => write!(f, "config: {}", err),
            Error::NoSavedState => write!(f, "no saved adapter state"),
        }
    }
}

impl From<HandshakeTimeout> for Error {
    fn from(err: HandshakeTimeout) -> Self {
        Error::Handshake(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::Encode(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<HalError> for Error {
    fn from(err: HalError) -> Self {
        Error::AddressRange(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_unique_codes() {
        let timeout = HandshakeTimeout { step: HandshakeStep::WriteCommand, status: 0x18 };
        assert_eq!(timeout.unique(), 0x0418);
        let timeout = HandshakeTimeout { step: HandshakeStep::WaitComplete, status: 0x10 };
        assert_eq!(timeout.unique(), 0x0900);
    }

    #[test]
    fn test_conversions() {
        let timeout = HandshakeTimeout { step: HandshakeStep::ReadByte, status: 0 };
        assert_eq!(Error::from(timeout), Error::Handshake(timeout));
        assert_eq!(
            Error::from(EncodeError::BufferTooShort),
            Error::Encode(EncodeError::BufferTooShort)
        );
    }
}
