//! # Physical Addresses
//!
//! The adapter is an ISA bus master with 24 address lines. Every address
//! and length it exchanges with the host is a three-byte big-endian field,
//! so anything at or above 16 MiB is unreachable.

use crate::{HalError, HalResult};

/// Physical address type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Create a new physical address
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 % align == 0
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }

    /// Narrow to the adapter's 24-bit address space
    pub fn to_u24(self) -> HalResult<U24> {
        U24::new(self.0).map_err(|_| HalError::InvalidAddress(self.0))
    }
}

/// A 24-bit quantity as carried in three-byte big-endian hardware fields
///
/// Used for both physical addresses and byte counts. The constructor is
/// checked: a value with any bit set above bit 23 is rejected instead of
/// being truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct U24(u32);

impl U24 {
    /// Largest representable value
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Zero
    pub const ZERO: Self = Self(0);

    /// Create a checked 24-bit value
    #[inline]
    pub const fn new(value: u64) -> HalResult<Self> {
        if value > Self::MAX as u64 {
            Err(HalError::OutOfRange(value))
        } else {
            Ok(Self(value as u32))
        }
    }

    /// Get the value
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Pack as three big-endian bytes
    #[inline]
    pub const fn to_be_bytes(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }

    /// Unpack from three big-endian bytes
    #[inline]
    pub const fn from_be_bytes(bytes: [u8; 3]) -> Self {
        Self(((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32)
    }

    /// Read three big-endian bytes at `offset`
    ///
    /// Returns `None` if the slice is too short.
    pub fn read_from(buf: &[u8], offset: usize) -> Option<Self> {
        let bytes = buf.get(offset..offset + 3)?;
        Some(Self::from_be_bytes([bytes[0], bytes[1], bytes[2]]))
    }

    /// Write three big-endian bytes at `offset`
    ///
    /// # Panics
    /// Panics if `buf` is shorter than `offset + 3`; callers size buffers
    /// from the layout constants.
    pub fn write_to(self, buf: &mut [u8], offset: usize) {
        buf[offset..offset + 3].copy_from_slice(&self.to_be_bytes());
    }
}

impl TryFrom<u32> for U24 {
    type Error = HalError;

    fn try_from(value: u32) -> HalResult<Self> {
        Self::new(value as u64)
    }
}

impl TryFrom<usize> for U24 {
    type Error = HalError;

    fn try_from(value: usize) -> HalResult<Self> {
        Self::new(value as u64)
    }
}

impl From<U24> for u32 {
    fn from(value: U24) -> u32 {
        value.0
    }
}

impl core::fmt::Display for U24 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u24_round_trip_boundaries() {
        for value in [0u32, 1, 0xFF, 0x100, 0xABCDEF, 0x00FF_FFFE, U24::MAX] {
            let packed = U24::try_from(value).unwrap();
            assert_eq!(U24::from_be_bytes(packed.to_be_bytes()).get(), value);
        }
    }

    #[test]
    fn test_u24_byte_order() {
        let value = U24::new(0x12_3456).unwrap();
        assert_eq!(value.to_be_bytes(), [0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_u24_rejects_wide_values() {
        assert_eq!(U24::new(0x0100_0000), Err(HalError::OutOfRange(0x0100_0000)));
        assert!(U24::try_from(u32::MAX).is_err());
        assert_eq!(
            PhysAddr::new(0x0100_0000).to_u24(),
            Err(HalError::InvalidAddress(0x0100_0000))
        );
    }

    #[test]
    fn test_u24_slice_access() {
        let mut buf = [0u8; 8];
        U24::new(0x0A0B0C).unwrap().write_to(&mut buf, 4);
        assert_eq!(&buf[4..7], &[0x0A, 0x0B, 0x0C]);
        assert_eq!(U24::read_from(&buf, 4).unwrap().get(), 0x0A0B0C);
        assert!(U24::read_from(&buf, 6).is_none());
    }
}
