//! # Wire Layouts
//!
//! Byte offsets of every structure the adapter reads or writes by DMA.
//!
//! ## DMA Window
//!
//! ```text
//! 0x000  outbound mailboxes   8 x 4 bytes
//! 0x020  inbound mailboxes    8 x 4 bytes
//! 0x040  CCB slot 0           160 bytes (CCB + scatter/gather list)
//! 0x0E0  CCB slot 1
//! ...
//! ```
//!
//! The adapter is only told the outbound base; it finds the inbound ring
//! immediately after it.

use static_assertions::const_assert;
use static_assertions::const_assert_eq;

/// Mailboxes per ring
pub const RING_SIZE: usize = 8;

/// Bytes per mailbox entry: `[code, addr_hi, addr_mid, addr_lo]`
pub const MAILBOX_ENTRY_SIZE: usize = 4;

/// Offset of the code byte within a mailbox entry
pub const MAILBOX_CODE: usize = 0;

/// Offset of the 24-bit address within a mailbox entry
pub const MAILBOX_ADDR: usize = 1;

/// Bytes per ring
pub const RING_BYTES: usize = RING_SIZE * MAILBOX_ENTRY_SIZE;

/// Maximum scatter/gather descriptors per CCB
pub const MAX_SG_DESCRIPTORS: usize = 17;

/// Bytes per scatter/gather descriptor: `[len(3), addr(3)]`
pub const SG_DESCRIPTOR_SIZE: usize = 6;

/// Maximum CDB bytes the CCB can carry; the rest of the area holds sense data
pub const MAX_CDB_LEN: usize = 20;

/// CCB field offsets
pub mod ccb {
    /// Operation code
    pub const OPCODE: usize = 0;
    /// Target id, LUN and direction bits
    pub const CONTROL: usize = 1;
    /// CDB length
    pub const CDB_LENGTH: usize = 2;
    /// Request-sense length
    pub const SENSE_LENGTH: usize = 3;
    /// Data length (residual on completion)
    pub const DATA_LENGTH: usize = 4;
    /// Data pointer or descriptor-list address
    pub const DATA_POINTER: usize = 7;
    /// Link pointer
    pub const LINK_POINTER: usize = 10;
    /// Link identifier
    pub const LINK_ID: usize = 13;
    /// Host status
    pub const HOST_STATUS: usize = 14;
    /// Target status
    pub const TARGET_STATUS: usize = 15;
    /// Two reserved bytes
    pub const RESERVED: usize = 16;
    /// CDB, followed by sense bytes
    pub const CDB: usize = 18;
    /// Size of the hardware-visible part
    pub const SIZE: usize = 50;
}

/// Control byte encoding
pub mod control {
    /// Shift of the target id
    pub const TARGET_SHIFT: u8 = 5;
    /// LUN mask
    pub const LUN_MASK: u8 = 0x07;
    /// Host to target
    pub const DATA_OUT: u8 = 0x08;
    /// Target to host
    pub const DATA_IN: u8 = 0x10;
}

/// Bytes per CCB slot
pub const SLOT_STRIDE: usize = 160;

/// Offset of the descriptor list within a slot
pub const SLOT_SG_LIST: usize = 56;

/// Bytes of descriptor list per slot
pub const SG_LIST_BYTES: usize = MAX_SG_DESCRIPTORS * SG_DESCRIPTOR_SIZE;

/// Offset of the outbound ring in the DMA window
pub const OUTBOUND_OFFSET: usize = 0;

/// Offset of the inbound ring in the DMA window
pub const INBOUND_OFFSET: usize = OUTBOUND_OFFSET + RING_BYTES;

/// Offset of CCB slot 0 in the DMA window
pub const POOL_OFFSET: usize = INBOUND_OFFSET + RING_BYTES;

/// CCB slots in the pool
pub const POOL_SLOTS: usize = RING_SIZE;

/// Minimum DMA window size
pub const WINDOW_SIZE: usize = POOL_OFFSET + POOL_SLOTS * SLOT_STRIDE;

/// Required base alignment of the DMA window
pub const WINDOW_ALIGN: u64 = 8;

const_assert_eq!(RING_BYTES, 32);
const_assert_eq!(INBOUND_OFFSET, 32);
const_assert_eq!(POOL_OFFSET, 64);
const_assert!(ccb::CDB + MAX_CDB_LEN <= ccb::SIZE);
const_assert!(ccb::SIZE <= SLOT_SG_LIST);
const_assert_eq!(SLOT_SG_LIST % 8, 0);
const_assert_eq!(SLOT_STRIDE % 8, 0);
const_assert!(SLOT_SG_LIST + SG_LIST_BYTES <= SLOT_STRIDE);
const_assert_eq!(WINDOW_SIZE, 1344);

/// Window offset of outbound mailbox `index`
#[inline]
pub const fn outbound_entry(index: usize) -> usize {
    OUTBOUND_OFFSET + (index % RING_SIZE) * MAILBOX_ENTRY_SIZE
}

/// Window offset of inbound mailbox `index`
#[inline]
pub const fn inbound_entry(index: usize) -> usize {
    INBOUND_OFFSET + (index % RING_SIZE) * MAILBOX_ENTRY_SIZE
}

/// Window offset of CCB slot `index`
#[inline]
pub const fn slot(index: usize) -> usize {
    POOL_OFFSET + index * SLOT_STRIDE
}

/// Window offset of descriptor list of slot `index`
#[inline]
pub const fn slot_sg_list(index: usize) -> usize {
    slot(index) + SLOT_SG_LIST
}
