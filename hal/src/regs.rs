//! # Adapter Register Window
//!
//! The adapter exposes three byte-wide registers at consecutive addresses:
//!
//! | Offset | Read                 | Write            |
//! |--------|----------------------|------------------|
//! | 0      | Status               | Control          |
//! | 1      | Data in (to host)    | Command / data   |
//! | 2      | Interrupt flags      | -                |
//!
//! The same window appears at one of a handful of ISA port bases, or memory
//! mapped on bus bridges that translate it.

use bitflags::bitflags;
use core::ptr::NonNull;

/// ISA port bases the adapter can be jumpered to
pub const ISA_PORT_BASES: [u16; 6] = [0x330, 0x334, 0x230, 0x234, 0x130, 0x134];

/// Register offsets within the window
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Status on read, control on write
    StatusControl = 0,
    /// Adapter-to-host byte on read, host-to-adapter byte on write
    CommandData = 1,
    /// Interrupt flags (read only)
    Interrupt = 2,
}

impl Register {
    /// Byte offset from the window base
    pub const fn offset(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Status register (read)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Self-test in progress
        const SELF_TEST = 0x80;
        /// Internal diagnostic failure
        const DIAG_FAILED = 0x40;
        /// Mailbox initialisation required
        const MAILBOX_INIT_REQUIRED = 0x20;
        /// Adapter idle, ready for an adapter command
        const IDLE = 0x10;
        /// Command/data-out port full (adapter has not consumed the last byte)
        const COMMAND_OUT_FULL = 0x08;
        /// Data-in port full (a reply byte is waiting)
        const DATA_IN_FULL = 0x04;
        /// Last adapter command was invalid
        const INVALID_COMMAND = 0x01;
    }
}

bitflags! {
    /// Control register (write)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u8 {
        /// Hard reset: adapter and SCSI bus
        const HARD_RESET = 0x80;
        /// Soft reset: adapter only
        const SOFT_RESET = 0x40;
        /// Clear the interrupt flags
        const INTERRUPT_RESET = 0x20;
        /// Reset the SCSI bus
        const SCSI_BUS_RESET = 0x10;
    }
}

bitflags! {
    /// Interrupt flags register (read)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptFlags: u8 {
        /// Any interrupt pending
        const ANY = 0x80;
        /// SCSI bus reset detected
        const SCSI_RESET_DETECTED = 0x08;
        /// Adapter command complete
        const COMMAND_COMPLETE = 0x04;
        /// An outbound mailbox became empty
        const MAILBOX_OUT_EMPTY = 0x02;
        /// An inbound mailbox was filled
        const MAILBOX_IN_FULL = 0x01;
    }
}

/// Byte-wide access to the adapter register window
///
/// Implementations must not reorder or merge accesses: every call is one
/// bus cycle as far as the adapter is concerned.
pub trait RegisterIo {
    /// Read a register
    fn read(&mut self, reg: Register) -> u8;

    /// Write a register
    fn write(&mut self, reg: Register, value: u8);

    /// Read the status register
    #[inline]
    fn status(&mut self) -> Status {
        Status::from_bits_retain(self.read(Register::StatusControl))
    }

    /// Read the interrupt flags
    #[inline]
    fn interrupt_flags(&mut self) -> InterruptFlags {
        InterruptFlags::from_bits_retain(self.read(Register::Interrupt))
    }

    /// Write the control register
    #[inline]
    fn control(&mut self, bits: Control) {
        self.write(Register::StatusControl, bits.bits());
    }

    /// Clear the adapter interrupt
    #[inline]
    fn acknowledge_interrupt(&mut self) {
        self.control(Control::INTERRUPT_RESET);
    }
}

impl<T: RegisterIo + ?Sized> RegisterIo for &mut T {
    fn read(&mut self, reg: Register) -> u8 {
        (**self).read(reg)
    }

    fn write(&mut self, reg: Register, value: u8) {
        (**self).write(reg, value)
    }
}

// =============================================================================
// Memory-Mapped Window
// =============================================================================

/// Register window behind a memory-mapped translation
pub struct MmioRegisters {
    base: NonNull<u8>,
}

impl MmioRegisters {
    /// Wrap a mapped register window
    ///
    /// # Safety
    /// `base` must point to at least three bytes of device memory mapped
    /// uncached, valid for the lifetime of this value, and not aliased by
    /// another `MmioRegisters`.
    pub const unsafe fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }
}

// SAFETY: the window is exclusively owned per the constructor contract
unsafe impl Send for MmioRegisters {}

impl RegisterIo for MmioRegisters {
    #[inline]
    fn read(&mut self, reg: Register) -> u8 {
        // SAFETY: offset is within the three-byte window guaranteed by `new`
        unsafe { self.base.as_ptr().add(reg.offset()).read_volatile() }
    }

    #[inline]
    fn write(&mut self, reg: Register, value: u8) {
        // SAFETY: as above
        unsafe { self.base.as_ptr().add(reg.offset()).write_volatile(value) }
    }
}

// =============================================================================
// Port-Mapped Window
// =============================================================================

/// Register window at an ISA I/O port base
#[cfg(all(feature = "port-io", target_arch = "x86_64"))]
pub struct PortRegisters {
    base: u16,
}

#[cfg(all(feature = "port-io", target_arch = "x86_64"))]
impl PortRegisters {
    /// Wrap the window at `base`
    ///
    /// # Safety
    /// An adapter must be decoded at `base`, and no other code may touch
    /// ports `base..base + 3`.
    pub const unsafe fn new(base: u16) -> Self {
        Self { base }
    }

    /// Port base
    pub const fn base(&self) -> u16 {
        self.base
    }
}

#[cfg(all(feature = "port-io", target_arch = "x86_64"))]
impl RegisterIo for PortRegisters {
    #[inline]
    fn read(&mut self, reg: Register) -> u8 {
        // SAFETY: port ownership is guaranteed by `new`
        unsafe { inb(self.base + reg as u16) }
    }

    #[inline]
    fn write(&mut self, reg: Register, value: u8) {
        // SAFETY: as above
        unsafe { outb(self.base + reg as u16, value) }
    }
}

#[cfg(all(feature = "port-io", target_arch = "x86_64"))]
#[inline]
unsafe fn outb(port: u16, value: u8) {
    unsafe {
        core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") value,
            options(nomem, nostack, preserves_flags)
        );
    }
}

#[cfg(all(feature = "port-io", target_arch = "x86_64"))]
#[inline]
unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    unsafe {
        core::arch::asm!(
            "in al, dx",
            in("dx") port,
            out("al") value,
            options(nomem, nostack, preserves_flags)
        );
    }
    value
}
