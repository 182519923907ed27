//! # Adapter-Visible Memory
//!
//! The mailboxes and CCB pool live in one physically contiguous, uncached
//! region below 16 MiB that both the host and the adapter's bus master
//! access. [`DmaWindow`] is the host's view of that region.

use crate::{HalError, HalResult, PhysAddr};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use spin::Mutex;

/// Host view of the shared DMA region
///
/// Offsets are relative to the start of the region. Accesses outside
/// `0..len()` are a caller bug; the driver checks the window size once at
/// attach and derives every offset from the layout constants.
pub trait DmaWindow {
    /// Physical address of offset 0 as seen by the adapter
    fn base(&self) -> PhysAddr;

    /// Size in bytes
    fn len(&self) -> usize;

    /// Copy bytes out of the window
    fn read(&self, offset: usize, buf: &mut [u8]);

    /// Copy bytes into the window
    fn write(&mut self, offset: usize, data: &[u8]);

    /// Whether the window is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one byte
    fn read_u8(&self, offset: usize) -> u8 {
        let mut byte = [0u8];
        self.read(offset, &mut byte);
        byte[0]
    }

    /// Write one byte
    fn write_u8(&mut self, offset: usize, value: u8) {
        self.write(offset, &[value]);
    }

    /// Fill a range with zeroes
    fn zero(&mut self, offset: usize, len: usize) {
        const ZEROES: [u8; 64] = [0; 64];
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(ZEROES.len());
            self.write(offset + done, &ZEROES[..chunk]);
            done += chunk;
        }
    }

    /// Physical address of `offset`
    fn phys(&self, offset: usize) -> PhysAddr {
        self.base().add(offset as u64)
    }

    /// Window offset of a physical address, if it falls inside the window
    fn offset_of(&self, addr: PhysAddr) -> Option<usize> {
        let delta = addr.as_u64().checked_sub(self.base().as_u64())?;
        let delta = usize::try_from(delta).ok()?;
        (delta < self.len()).then_some(delta)
    }
}

/// Check that a window can be handed to a 24-bit bus master
pub fn check_window(base: PhysAddr, len: usize, align: u64) -> HalResult<()> {
    if !base.is_aligned(align) {
        log::warn!("DMA window at {:#x} not {}-byte aligned", base.as_u64(), align);
        return Err(HalError::Misaligned { addr: base.as_u64(), align });
    }
    let end = base.as_u64() + len as u64;
    if len > 0 {
        PhysAddr::new(end - 1)
            .to_u24()
            .inspect_err(|_| log::warn!("DMA window {:#x}..{:#x} crosses 16 MiB", base.as_u64(), end))?;
    }
    Ok(())
}

// =============================================================================
// Heap-Backed Window
// =============================================================================

/// A window backed by ordinary heap memory
///
/// Clones share the same bytes, so a simulated adapter and the driver can
/// both hold one. The physical base is whatever the creator says it is.
#[derive(Debug, Clone)]
pub struct HeapDma {
    base: PhysAddr,
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl HeapDma {
    /// Allocate a zeroed window claiming physical base `base`
    pub fn new(base: PhysAddr, len: usize) -> Self {
        Self {
            base,
            bytes: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    /// Run `f` with the raw bytes locked
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.bytes.lock();
        f(&mut bytes)
    }
}

impl DmaWindow for HeapDma {
    fn base(&self) -> PhysAddr {
        self.base
    }

    fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let bytes = self.bytes.lock();
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.lock();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

// =============================================================================
// Raw Window
// =============================================================================

/// A window over memory the platform has mapped uncached
pub struct RawDma {
    virt: NonNull<u8>,
    base: PhysAddr,
    len: usize,
}

impl RawDma {
    /// Wrap a mapped region
    ///
    /// # Safety
    /// `virt` must map `len` bytes of physically contiguous memory starting
    /// at `base`, uncached, valid and exclusively owned for the lifetime of
    /// this value.
    pub unsafe fn new(virt: NonNull<u8>, base: PhysAddr, len: usize) -> Self {
        Self { virt, base, len }
    }
}

// SAFETY: exclusive ownership per the constructor contract
unsafe impl Send for RawDma {}

impl DmaWindow for RawDma {
    fn base(&self) -> PhysAddr {
        self.base
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= self.len, "DMA read out of window");
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: bounds checked above; region valid per `new`
            *byte = unsafe { self.virt.as_ptr().add(offset + i).read_volatile() };
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "DMA write out of window");
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: as above
            unsafe { self.virt.as_ptr().add(offset + i).write_volatile(*byte) };
        }
    }
}
