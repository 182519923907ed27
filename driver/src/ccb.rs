//! # CCB Arena
//!
//! Fixed pool of Command Control Block slots inside the DMA window. A slot
//! is identified by a small handle; its physical address is a pure function
//! of the handle, and the reverse lookup from a firmware-reported address
//! is checked against the pool bounds, slot stride and slot state instead
//! of being trusted.

use crate::error::{Error, Result};
use crate::request::{LunAddress, RequestTag};
use aha154x_hal::command::{CcbOpcode, HostStatus};
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::layout::{self, ccb, POOL_SLOTS, SLOT_STRIDE};
use aha154x_hal::{PhysAddr, U24};
use static_assertions::const_assert;

const_assert!(POOL_SLOTS <= u8::MAX as usize);

/// Index of a CCB slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CcbHandle(u8);

impl CcbHandle {
    /// Slot index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Bookkeeping for a submitted CCB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveCcb {
    /// Originating request
    pub tag: RequestTag,
    /// Logical unit
    pub address: LunAddress,
    /// Requested transfer length
    pub transfer_length: u32,
    /// Opcode the CCB was encoded with
    pub opcode: CcbOpcode,
    /// Abort request referencing this CCB, if one was posted
    pub abort: Option<RequestTag>,
}

/// Slot state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Available
    Free,
    /// Owned by an outstanding request
    Active(ActiveCcb),
    /// Request finished, but an abort naming this CCB is still with the
    /// firmware; the slot is held until that abort is answered
    AbortPending {
        /// The pending abort request
        abort: RequestTag,
    },
}

/// Why a firmware-reported address did not map to a live slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    /// Address zero
    Null,
    /// Outside the pool or not on a slot boundary
    NotInPool(u32),
    /// Slot exists but holds nothing
    Inactive(CcbHandle),
}

/// Completion fields the firmware wrote into a CCB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcbResult {
    /// Host status
    pub host_status: HostStatus,
    /// Target status
    pub target_status: u8,
    /// Data-length field; the residual for residual-reporting opcodes
    pub residual: u32,
}

/// The slot arena
#[derive(Debug)]
pub struct CcbPool {
    base: PhysAddr,
    slots: [SlotState; POOL_SLOTS],
}

impl CcbPool {
    /// Pool whose slot 0 sits at physical address `base`
    pub const fn new(base: PhysAddr) -> Self {
        Self { base, slots: [SlotState::Free; POOL_SLOTS] }
    }

    /// Claim a free slot
    pub fn allocate(&mut self, ccb: ActiveCcb) -> Result<CcbHandle> {
        let index = self
            .slots
            .iter()
            .position(|slot| *slot == SlotState::Free)
            .ok_or(Error::PoolExhausted)?;
        self.slots[index] = SlotState::Active(ccb);
        Ok(CcbHandle(index as u8))
    }

    /// Return a slot to the pool
    pub fn release(&mut self, handle: CcbHandle) {
        self.slots[handle.index()] = SlotState::Free;
    }

    /// Slot state
    pub fn state(&self, handle: CcbHandle) -> SlotState {
        self.slots[handle.index()]
    }

    /// Replace a slot's state
    pub fn set_state(&mut self, handle: CcbHandle, state: SlotState) {
        self.slots[handle.index()] = state;
    }

    /// Mutable bookkeeping of an active slot
    pub fn active_mut(&mut self, handle: CcbHandle) -> Option<&mut ActiveCcb> {
        match &mut self.slots[handle.index()] {
            SlotState::Active(ccb) => Some(ccb),
            _ => None,
        }
    }

    /// Physical address of a slot's CCB
    pub fn phys(&self, handle: CcbHandle) -> PhysAddr {
        self.base.add((handle.index() * SLOT_STRIDE) as u64)
    }

    /// Physical address of a slot's descriptor list
    pub fn sg_list_phys(&self, handle: CcbHandle) -> PhysAddr {
        self.phys(handle).add(layout::SLOT_SG_LIST as u64)
    }

    /// Window offset of a slot's CCB
    pub const fn offset(handle: CcbHandle) -> usize {
        layout::slot(handle.index())
    }

    /// Map a firmware-reported address back to a live slot
    pub fn resolve(&self, addr: U24) -> core::result::Result<CcbHandle, ResolveError> {
        let raw = addr.get();
        if raw == 0 {
            return Err(ResolveError::Null);
        }
        let delta = (raw as u64)
            .checked_sub(self.base.as_u64())
            .ok_or(ResolveError::NotInPool(raw))?;
        let stride = SLOT_STRIDE as u64;
        if delta % stride != 0 || delta / stride >= POOL_SLOTS as u64 {
            return Err(ResolveError::NotInPool(raw));
        }
        let handle = CcbHandle((delta / stride) as u8);
        match self.slots[handle.index()] {
            SlotState::Free => Err(ResolveError::Inactive(handle)),
            _ => Ok(handle),
        }
    }

    /// Slots not free
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| **slot != SlotState::Free).count()
    }

    /// Empty the pool, yielding every occupied slot's previous state
    pub fn take_all(&mut self) -> impl Iterator<Item = SlotState> + '_ {
        self.slots
            .iter_mut()
            .map(|slot| core::mem::replace(slot, SlotState::Free))
            .filter(|state| *state != SlotState::Free)
    }

    /// Read the completion fields of a slot's CCB
    pub fn read_result<M: DmaWindow>(dma: &M, handle: CcbHandle) -> CcbResult {
        let offset = Self::offset(handle);
        let mut residual = [0u8; 3];
        dma.read(offset + ccb::DATA_LENGTH, &mut residual);
        CcbResult {
            host_status: HostStatus::from_u8(dma.read_u8(offset + ccb::HOST_STATUS)),
            target_status: dma.read_u8(offset + ccb::TARGET_STATUS),
            residual: U24::from_be_bytes(residual).get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aha154x_hal::dma::HeapDma;

    const BASE: u64 = 0x8040;

    fn active(tag: u32) -> ActiveCcb {
        ActiveCcb {
            tag: RequestTag(tag),
            address: LunAddress::new(1, 0),
            transfer_length: 0,
            opcode: CcbOpcode::Initiator,
            abort: None,
        }
    }

    #[test]
    fn test_allocate_until_exhausted() {
        let mut pool = CcbPool::new(PhysAddr::new(BASE));
        for i in 0..POOL_SLOTS {
            assert_eq!(pool.allocate(active(i as u32)).unwrap().index(), i);
        }
        assert_eq!(pool.allocate(active(99)), Err(Error::PoolExhausted));
        pool.release(CcbHandle(3));
        assert_eq!(pool.allocate(active(100)).unwrap().index(), 3);
    }

    #[test]
    fn test_resolve_round_trip() {
        let mut pool = CcbPool::new(PhysAddr::new(BASE));
        pool.allocate(active(1)).unwrap();
        let handle = pool.allocate(active(2)).unwrap();
        let addr = pool.phys(handle).to_u24().unwrap();
        assert_eq!(pool.resolve(addr), Ok(handle));
    }

    #[test]
    fn test_resolve_rejects_bad_addresses() {
        let mut pool = CcbPool::new(PhysAddr::new(BASE));
        let handle = pool.allocate(active(1)).unwrap();
        assert_eq!(pool.resolve(U24::ZERO), Err(ResolveError::Null));
        let below = U24::new(BASE - SLOT_STRIDE as u64).unwrap();
        assert_eq!(pool.resolve(below), Err(ResolveError::NotInPool(below.get())));
        let inside = U24::new(BASE + 4).unwrap();
        assert_eq!(pool.resolve(inside), Err(ResolveError::NotInPool(inside.get())));
        let beyond = U24::new(BASE + (POOL_SLOTS * SLOT_STRIDE) as u64).unwrap();
        assert!(pool.resolve(beyond).is_err());
        let free = pool.phys(CcbHandle(5)).to_u24().unwrap();
        assert_eq!(pool.resolve(free), Err(ResolveError::Inactive(CcbHandle(5))));
        pool.release(handle);
        assert!(pool.resolve(pool.phys(handle).to_u24().unwrap()).is_err());
    }

    #[test]
    fn test_abort_pending_still_resolves() {
        let mut pool = CcbPool::new(PhysAddr::new(BASE));
        let handle = pool.allocate(active(1)).unwrap();
        pool.set_state(handle, SlotState::AbortPending { abort: RequestTag(7) });
        assert_eq!(pool.resolve(pool.phys(handle).to_u24().unwrap()), Ok(handle));
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_take_all_empties_pool() {
        let mut pool = CcbPool::new(PhysAddr::new(BASE));
        pool.allocate(active(1)).unwrap();
        pool.allocate(active(2)).unwrap();
        assert_eq!(pool.take_all().count(), 2);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_read_result() {
        let mut dma = HeapDma::new(PhysAddr::new(BASE - layout::POOL_OFFSET as u64), layout::WINDOW_SIZE);
        let handle = CcbHandle(1);
        let offset = CcbPool::offset(handle);
        dma.write(offset + ccb::DATA_LENGTH, &[0x00, 0x01, 0x00]);
        dma.write_u8(offset + ccb::HOST_STATUS, 0x12);
        dma.write_u8(offset + ccb::TARGET_STATUS, 0x02);
        let result = CcbPool::read_result(&dma, handle);
        assert_eq!(result.host_status, HostStatus::DataOverUnderRun);
        assert_eq!(result.target_status, 0x02);
        assert_eq!(result.residual, 0x100);
    }
}
