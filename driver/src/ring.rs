//! # Mailbox Rings
//!
//! Two rings of [`RING_SIZE`] four-byte entries in the DMA window. The
//! host fills outbound entries and the firmware empties them; the firmware
//! fills inbound entries and the host empties them. A code byte of zero
//! means free on both sides, and it is the only synchronisation: an entry
//! is written address first, code last, and read code first.

use crate::error::{Error, Result};
use aha154x_hal::command::{InboundCode, OutboundCode};
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::layout::{self, MAILBOX_ADDR, MAILBOX_CODE, RING_BYTES, RING_SIZE};
use aha154x_hal::U24;

/// A consumed inbound entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundEntry {
    /// Ring index it was read from
    pub index: usize,
    /// Status code
    pub code: InboundCode,
    /// CCB address reported by the firmware
    pub addr: U24,
}

/// Ring cursors
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MailboxRings {
    next_out: usize,
    next_in: usize,
}

impl MailboxRings {
    /// Fresh cursors
    pub const fn new() -> Self {
        Self { next_out: 0, next_in: 0 }
    }

    /// Next outbound index to try
    pub const fn outbound_cursor(&self) -> usize {
        self.next_out
    }

    /// Next inbound index to inspect
    pub const fn inbound_cursor(&self) -> usize {
        self.next_in
    }

    /// Find a free outbound entry, starting at the cursor
    ///
    /// Scans at most one lap. The cursor moves past the returned entry.
    pub fn allocate_outbound<M: DmaWindow>(&mut self, dma: &M) -> Result<usize> {
        for step in 0..RING_SIZE {
            let index = (self.next_out + step) % RING_SIZE;
            let code = dma.read_u8(layout::outbound_entry(index) + MAILBOX_CODE);
            if code == OutboundCode::Free as u8 {
                self.next_out = (index + 1) % RING_SIZE;
                return Ok(index);
            }
        }
        log::warn!("all {} outbound mailboxes occupied", RING_SIZE);
        Err(Error::RingFull)
    }

    /// Fill outbound entry `index`: address first, then the code
    pub fn post<M: DmaWindow>(&self, dma: &mut M, index: usize, code: OutboundCode, addr: U24) {
        let entry = layout::outbound_entry(index);
        dma.write(entry + MAILBOX_ADDR, &addr.to_be_bytes());
        dma.write_u8(entry + MAILBOX_CODE, code as u8);
        log::trace!("MBO[{}] = {:?} {}", index, code, addr);
    }

    /// Consume every filled inbound entry from the cursor on
    ///
    /// Each entry is marked free as the iterator yields it. The walk stops
    /// at the first free entry or after one lap.
    pub fn drain_inbound<'a, M: DmaWindow>(&'a mut self, dma: &'a mut M) -> Drain<'a, M> {
        Drain { rings: self, dma, remaining: RING_SIZE }
    }

    /// Clear both rings and rewind both cursors
    pub fn reinitialize<M: DmaWindow>(&mut self, dma: &mut M) {
        dma.zero(layout::OUTBOUND_OFFSET, RING_BYTES);
        dma.zero(layout::INBOUND_OFFSET, RING_BYTES);
        self.next_out = 0;
        self.next_in = 0;
    }

    /// Whether both rings are free and both cursors rewound
    pub fn is_clear<M: DmaWindow>(&self, dma: &M) -> bool {
        let all_free = (0..RING_SIZE).all(|i| {
            dma.read_u8(layout::outbound_entry(i) + MAILBOX_CODE) == 0
                && dma.read_u8(layout::inbound_entry(i) + MAILBOX_CODE) == 0
        });
        all_free && self.next_out == 0 && self.next_in == 0
    }
}

/// Lazy walk over filled inbound entries
pub struct Drain<'a, M> {
    rings: &'a mut MailboxRings,
    dma: &'a mut M,
    remaining: usize,
}

impl<M> Drain<'_, M> {
    /// The DMA window, for reading the CCB behind an entry between steps
    pub fn window(&mut self) -> &mut M {
        self.dma
    }
}

impl<M: DmaWindow> Iterator for Drain<'_, M> {
    type Item = InboundEntry;

    fn next(&mut self) -> Option<InboundEntry> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.rings.next_in;
        let entry = layout::inbound_entry(index);
        let code = InboundCode::from_u8(self.dma.read_u8(entry + MAILBOX_CODE));
        if code == InboundCode::Free {
            self.remaining = 0;
            return None;
        }
        let mut addr = [0u8; 3];
        self.dma.read(entry + MAILBOX_ADDR, &mut addr);
        self.dma.write_u8(entry + MAILBOX_CODE, InboundCode::Free.as_u8());
        self.rings.next_in = (index + 1) % RING_SIZE;
        self.remaining -= 1;
        log::trace!("MBI[{}] = {:?}", index, code);
        Some(InboundEntry { index, code, addr: U24::from_be_bytes(addr) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aha154x_hal::dma::HeapDma;
    use aha154x_hal::PhysAddr;

    fn window() -> HeapDma {
        HeapDma::new(PhysAddr::new(0x4000), layout::WINDOW_SIZE)
    }

    fn fill_inbound(dma: &mut HeapDma, index: usize, code: u8, addr: u32) {
        let entry = layout::inbound_entry(index);
        dma.write(entry + 1, &U24::try_from(addr).unwrap().to_be_bytes());
        dma.write_u8(entry, code);
    }

    #[test]
    fn test_allocate_wraps_and_skips_busy() {
        let mut dma = window();
        let mut rings = MailboxRings::new();
        for expected in 0..RING_SIZE {
            let index = rings.allocate_outbound(&dma).unwrap();
            assert_eq!(index, expected);
            rings.post(&mut dma, index, OutboundCode::Start, U24::ZERO);
        }
        assert_eq!(rings.allocate_outbound(&dma), Err(Error::RingFull));

        // Firmware takes entry 3
        dma.write_u8(layout::outbound_entry(3), 0);
        assert_eq!(rings.allocate_outbound(&dma), Ok(3));
        assert_eq!(rings.outbound_cursor(), 4);
    }

    #[test]
    fn test_post_layout() {
        let mut dma = window();
        let rings = MailboxRings::new();
        rings.post(&mut dma, 2, OutboundCode::Abort, U24::new(0x01_2345).unwrap());
        let mut entry = [0u8; 4];
        dma.read(layout::outbound_entry(2), &mut entry);
        assert_eq!(entry, [2, 0x01, 0x23, 0x45]);
    }

    #[test]
    fn test_drain_frees_entries_and_stops_at_free() {
        let mut dma = window();
        let mut rings = MailboxRings::new();
        fill_inbound(&mut dma, 0, 1, 0x4040);
        fill_inbound(&mut dma, 1, 4, 0x40E0);
        fill_inbound(&mut dma, 3, 1, 0x4180);

        let entries: alloc::vec::Vec<_> = rings.drain_inbound(&mut dma).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].code, InboundCode::Success);
        assert_eq!(entries[1].addr.get(), 0x40E0);
        assert_eq!(rings.inbound_cursor(), 2);
        assert_eq!(dma.read_u8(layout::inbound_entry(0)), 0);
        assert_eq!(dma.read_u8(layout::inbound_entry(1)), 0);
        assert_eq!(dma.read_u8(layout::inbound_entry(3)), 1);
    }

    #[test]
    fn test_drain_is_lazy() {
        let mut dma = window();
        let mut rings = MailboxRings::new();
        fill_inbound(&mut dma, 0, 1, 0x4040);
        fill_inbound(&mut dma, 1, 1, 0x40E0);
        let first = rings.drain_inbound(&mut dma).next();
        assert!(first.is_some());
        assert_eq!(rings.inbound_cursor(), 1);
        assert_eq!(dma.read_u8(layout::inbound_entry(1)), 1);
    }

    #[test]
    fn test_drain_bounded_by_one_lap() {
        let mut dma = window();
        let mut rings = MailboxRings::new();
        for i in 0..RING_SIZE {
            fill_inbound(&mut dma, i, 1, 0x4040);
        }
        let mut drain = rings.drain_inbound(&mut dma);
        let mut seen = 0;
        while drain.next().is_some() {
            seen += 1;
        }
        assert_eq!(seen, RING_SIZE);
    }

    #[test]
    fn test_reinitialize() {
        let mut dma = window();
        let mut rings = MailboxRings::new();
        let index = rings.allocate_outbound(&dma).unwrap();
        rings.post(&mut dma, index, OutboundCode::Start, U24::ZERO);
        fill_inbound(&mut dma, 5, 2, 0x4040);
        assert!(!rings.is_clear(&dma));
        rings.reinitialize(&mut dma);
        assert!(rings.is_clear(&dma));
    }
}
