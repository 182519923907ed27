//! Fake clock.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use aha154x_hal::timer::Stall;

/// A [`Stall`] that only counts
///
/// Clones share the count, so a test can keep one while the driver owns
/// another and assert exactly how long the driver would have waited.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    elapsed: Arc<AtomicU64>,
}

impl SimClock {
    /// Clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Total microseconds stalled so far
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed.load(Ordering::Relaxed)
    }

    /// Rewind to zero
    pub fn reset(&self) {
        self.elapsed.store(0, Ordering::Relaxed);
    }
}

impl Stall for SimClock {
    fn stall_us(&mut self, micros: u32) {
        self.elapsed.fetch_add(micros as u64, Ordering::Relaxed);
    }
}
