//! # Calibrated Stalls
//!
//! Every polling loop in the handshake protocol waits a fixed number of
//! microseconds between register reads. The wait itself is a trait so a
//! simulated adapter can advance a virtual clock instead of burning time.

/// Busy-wait source
pub trait Stall {
    /// Spin for at least `micros` microseconds
    fn stall_us(&mut self, micros: u32);
}

impl<T: Stall + ?Sized> Stall for &mut T {
    fn stall_us(&mut self, micros: u32) {
        (**self).stall_us(micros)
    }
}

/// Stall by writing the POST diagnostic port
///
/// An ISA write to port 0x80 takes roughly one microsecond on every PC
/// chipset, which is the granularity the adapter's timing tables assume.
#[cfg(all(feature = "port-io", target_arch = "x86_64"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct PortDelay;

#[cfg(all(feature = "port-io", target_arch = "x86_64"))]
impl Stall for PortDelay {
    fn stall_us(&mut self, micros: u32) {
        for _ in 0..micros {
            // SAFETY: port 0x80 is the unused POST code port
            unsafe {
                core::arch::asm!(
                    "out 0x80, al",
                    in("al") 0u8,
                    options(nomem, nostack, preserves_flags)
                );
            }
        }
    }
}

/// Stall by spinning on the CPU
///
/// `loops_per_us` must be calibrated against a real timer by the caller.
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    loops_per_us: u32,
}

impl SpinDelay {
    /// Create a spinner with a calibrated loop count
    pub const fn new(loops_per_us: u32) -> Self {
        Self { loops_per_us }
    }
}

impl Stall for SpinDelay {
    fn stall_us(&mut self, micros: u32) {
        let total = micros as u64 * self.loops_per_us as u64;
        for _ in 0..total {
            core::hint::spin_loop();
        }
    }
}
