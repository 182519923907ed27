//! # Shared Adapter
//!
//! [`Adapter`] relies on `&mut self` to keep its submission and interrupt
//! paths apart. When both can run at once (an interrupt taken on another
//! CPU, or a shared interrupt line serviced from several vectors), wrap
//! it in a [`SharedAdapter`] and the ring drain is serialised with
//! submission by a spin lock.
//!
//! On a single core the lock does not help: an interrupt that preempts
//! a submission would spin forever. There the platform must mask the
//! adapter's interrupt line around [`SharedAdapter::start_io`].

use crate::adapter::Adapter;
use crate::error::Result;
use crate::notify::PortNotify;
use crate::request::Request;
use aha154x_hal::dma::DmaWindow;
use aha154x_hal::regs::RegisterIo;
use aha154x_hal::timer::Stall;
use spin::{Mutex, MutexGuard};

/// An adapter reachable from more than one execution context
pub struct SharedAdapter<R, M, C> {
    inner: Mutex<Adapter<R, M, C>>,
}

impl<R: RegisterIo, M: DmaWindow, C: Stall> SharedAdapter<R, M, C> {
    /// Wrap an attached adapter
    pub const fn new(adapter: Adapter<R, M, C>) -> Self {
        Self { inner: Mutex::new(adapter) }
    }

    /// Submit a request
    pub fn start_io(&self, request: Request, notify: &mut dyn PortNotify) {
        self.inner.lock().start_io(request, notify);
    }

    /// Service an interrupt
    pub fn interrupt(&self, notify: &mut dyn PortNotify) -> bool {
        self.inner.lock().interrupt(notify)
    }

    /// Service an interrupt unless another context holds the adapter
    ///
    /// Returns `None` without touching the hardware if the lock is taken.
    pub fn try_interrupt(&self, notify: &mut dyn PortNotify) -> Option<bool> {
        self.inner.try_lock().map(|mut adapter| adapter.interrupt(notify))
    }

    /// Reset the SCSI bus
    pub fn reset_bus(&self, path: u8, notify: &mut dyn PortNotify) -> Result<()> {
        self.inner.lock().reset_bus(path, notify)
    }

    /// Exclusive access for everything else
    pub fn lock(&self) -> MutexGuard<'_, Adapter<R, M, C>> {
        self.inner.lock()
    }

    /// Unwrap the adapter
    pub fn into_inner(self) -> Adapter<R, M, C> {
        self.inner.into_inner()
    }
}
