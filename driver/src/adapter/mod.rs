//! # Adapter Context
//!
//! One [`Adapter`] per physical board. It owns the register window, the
//! DMA window holding both mailbox rings and the CCB arena, the ring
//! cursors and everything the quirk probes decided at attach time.
//!
//! ## Execution contexts
//!
//! Two callers touch an adapter: the submission context
//! ([`Adapter::start_io`]) and the interrupt context
//! ([`Adapter::interrupt`]). Both take `&mut self`, so the borrow checker
//! already forbids them from overlapping on one core. A platform that can
//! deliver the interrupt while a submission is running must mask the line
//! around `start_io`, or go through [`SharedAdapter`](crate::SharedAdapter).
//!
//! ## Window layout
//!
//! ```text
//! +0     outbound ring   8 x 4 bytes
//! +32    inbound ring    8 x 4 bytes
//! +64    slot 0          CCB (50) | pad | S/G list (17 x 6)
//! +224   slot 1
//! ...
//! +1184  slot 7
//! ```

mod completion;
mod power;
mod reset;
mod submit;

pub use completion::detail;
pub use power::{SetupData, STOP_ATTEMPTS};

use crate::ccb::CcbPool;
use crate::config::AdapterConfig;
use crate::encoder::{CcbEncoding, CommandEncoder};
use crate::error::{Error, Result};
use crate::handshake::Handshake;
use crate::lun::LunTable;
use crate::quirks::{self, AdapterResources, Quirks};
use crate::ring::MailboxRings;
use aha154x_hal::dma::{check_window, DmaWindow};
use aha154x_hal::layout;
use aha154x_hal::regs::{RegisterIo, Status};
use aha154x_hal::timer::Stall;
use aha154x_hal::U24;
use core::fmt;

/// Live CCBs and logical-unit ownership
///
/// Kept apart from the rings so a drain can borrow both at once.
#[derive(Debug)]
struct Inflight {
    pool: CcbPool,
    luns: LunTable,
}

/// Driver state for one adapter
pub struct Adapter<R, M, C> {
    port: Handshake<R, C>,
    dma: M,
    mailbox_base: U24,
    rings: MailboxRings,
    inflight: Inflight,
    encoder: CommandEncoder,
    quirks: Quirks,
    config: AdapterConfig,
    resources: AdapterResources,
    max_cdb: Option<u8>,
    pending_retry: bool,
    saved: Option<SetupData>,
}

impl<R, M, C> fmt::Debug for Adapter<R, M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("mailbox_base", &self.mailbox_base)
            .field("inflight", &self.inflight)
            .field("encoder", &self.encoder)
            .field("quirks", &self.quirks)
            .field("resources", &self.resources)
            .field("pending_retry", &self.pending_retry)
            .finish_non_exhaustive()
    }
}

impl<R: RegisterIo, M: DmaWindow, C: Stall> Adapter<R, M, C> {
    /// Probe an adapter and take ownership of its windows
    ///
    /// Validates the DMA window, reads the adapter's resources and runs
    /// the quirk probes. The adapter is not usable until
    /// [`initialize`](Self::initialize) succeeds.
    pub fn attach(regs: R, dma: M, clock: C, config: AdapterConfig) -> Result<Self> {
        if dma.len() < layout::WINDOW_SIZE {
            return Err(Error::WindowTooSmall { required: layout::WINDOW_SIZE, actual: dma.len() });
        }
        check_window(dma.base(), layout::WINDOW_SIZE, layout::WINDOW_ALIGN)?;
        let mailbox_base = dma.phys(layout::OUTBOUND_OFFSET).to_u24()?;

        let mut port = Handshake::new(regs, clock);
        let status = port.status();
        if status.contains(Status::DIAG_FAILED) {
            log::error!("adapter diagnostics failed, status {:#04x}", status.bits());
            return Err(Error::SelfTestFailed(status.bits()));
        }

        let resources = quirks::read_resources(&mut port)?;
        log::info!(
            "AHA-154x: SCSI id {}, IRQ {:?}, DMA {:?}, mailboxes at {}",
            resources.host_id,
            resources.irq,
            resources.dma_channel,
            mailbox_base
        );

        let quirks = quirks::detect(&mut port, &config);
        let max_cdb = quirks.max_cdb_length(&config);
        let encoder = CommandEncoder { encoding: quirks.encoding, scatter_gather: quirks.scatter_gather };

        Ok(Self {
            port,
            inflight: Inflight {
                pool: CcbPool::new(dma.phys(layout::POOL_OFFSET)),
                luns: LunTable::new(),
            },
            dma,
            mailbox_base,
            rings: MailboxRings::new(),
            encoder,
            quirks,
            config,
            resources,
            max_cdb,
            pending_retry: false,
            saved: None,
        })
    }

    /// DMA channel, IRQ and SCSI id read at attach
    pub fn resources(&self) -> AdapterResources {
        self.resources
    }

    /// Probe results
    pub fn quirks(&self) -> &Quirks {
        &self.quirks
    }

    /// Configuration replayed after every reset
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Opcode pair currently used for new CCBs
    pub fn encoding(&self) -> CcbEncoding {
        self.encoder.encoding
    }

    /// Whether multi-descriptor lists are sent
    pub fn scatter_gather(&self) -> bool {
        self.encoder.scatter_gather
    }

    /// Longest CDB accepted, `None` if only the CCB limits it
    pub fn max_cdb_length(&self) -> Option<u8> {
        self.max_cdb
    }

    /// Whether a doorbell is waiting to be re-rung
    pub fn pending_retry(&self) -> bool {
        self.pending_retry
    }

    /// CCB slots currently held
    pub fn outstanding(&self) -> usize {
        self.inflight.pool.in_use()
    }

    /// Logical units with a request outstanding
    pub fn busy_luns(&self) -> usize {
        self.inflight.luns.busy()
    }

    /// Whether both rings are empty with rewound cursors
    pub fn rings_clear(&self) -> bool {
        self.rings.is_clear(&self.dma)
    }

    /// Last setup data captured by [`save_state`](Self::save_state)
    pub fn saved_state(&self) -> Option<&SetupData> {
        self.saved.as_ref()
    }

    /// The DMA window
    pub fn window(&self) -> &M {
        &self.dma
    }
}
