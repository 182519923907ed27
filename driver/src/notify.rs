//! # Upstream Notification
//!
//! The adapter never owns requests beyond their CCB; everything it learns
//! about them is pushed to the dispatch layer through [`PortNotify`].

use crate::request::{Completion, RequestTag};

/// Classes of logged adapter errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed completion, bad address, or unreachable adapter
    InternalAdapterError,
    /// Protocol violation, including negative residuals
    ProtocolError,
    /// Target disconnected unexpectedly
    UnexpectedDisconnect,
    /// Firmware rejected an opcode the driver expected it to know
    BadFirmwareWarning,
}

/// Callbacks into the upstream dispatch layer
///
/// Called from both the submission and the interrupt context, never
/// re-entered for the same adapter.
pub trait PortNotify {
    /// Request `tag` finished
    fn request_complete(&mut self, tag: RequestTag, completion: Completion);

    /// The adapter can accept another request
    fn next_request_ready(&mut self);

    /// The SCSI bus was reset
    fn bus_reset_detected(&mut self);

    /// Record an adapter error; `detail` identifies the site and data
    fn log_internal_error(&mut self, code: ErrorCode, detail: u32);
}
