//! Everything an item may touch while executing.

use aiod_acquisition::{ScanEngine, StreamingSession};
use aiod_core::{ConnectionId, Hardware, ShutdownSignal};

/// Borrowed view of the daemon handed to [`Item::execute`](crate::Item::execute).
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    /// Control connection the message came from
    pub connection: ConnectionId,
    /// Board seams
    pub hardware: &'a Hardware,
    /// Scan engine
    pub scan: &'a ScanEngine,
    /// Streaming session
    pub streaming: &'a StreamingSession,
    /// Raised by `BRD_Reboot`
    pub shutdown: &'a ShutdownSignal,
}
