//! Errors raised by scan acquisition and the streaming session.

use std::time::Duration;

use aiod_core::{ConnectionId, ErrorKind, HardwareError};
use thiserror::Error;

/// Result type alias for acquisition operations.
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// What currently holds the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcOwner {
    /// A one-shot scan is running
    Scan,
    /// A streaming session owned by a connection
    Stream(ConnectionId),
}

impl std::fmt::Display for AdcOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scan => write!(f, "a scan"),
            Self::Stream(id) => write!(f, "streaming session {}", id),
        }
    }
}

/// Acquisition failures.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// Scan end channel precedes the start channel
    #[error("Invalid scan configuration: end channel {end} precedes start channel {start}")]
    InvalidScanConfig { start: u8, end: u8 },

    /// The FIFO did not deliver the expected sample count in time
    #[error("Scan timed out after {elapsed:?}: expected {expected} samples, received {received}")]
    ScanTimeout {
        expected: usize,
        received: usize,
        elapsed: Duration,
    },

    /// A scan was requested while something else owns the ADC
    #[error("ADC busy: held by {owner}")]
    AdcBusy { owner: AdcOwner },

    /// A stream start was requested while another session is active
    #[error("Streaming session busy: active connection {active}")]
    StreamBusy { active: ConnectionId },

    /// No streaming connection with this id is attached
    #[error("No streaming connection {id}")]
    StreamNotConnected { id: ConnectionId },

    /// Invalid streaming parameters
    #[error("Invalid stream configuration: {0}")]
    InvalidStreamConfig(String),

    /// Register or DMA failure
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Thread spawn or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquisitionError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidScanConfig { .. } | Self::InvalidStreamConfig(_) => ErrorKind::Semantic,
            Self::ScanTimeout { .. }
            | Self::AdcBusy { .. }
            | Self::StreamBusy { .. }
            | Self::StreamNotConnected { .. } => ErrorKind::Operational,
            Self::Hardware(err) => err.kind(),
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_names_active_connection() {
        let err = AcquisitionError::StreamBusy {
            active: ConnectionId(7),
        };
        assert!(err.to_string().contains("conn-7"));
        assert_eq!(err.kind(), ErrorKind::Operational);
    }

    #[test]
    fn test_hardware_kind_passes_through() {
        let err = AcquisitionError::from(HardwareError::UnalignedRegister { offset: 0x41 });
        assert_eq!(err.kind(), ErrorKind::Semantic);
    }
}
