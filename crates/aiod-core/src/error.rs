//! Error types shared by every aiod crate.
//!
//! [`ErrorKind`] is the coarse taxonomy used on the wire (error replies carry
//! its code) and in logs. [`HardwareError`] covers failures of the register
//! port and DMA seams.

use std::fmt;
use thiserror::Error;

/// Result type alias for hardware operations.
pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

/// Coarse classification of every error the daemon can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed message or item framing, unknown item codes.
    Framing,
    /// Structurally valid input rejected by validation.
    Semantic,
    /// Hardware or acquisition failures (timeouts, busy, DMA setup).
    Operational,
    /// Socket or file I/O failures.
    Io,
}

impl ErrorKind {
    /// Wire code carried by diagnostic items.
    pub fn code(self) -> u8 {
        match self {
            Self::Framing => 1,
            Self::Semantic => 2,
            Self::Operational => 3,
            Self::Io => 4,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Framing),
            2 => Some(Self::Semantic),
            3 => Some(Self::Operational),
            4 => Some(Self::Io),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Framing => "framing",
            Self::Semantic => "semantic",
            Self::Operational => "operational",
            Self::Io => "io",
        };
        write!(f, "{}", label)
    }
}

/// Errors raised by register and DMA access.
#[derive(Error, Debug)]
pub enum HardwareError {
    /// Offset outside the board's register window
    #[error("Register offset {offset:#04x} is not mapped")]
    UnmappedRegister { offset: u8 },

    /// 32-bit register offsets must be 4-byte aligned
    #[error("Register offset {offset:#04x} is not aligned for a 32-bit access")]
    UnalignedRegister { offset: u8 },

    /// Write to a read-only register
    #[error("Register offset {offset:#04x} is read-only")]
    ReadOnlyRegister { offset: u8 },

    /// Value wider than the register implied by the offset
    #[error("Value {value:#x} does not fit the 8-bit register at {offset:#04x}")]
    ValueTooWide { offset: u8, value: u32 },

    /// Register window could not be mapped
    #[error("Failed to map register window '{path}': {source}")]
    MapFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend has no DMA engine
    #[error("DMA is not supported by this board backend")]
    DmaNotSupported,

    /// DMA engine reported a failure
    #[error("DMA error: {message}")]
    Dma { message: String },

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnmappedRegister { .. }
            | Self::UnalignedRegister { .. }
            | Self::ReadOnlyRegister { .. }
            | Self::ValueTooWide { .. } => ErrorKind::Semantic,
            Self::MapFailed { .. } | Self::DmaNotSupported | Self::Dma { .. } => {
                ErrorKind::Operational
            }
            Self::Io(_) => ErrorKind::Io,
        }
    }
}
