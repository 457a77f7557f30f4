//! Protocol errors.
//!
//! [`ItemError`] covers everything that can go wrong with a single item,
//! from construction to execution. [`FramingError`] covers the message level.
//! Both classify into [`ErrorKind`] for error replies.

use aiod_acquisition::AcquisitionError;
use aiod_core::{ErrorKind, HardwareError};
use thiserror::Error;

/// Errors of one item.
#[derive(Error, Debug)]
pub enum ItemError {
    /// No descriptor is registered for this code
    #[error("Unknown item id {code:#06x}")]
    UnknownItemId { code: u16 },

    /// Payload length outside the descriptor bounds
    #[error("Length mismatch for item {code:#06x}: {len} bytes, expected {min}..={max}")]
    LengthMismatch { code: u16, len: usize, min: u16, max: u16 },

    /// Item header or payload cut short inside the message
    #[error("Truncated item at payload offset {offset}")]
    Truncated { offset: usize },

    /// Decoded field holds an invalid value
    #[error("Invalid field in item {code:#06x}: {reason}")]
    InvalidField { code: u16, reason: String },

    /// Scan or streaming failure during execution
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// Register or DMA failure during execution
    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

impl ItemError {
    /// Invalid field value in item `code`.
    pub fn invalid_field(code: u16, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            code,
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownItemId { .. } | Self::Truncated { .. } => ErrorKind::Framing,
            Self::LengthMismatch { .. } | Self::InvalidField { .. } => ErrorKind::Semantic,
            Self::Acquisition(err) => err.kind(),
            Self::Hardware(err) => err.kind(),
        }
    }
}

/// Cloneable record of a failed item, kept on the item for its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFault {
    /// Error class
    pub kind: ErrorKind,
    /// Rendered error
    pub message: String,
}

impl From<&ItemError> for ItemFault {
    fn from(err: &ItemError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ItemFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Message-level framing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Not enough bytes for the header or the declared length yet
    #[error("Incomplete message: have {have} bytes, need {need}")]
    Incomplete { have: usize, need: usize },

    /// Declared length exceeds the configured maximum
    #[error("Message of {declared} bytes exceeds the {max} byte limit")]
    MessageTooLarge { declared: usize, max: usize },

    /// Well-framed message with an unknown type tag
    #[error("Unknown message type {tag:#04x}")]
    UnknownMessageType { tag: u8, consumed: usize },
}

impl FramingError {
    /// Always [`ErrorKind::Framing`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Framing
    }
}
