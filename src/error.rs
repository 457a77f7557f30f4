//! Errors raised while bringing the daemon up or tearing it down.
//!
//! Per-message failures never reach this type: they are turned into error
//! replies by the action thread. A [`DaemonError`] ends startup.

use std::io;
use std::net::SocketAddr;

use aiod_acquisition::AcquisitionError;
use aiod_core::{ErrorKind, HardwareError};
use thiserror::Error;

/// Result alias for daemon operations.
pub type DaemonResult<T> = std::result::Result<T, DaemonError>;

/// Errors raised while configuring, starting or running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration sources could not be read or merged
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Subscriber setup failed
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    /// A listener could not bind its address
    #[error("failed to bind {listener} listener on {addr}: {source}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A daemon thread could not be started
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Board backend failure
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// Scan or streaming failure
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    /// Socket or file failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<figment::Error> for DaemonError {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl DaemonError {
    /// Classify for error replies and logs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigLoad(_) | Self::InvalidConfig(_) | Self::Logging(_) => ErrorKind::Semantic,
            Self::Bind { .. } | Self::Spawn { .. } | Self::Io(_) => ErrorKind::Io,
            Self::Hardware(err) => err.kind(),
            Self::Acquisition(err) => err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(DaemonError::InvalidConfig("x".into()).kind(), ErrorKind::Semantic);
        let bind = DaemonError::Bind {
            listener: "control",
            addr: "127.0.0.1:1".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.kind(), ErrorKind::Io);
        assert!(bind.to_string().contains("control listener on 127.0.0.1:1"));
    }
}
