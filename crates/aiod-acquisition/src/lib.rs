//! # aiod-acquisition
//!
//! The two acquisition algorithms of the aiod daemon:
//!
//! - [`scan`]: a one-shot multi-channel ADC scan through the FIFO, with
//!   per-channel oversample reduction and raw / counts / volts views
//! - [`streaming`]: continuous DMA-fed streaming to a single client through a
//!   worker thread, a [`ring::SlotRing`] and a logger thread
//!
//! Both share one [`AdcArbiter`], which keeps them mutually exclusive and
//! makes the streaming session a process-wide singleton.

pub mod arbiter;
pub mod error;
pub mod ring;
pub mod scan;
pub mod streaming;

pub use arbiter::AdcArbiter;
pub use error::{AcquisitionError, AdcOwner, Result};
pub use scan::{ChannelReading, ScanConfig, ScanEngine, ScanReadings, ScanSettings};
pub use streaming::{StreamSettings, StreamSink, StreamStatus, StreamingSession};
