//! Continuous analog-input streaming to one client.
//!
//! # Architecture
//!
//! ```text
//!   DMA engine ──irq──► worker thread ──SlotRing──► logger thread ──► StreamSink
//!                         (producer)                  (consumer)       (socket)
//! ```
//!
//! - The **worker** asks the DMA engine for filled slots, blocks on the
//!   cancelable interrupt wait when there are none, and copies each filled
//!   slot into the next free ring slot.
//! - The **logger** waits on the ring with a timeout (so it can observe its
//!   terminate flag) and writes every block to the sink.
//!
//! A failed send sets the stream terminate flag and cancels the interrupt
//! wait; the worker then tears the session down: it stops the logger, idles
//! the ADC trigger, stops the DMA engine, closes the sink and finally releases
//! the [`AdcArbiter`] claim. Only after that release can a new session start.
//!
//! Streaming sinks are registered per connection as streaming clients attach
//! ([`StreamingSession::register_endpoint`]); a start request names the
//! streaming connection the samples go to.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use aiod_core::registers;
use aiod_core::{ConnectionId, DmaEngine, Hardware, IrqWait};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::arbiter::AdcArbiter;
use crate::error::{AcquisitionError, Result};
use crate::ring::{RingReader, RingWriter, SlotRing};

/// Streaming parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Slots in the worker-to-logger ring
    pub ring_slots: usize,
    /// 32-bit samples per DMA transfer (one ring slot)
    pub transfer_samples: usize,
    /// Timed wait used by both threads to observe their terminate flags
    pub logger_wait: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ring_slots: 255,
            transfer_samples: 4096,
            logger_wait: Duration::from_millis(100),
        }
    }
}

impl StreamSettings {
    /// Bytes per DMA transfer.
    pub fn transfer_bytes(&self) -> usize {
        self.transfer_samples * 4
    }

    /// Reject zero sizes and waits.
    pub fn validate(&self) -> Result<()> {
        if self.ring_slots == 0 {
            return Err(AcquisitionError::InvalidStreamConfig(
                "ring_slots must be greater than 0".to_string(),
            ));
        }
        if self.transfer_samples == 0 {
            return Err(AcquisitionError::InvalidStreamConfig(
                "transfer_samples must be greater than 0".to_string(),
            ));
        }
        if self.logger_wait.is_zero() {
            return Err(AcquisitionError::InvalidStreamConfig(
                "logger_wait must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Destination of streamed sample blocks.
pub trait StreamSink: Send {
    /// Send one block; an error means the peer is gone.
    fn send(&mut self, block: &[u8]) -> io::Result<()>;

    /// Close the sink when the session ends.
    fn close(&mut self) {}
}

impl StreamSink for TcpStream {
    fn send(&mut self, block: &[u8]) -> io::Result<()> {
        self.write_all(block)
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Snapshot returned by [`StreamingSession::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStatus {
    /// Connection owning the session
    pub active: Option<ConnectionId>,
    /// Blocks sent during the current (or last) session
    pub blocks_sent: u64,
}

#[derive(Debug, Default)]
struct RunFlags {
    stream_terminate: AtomicBool,
    logger_terminate: AtomicBool,
    blocks_sent: AtomicU64,
}

#[derive(Default)]
struct SessionState {
    endpoints: HashMap<ConnectionId, Box<dyn StreamSink>>,
    worker: Option<JoinHandle<()>>,
    flags: Option<Arc<RunFlags>>,
}

/// Process-wide streaming session.
///
/// `start`, `stop` and `status` are serialized by one lock; the session claim
/// itself lives in the shared [`AdcArbiter`].
pub struct StreamingSession {
    hardware: Hardware,
    arbiter: Arc<AdcArbiter>,
    settings: StreamSettings,
    state: Mutex<SessionState>,
}

impl StreamingSession {
    /// Idle session over `hardware`, sharing `arbiter` with the scan engine.
    pub fn new(hardware: Hardware, arbiter: Arc<AdcArbiter>, settings: StreamSettings) -> Self {
        Self {
            hardware,
            arbiter,
            settings,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Configured settings.
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Attach the sink of a freshly accepted streaming connection.
    pub fn register_endpoint(&self, connection: ConnectionId, sink: Box<dyn StreamSink>) {
        self.state.lock().endpoints.insert(connection, sink);
        debug!(connection = %connection, "Streaming endpoint registered");
    }

    /// Detach a streaming connection. Stops the session if it owns it.
    pub fn deregister_endpoint(&self, connection: ConnectionId) {
        let removed = self.state.lock().endpoints.remove(&connection);
        if let Some(mut sink) = removed {
            sink.close();
            debug!(connection = %connection, "Streaming endpoint removed");
        }
        if self.arbiter.streaming_owner() == Some(connection) {
            info!(connection = %connection, "Streaming client left; stopping session");
            self.stop();
        }
    }

    /// Start streaming to `connection`.
    ///
    /// Fails with [`AcquisitionError::StreamBusy`] naming the active session
    /// if one is running; a running session is never preempted.
    pub fn start(&self, connection: ConnectionId) -> Result<()> {
        let mut state = self.state.lock();

        self.arbiter.claim_stream(connection)?;
        let Some(sink) = state.endpoints.remove(&connection) else {
            self.arbiter.release_stream(connection);
            return Err(AcquisitionError::StreamNotConnected { id: connection });
        };

        // The previous worker released its claim as its last act.
        if let Some(previous) = state.worker.take() {
            if previous.join().is_err() {
                error!("Previous stream worker panicked");
            }
        }

        let dma = self.hardware.dma_handle();
        if let Err(err) = dma.configure(self.settings.transfer_bytes()) {
            state.endpoints.insert(connection, sink);
            self.arbiter.release_stream(connection);
            return Err(err.into());
        }

        // Start before the worker exists: it clears any cancel latched by an
        // earlier stop.
        if let Err(err) = dma.start() {
            state.endpoints.insert(connection, sink);
            self.arbiter.release_stream(connection);
            return Err(err.into());
        }

        let flags = Arc::new(RunFlags::default());
        let worker = Worker {
            connection,
            hardware: self.hardware.clone(),
            arbiter: Arc::clone(&self.arbiter),
            settings: self.settings.clone(),
            flags: Arc::clone(&flags),
        };
        let spawned = thread::Builder::new()
            .name("aiod-stream-worker".to_string())
            .spawn(move || worker.run(sink));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(stop_err) = dma.stop() {
                    warn!(error = %stop_err, "Failed to stop DMA");
                }
                self.arbiter.release_stream(connection);
                return Err(err.into());
            }
        };

        state.worker = Some(handle);
        state.flags = Some(Arc::clone(&flags));

        info!(
            connection = %connection,
            transfer_bytes = self.settings.transfer_bytes(),
            ring_slots = self.settings.ring_slots,
            "Streaming session started"
        );
        Ok(())
    }

    /// Ask the running session to stop. Does not wait for it.
    ///
    /// Returns whether a session was active.
    pub fn stop(&self) -> bool {
        let state = self.state.lock();
        let active = self.arbiter.streaming_owner();
        if let Some(flags) = &state.flags {
            flags.stream_terminate.store(true, Ordering::SeqCst);
            self.hardware.dma().cancel_wait();
        }
        if let Some(connection) = active {
            info!(connection = %connection, "Streaming session stop requested");
        }
        active.is_some()
    }

    /// Active session and its progress.
    pub fn status(&self) -> StreamStatus {
        let state = self.state.lock();
        StreamStatus {
            active: self.arbiter.streaming_owner(),
            blocks_sent: state
                .flags
                .as_ref()
                .map_or(0, |flags| flags.blocks_sent.load(Ordering::SeqCst)),
        }
    }

    /// Stop any session and close every registered endpoint.
    pub fn shutdown(&self) {
        self.stop();
        let endpoints: Vec<_> = self.state.lock().endpoints.drain().collect();
        for (_, mut sink) in endpoints {
            sink.close();
        }
    }

    /// Wait for the worker of the last session to finish.
    pub fn join(&self) {
        let handle = self.state.lock().worker.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Stream worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("settings", &self.settings)
            .field("status", &self.status())
            .finish()
    }
}

struct Worker {
    connection: ConnectionId,
    hardware: Hardware,
    arbiter: Arc<AdcArbiter>,
    settings: StreamSettings,
    flags: Arc<RunFlags>,
}

impl Worker {
    fn run(self, sink: Box<dyn StreamSink>) {
        let (writer, reader) =
            match SlotRing::channel(self.settings.ring_slots, self.settings.transfer_bytes()) {
                Ok(ends) => ends,
                Err(err) => {
                    error!(error = %err, "Failed to build stream ring");
                    self.teardown(None);
                    return;
                }
            };

        let logger = {
            let flags = Arc::clone(&self.flags);
            let dma = self.hardware.dma_handle();
            let wait = self.settings.logger_wait;
            thread::Builder::new()
                .name("aiod-stream-logger".to_string())
                .spawn(move || run_logger(reader, sink, &flags, dma.as_ref(), wait))
        };
        let logger = match logger {
            Ok(handle) => handle,
            Err(err) => {
                error!(error = %err, "Failed to spawn stream logger");
                self.teardown(None);
                return;
            }
        };

        if let Err(err) = self.pump(writer) {
            error!(connection = %self.connection, error = %err, "Stream worker failed");
        }
        self.teardown(Some(logger));
    }

    /// Move DMA slots into the ring until terminated.
    fn pump(&self, mut writer: RingWriter) -> Result<()> {
        let dma = self.hardware.dma();
        let slot_count = dma.slot_count().max(1);

        while !self.terminated() {
            let ready = dma.ready()?;
            if ready.count == 0 {
                match dma.wait_for_irq()? {
                    IrqWait::Fired => continue,
                    IrqWait::Cancelled => break,
                }
            }

            for i in 0..ready.count {
                let slot = (ready.first_slot + i) % slot_count;
                loop {
                    if self.terminated() {
                        return Ok(());
                    }
                    let pushed = writer.push_with(self.settings.logger_wait, |buf| {
                        dma.copy_slot(slot, buf)
                    })?;
                    if pushed {
                        break;
                    }
                }
                dma.release(1)?;
            }
        }
        Ok(())
    }

    fn terminated(&self) -> bool {
        self.flags.stream_terminate.load(Ordering::SeqCst)
    }

    fn teardown(&self, logger: Option<JoinHandle<Box<dyn StreamSink>>>) {
        self.flags.stream_terminate.store(true, Ordering::SeqCst);
        self.flags.logger_terminate.store(true, Ordering::SeqCst);

        let sink = logger.and_then(|handle| match handle.join() {
            Ok(sink) => Some(sink),
            Err(_) => {
                error!("Stream logger panicked");
                None
            }
        });

        let port = self.hardware.registers();
        if let Err(err) = port.write(registers::OFS_ADC_TRIGGER, registers::TRIGGER_DISABLED) {
            warn!(error = %err, "Failed to idle ADC trigger");
        }
        if let Err(err) = self.hardware.dma().stop() {
            warn!(error = %err, "Failed to stop DMA");
        }
        if let Some(mut sink) = sink {
            sink.close();
        }
        self.arbiter.release_stream(self.connection);
        info!(
            connection = %self.connection,
            blocks_sent = self.flags.blocks_sent.load(Ordering::SeqCst),
            "Streaming session ended"
        );
    }
}

fn run_logger(
    mut reader: RingReader,
    mut sink: Box<dyn StreamSink>,
    flags: &RunFlags,
    dma: &dyn DmaEngine,
    wait: Duration,
) -> Box<dyn StreamSink> {
    while !flags.logger_terminate.load(Ordering::SeqCst) {
        let Some(block) = reader.pop_timeout(wait) else {
            continue;
        };
        if let Err(err) = sink.send(block) {
            warn!(error = %err, "Streaming client gone");
            flags.stream_terminate.store(true, Ordering::SeqCst);
            dma.cancel_wait();
            break;
        }
        reader.release();
        flags.blocks_sent.fetch_add(1, Ordering::SeqCst);
    }
    debug!("Stream logger exiting");
    sink
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = StreamSettings::default();
        assert_eq!(settings.ring_slots, 255);
        assert_eq!(settings.transfer_bytes(), 16384);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let settings = StreamSettings {
            ring_slots: 0,
            ..StreamSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = StreamSettings {
            transfer_samples: 0,
            ..StreamSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
