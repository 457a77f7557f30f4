//! Daemon lifecycle: wire the board, the engines, the action thread and both
//! listeners together, and take them down again in order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use aiod_acquisition::{AdcArbiter, ScanEngine, StreamStatus, StreamingSession};
use aiod_core::registers;
use aiod_core::{ConnectionIds, Hardware, MappedPort, NoDma, ShutdownSignal, SimulatedBoard};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{BoardBackend, BoardConfig, DaemonConfig};
use crate::connection::ReceiverSettings;
use crate::error::DaemonResult;
use crate::queue::{ActionQueue, ActionReceiver, MessageExecutor};
use crate::server::{ConnectionSet, Listener, ListenerRole};

/// Open the configured board backend.
pub fn open_backend(board: &BoardConfig) -> DaemonResult<Hardware> {
    match board.backend {
        BoardBackend::Simulated => {
            info!("Using simulated board");
            let sim = Arc::new(SimulatedBoard::new());
            Ok(Hardware::new(sim.clone(), sim))
        }
        BoardBackend::Mapped => {
            let port = MappedPort::open(&board.device_path, board.map_len)?;
            Ok(Hardware::new(Arc::new(port), Arc::new(NoDma)))
        }
    }
}

/// A running daemon.
///
/// Dropping it shuts it down.
pub struct Daemon {
    hardware: Hardware,
    streaming: Arc<StreamingSession>,
    queue: ActionQueue,
    shutdown: ShutdownSignal,
    connections: ConnectionSet,
    threads: Mutex<Vec<JoinHandle<()>>>,
    control_addr: SocketAddr,
    stream_addr: SocketAddr,
    stopped: AtomicBool,
}

impl Daemon {
    /// Open the configured backend and start serving.
    pub fn start(config: DaemonConfig) -> DaemonResult<Self> {
        let hardware = open_backend(&config.board)?;
        Self::start_with_hardware(&config, hardware)
    }

    /// Start serving on an already opened board.
    pub fn start_with_hardware(config: &DaemonConfig, hardware: Hardware) -> DaemonResult<Self> {
        config.validate()?;
        let shutdown = ShutdownSignal::new();
        let arbiter = Arc::new(AdcArbiter::new());
        let scan = ScanEngine::new(config.scan_settings(), Arc::clone(&arbiter));
        let streaming = Arc::new(StreamingSession::new(
            hardware.clone(),
            arbiter,
            config.stream_settings(),
        ));
        let (queue, receiver) = ActionQueue::channel();

        let control = Listener::bind(
            config.control_addr(),
            ListenerRole::Control {
                queue: queue.clone(),
                settings: ReceiverSettings {
                    max_message_bytes: config.server.max_message_bytes,
                    read_timeout: config.read_timeout(),
                },
            },
        )?;
        let stream = Listener::bind(
            config.stream_addr(),
            ListenerRole::Stream {
                streaming: Arc::clone(&streaming),
                read_timeout: config.read_timeout(),
            },
        )?;

        let daemon = Self {
            hardware: hardware.clone(),
            streaming: Arc::clone(&streaming),
            queue,
            shutdown: shutdown.clone(),
            connections: ConnectionSet::new(),
            threads: Mutex::new(Vec::new()),
            control_addr: control.local_addr()?,
            stream_addr: stream.local_addr()?,
            stopped: AtomicBool::new(false),
        };

        let executor = MessageExecutor::new(hardware, scan, streaming, shutdown);
        if let Err(err) = daemon.spawn_threads(receiver, executor, control, stream) {
            daemon.shutdown();
            return Err(err);
        }
        info!(
            control = %daemon.control_addr,
            streaming = %daemon.stream_addr,
            "Daemon started"
        );
        Ok(daemon)
    }

    fn spawn_threads(
        &self,
        receiver: ActionReceiver,
        executor: MessageExecutor,
        control: Listener,
        stream: Listener,
    ) -> DaemonResult<()> {
        let ids = ConnectionIds::new();
        let mut threads = self.threads.lock();
        threads.push(receiver.spawn(executor)?);
        threads.push(control.spawn(ids.clone(), self.connections.clone(), self.shutdown.clone())?);
        threads.push(stream.spawn(ids, self.connections.clone(), self.shutdown.clone())?);
        Ok(())
    }

    /// Bound address of the control listener.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Bound address of the streaming listener.
    pub fn stream_addr(&self) -> SocketAddr {
        self.stream_addr
    }

    /// Process-wide shutdown signal.
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Current streaming session.
    pub fn stream_status(&self) -> StreamStatus {
        self.streaming.status()
    }

    /// Resolve once shutdown has been requested, by `BRD_Reboot` or by
    /// [`request_shutdown`](Self::request_shutdown).
    pub async fn wait(&self) {
        self.shutdown.wait().await;
    }

    /// Ask the daemon to stop; [`wait`](Self::wait) then resolves.
    pub fn request_shutdown(&self, reason: &str) {
        self.shutdown.request(reason);
    }

    /// Stop streaming, drain the action queue up to the sentinel, join every
    /// thread, then leave the ADC trigger disabled. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Daemon shutting down");
        self.shutdown.request("daemon shutdown");
        self.streaming.shutdown();
        self.queue.close();

        let threads: Vec<JoinHandle<()>> = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                warn!("Daemon thread panicked");
            }
        }
        self.connections.close_all();
        // A start queued ahead of the sentinel may have opened a new session
        self.streaming.shutdown();
        self.streaming.join();

        if let Err(err) = self
            .hardware
            .registers()
            .write(registers::OFS_ADC_TRIGGER, registers::TRIGGER_DISABLED)
        {
            warn!(error = %err, "Failed to idle the ADC trigger");
        }
        info!("Daemon stopped");
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}
