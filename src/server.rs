//! Control and streaming listeners.
//!
//! Each listener runs its own accept thread. Accepting is polled so the
//! thread notices shutdown; every accepted connection gets a fresh
//! [`ConnectionId`] from the shared allocator and its own thread.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use aiod_acquisition::StreamingSession;
use aiod_core::{ConnectionId, ConnectionIds, ShutdownSignal};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{self, ReceiverSettings};
use crate::error::{DaemonError, DaemonResult};
use crate::queue::ActionQueue;

/// Sleep between accept polls.
const ACCEPT_POLL: Duration = Duration::from_millis(20);

struct Tracked {
    connection: ConnectionId,
    stream: TcpStream,
    thread: JoinHandle<()>,
}

/// Threads of live connections, so shutdown can close and join them.
#[derive(Clone, Default)]
pub struct ConnectionSet {
    inner: Arc<Mutex<Vec<Tracked>>>,
}

impl ConnectionSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, connection: ConnectionId, stream: TcpStream, thread: JoinHandle<()>) {
        let mut tracked = self.inner.lock();
        tracked.retain(|entry| !entry.thread.is_finished());
        tracked.push(Tracked {
            connection,
            stream,
            thread,
        });
    }

    /// Connections whose threads are still running.
    pub fn live(&self) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|entry| !entry.thread.is_finished())
            .count()
    }

    /// Shut every socket down and join the connection threads.
    pub fn close_all(&self) {
        let tracked: Vec<Tracked> = std::mem::take(&mut *self.inner.lock());
        for entry in &tracked {
            let _ = entry.stream.shutdown(Shutdown::Both);
        }
        for entry in tracked {
            if entry.thread.join().is_err() {
                warn!(connection = %entry.connection, "Connection thread panicked");
            }
        }
    }
}

/// What a listener does with each accepted connection.
#[derive(Clone)]
pub enum ListenerRole {
    /// Frame requests onto the action queue
    Control {
        queue: ActionQueue,
        settings: ReceiverSettings,
    },
    /// Register a streaming endpoint
    Stream {
        streaming: Arc<StreamingSession>,
        read_timeout: Duration,
    },
}

impl ListenerRole {
    fn name(&self) -> &'static str {
        match self {
            Self::Control { .. } => "control",
            Self::Stream { .. } => "streaming",
        }
    }
}

/// Bound listener, ready to spawn its accept thread.
pub struct Listener {
    listener: TcpListener,
    role: ListenerRole,
}

impl Listener {
    /// Bind `addr` in nonblocking mode.
    pub fn bind(addr: SocketAddr, role: ListenerRole) -> DaemonResult<Self> {
        let name = role.name();
        let bind_error = |source| DaemonError::Bind {
            listener: name,
            addr,
            source,
        };
        let listener = TcpListener::bind(addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        Ok(Self { listener, role })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept thread. It runs until shutdown is requested.
    pub fn spawn(
        self,
        ids: ConnectionIds,
        connections: ConnectionSet,
        shutdown: ShutdownSignal,
    ) -> DaemonResult<JoinHandle<()>> {
        let name = format!("aiod-{}-listener", self.role.name());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.accept_loop(&ids, &connections, &shutdown))
            .map_err(|source| DaemonError::Spawn { name, source })
    }

    fn accept_loop(self, ids: &ConnectionIds, connections: &ConnectionSet, shutdown: &ShutdownSignal) {
        let role = self.role.name();
        if let Ok(addr) = self.listener.local_addr() {
            info!(listener = role, %addr, "Listening");
        }
        while !shutdown.is_requested() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let connection = ids.allocate();
                    info!(listener = role, %connection, %peer, "Accepted connection");
                    if let Err(err) = self.start_connection(connection, stream, connections, shutdown) {
                        warn!(listener = role, %connection, error = %err, "Dropping connection");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(err) => {
                    warn!(listener = role, error = %err, "Accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!(listener = role, "Listener stopped");
    }

    fn start_connection(
        &self,
        connection: ConnectionId,
        stream: TcpStream,
        connections: &ConnectionSet,
        shutdown: &ShutdownSignal,
    ) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        let _ = stream.set_nodelay(true);
        let handle = stream.try_clone()?;
        let shutdown = shutdown.clone();

        let thread = match self.role.clone() {
            ListenerRole::Control { queue, settings } => thread::Builder::new()
                .name(format!("aiod-control-{}", connection.get()))
                .spawn(move || connection::run_control(connection, stream, settings, &queue, &shutdown))?,
            ListenerRole::Stream {
                streaming,
                read_timeout,
            } => thread::Builder::new()
                .name(format!("aiod-stream-{}", connection.get()))
                .spawn(move || {
                    connection::run_stream(connection, stream, read_timeout, &streaming, &shutdown)
                })?,
        };
        connections.track(connection, handle, thread);
        Ok(())
    }
}
