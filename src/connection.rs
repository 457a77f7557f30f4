//! Per-connection threads.
//!
//! A control connection gets a receiver that frames its bytes and queues the
//! resulting messages; replies go back through [`TcpReplies`] from the action
//! thread. A streaming connection is handed to the streaming session as an
//! endpoint and then only watched for disconnect.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use aiod_acquisition::StreamingSession;
use aiod_core::{ConnectionId, ErrorKind, ShutdownSignal};
use aiod_protocol::{Message, MessageFramer};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::queue::{ActionQueue, ReplySink};

const READ_CHUNK: usize = 4096;

/// Write half of a control connection.
pub struct TcpReplies {
    stream: Mutex<TcpStream>,
}

impl TcpReplies {
    /// Wrap a cloned control socket.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }
}

impl ReplySink for TcpReplies {
    fn send_reply(&self, message: &Message) -> io::Result<()> {
        let mut stream = self.stream.lock();
        stream.write_all(&message.encode())?;
        stream.flush()
    }

    fn close(&self) {
        let _ = self.stream.lock().shutdown(Shutdown::Both);
    }
}

/// Settings shared by every control receiver.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverSettings {
    /// Framer limit on declared message length
    pub max_message_bytes: usize,
    /// Socket read timeout, how often shutdown is rechecked
    pub read_timeout: Duration,
}

/// Greet a new control connection and pump its input until it closes or
/// shutdown is requested.
pub fn run_control(
    connection: ConnectionId,
    mut stream: TcpStream,
    settings: ReceiverSettings,
    queue: &ActionQueue,
    shutdown: &ShutdownSignal,
) {
    let replies: Arc<dyn ReplySink> = match stream.try_clone() {
        Ok(writer) => Arc::new(TcpReplies::new(writer)),
        Err(err) => {
            warn!(%connection, error = %err, "Could not split control connection");
            return;
        }
    };
    if let Err(err) = stream.set_read_timeout(Some(settings.read_timeout)) {
        warn!(%connection, error = %err, "Could not set read timeout");
        return;
    }
    if let Err(err) = replies.send_reply(&Message::hello(connection)) {
        warn!(%connection, error = %err, "Hello failed");
        return;
    }

    let mut framer = MessageFramer::new(settings.max_message_bytes);
    let mut buf = [0u8; READ_CHUNK];
    while !shutdown.is_requested() {
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                info!(%connection, "Control connection closed by peer");
                replies.close();
                return;
            }
            Ok(n) => n,
            Err(err) if is_poll_timeout(&err) => continue,
            Err(err) => {
                warn!(%connection, error = %err, "Control connection receive failed");
                replies.close();
                return;
            }
        };
        framer.extend(&buf[..n]);

        while let Some(next) = framer.next_message() {
            let queued = match next {
                Ok(message) => queue.submit(connection, message, Arc::clone(&replies)),
                Err(err) => {
                    warn!(%connection, error = %err, "Framing error");
                    queue.deliver(
                        connection,
                        Message::error(ErrorKind::Framing, &err.to_string()),
                        Arc::clone(&replies),
                    )
                }
            };
            if !queued {
                debug!(%connection, "Action queue closed, dropping connection");
                replies.close();
                return;
            }
        }
    }
    // On shutdown the socket stays open for replies still queued; the
    // daemon closes it once the action thread has stopped.
}

/// Register a streaming connection with the session and hold it until the
/// peer goes away.
///
/// The peer first receives its hello: the connection id with the top bit
/// set. Anything the peer sends afterwards is discarded.
pub fn run_stream(
    connection: ConnectionId,
    mut stream: TcpStream,
    read_timeout: Duration,
    streaming: &StreamingSession,
    shutdown: &ShutdownSignal,
) {
    let sink = match stream.try_clone() {
        Ok(sink) => sink,
        Err(err) => {
            warn!(%connection, error = %err, "Could not split streaming connection");
            return;
        }
    };
    if let Err(err) = stream.set_read_timeout(Some(read_timeout)) {
        warn!(%connection, error = %err, "Could not set read timeout");
        return;
    }
    // Registered before the hello so a start naming this id can never miss it
    streaming.register_endpoint(connection, Box::new(sink));
    if let Err(err) = stream.write_all(&connection.hello().to_le_bytes()) {
        warn!(%connection, error = %err, "Streaming hello failed");
        streaming.deregister_endpoint(connection);
        return;
    }

    let mut buf = [0u8; 256];
    while !shutdown.is_requested() {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(err) if is_poll_timeout(&err) => continue,
            Err(err) => {
                debug!(%connection, error = %err, "Streaming connection receive failed");
                break;
            }
        }
    }
    info!(%connection, "Streaming connection closed");
    streaming.deregister_endpoint(connection);
}

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
