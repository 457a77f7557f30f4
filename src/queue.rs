//! Action queue and the single action thread.
//!
//! Every control connection pushes framed messages onto one FIFO. The action
//! thread pops them in enqueue order and executes their items one at a time,
//! so hardware sees a single writer no matter how many clients are attached.
//! A shutdown sentinel ends the thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use aiod_acquisition::{ScanEngine, StreamingSession};
use aiod_core::{ConnectionId, ErrorKind, Hardware, ShutdownSignal};
use aiod_protocol::{ExecContext, Item, Message, MessageType};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult};

/// Where the reply to a message goes.
pub trait ReplySink: Send + Sync {
    fn send_reply(&self, message: &Message) -> io::Result<()>;

    /// Drop the peer after a failed send.
    fn close(&self) {}
}

enum Action {
    /// Execute a request and reply with the result
    Execute {
        connection: ConnectionId,
        message: Message,
        reply: Arc<dyn ReplySink>,
    },
    /// Send an already built message, keeping its place in the reply order
    Deliver {
        connection: ConnectionId,
        message: Message,
        reply: Arc<dyn ReplySink>,
    },
    Shutdown,
}

/// Producer side of the action queue. Cheap to clone.
#[derive(Clone)]
pub struct ActionQueue {
    tx: mpsc::UnboundedSender<Action>,
}

/// Consumer side, moved into the action thread.
pub struct ActionReceiver {
    rx: mpsc::UnboundedReceiver<Action>,
}

impl ActionQueue {
    /// Create the queue and its single consumer.
    pub fn channel() -> (Self, ActionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, ActionReceiver { rx })
    }

    /// Queue a request. Returns `false` once the action thread is gone.
    pub fn submit(&self, connection: ConnectionId, message: Message, reply: Arc<dyn ReplySink>) -> bool {
        self.push(Action::Execute {
            connection,
            message,
            reply,
        })
    }

    /// Queue a ready-made reply, such as a framing error.
    pub fn deliver(&self, connection: ConnectionId, message: Message, reply: Arc<dyn ReplySink>) -> bool {
        self.push(Action::Deliver {
            connection,
            message,
            reply,
        })
    }

    /// Push the shutdown sentinel. Entries queued before it still run.
    pub fn close(&self) {
        let _ = self.tx.send(Action::Shutdown);
    }

    fn push(&self, action: Action) -> bool {
        self.tx.send(action).is_ok()
    }
}

impl ActionReceiver {
    /// Run the action thread on a dedicated OS thread.
    pub fn spawn(self, executor: MessageExecutor) -> DaemonResult<JoinHandle<()>> {
        let name = "aiod-actions".to_string();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(&executor))
            .map_err(|source| DaemonError::Spawn { name, source })
    }

    /// Pop and handle entries until the sentinel arrives or every producer
    /// is dropped.
    pub fn run(mut self, executor: &MessageExecutor) {
        info!("Action thread started");
        while let Some(action) = self.rx.blocking_recv() {
            match action {
                Action::Shutdown => break,
                Action::Execute {
                    connection,
                    message,
                    reply,
                } => {
                    let response = executor.execute(connection, message);
                    send(connection, &response, reply.as_ref());
                }
                Action::Deliver {
                    connection,
                    message,
                    reply,
                } => send(connection, &message, reply.as_ref()),
            }
        }
        info!("Action thread stopped");
    }
}

fn send(connection: ConnectionId, message: &Message, reply: &dyn ReplySink) {
    debug!(%connection, reply = %message.describe(), "Sending reply");
    if let Err(err) = reply.send_reply(message) {
        warn!(%connection, error = %err, "Reply failed, closing connection");
        reply.close();
    }
}

/// Executes messages against the board.
pub struct MessageExecutor {
    hardware: Hardware,
    scan: ScanEngine,
    streaming: Arc<StreamingSession>,
    shutdown: ShutdownSignal,
}

impl MessageExecutor {
    /// Executor over the shared board, engines and shutdown signal.
    pub fn new(
        hardware: Hardware,
        scan: ScanEngine,
        streaming: Arc<StreamingSession>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            hardware,
            scan,
            streaming,
            shutdown,
        }
    }

    /// Execute the items of `message` in order and build the reply.
    ///
    /// The first failing item ends execution of the message; the items after
    /// it are echoed unexecuted. Every failed item, whether rejected by the
    /// framer or during execution, adds a `Diagnostic` to the reply, which is
    /// then an `Error` message.
    pub fn execute(&self, connection: ConnectionId, mut message: Message) -> Message {
        if !matches!(message.kind, MessageType::Query | MessageType::Config) {
            warn!(%connection, kind = %message.kind, "Unexpected message type from client");
            return Message::error(
                ErrorKind::Semantic,
                &format!("unexpected message type '{}'", message.kind),
            );
        }

        let ctx = ExecContext {
            connection,
            hardware: &self.hardware,
            scan: &self.scan,
            streaming: self.streaming.as_ref(),
            shutdown: &self.shutdown,
        };
        debug!(%connection, request = %message.describe(), "Executing message");
        for item in &mut message.items {
            if let Err(err) = item.execute(&ctx) {
                warn!(
                    %connection,
                    item = %item.describe(false),
                    error = %err,
                    "Item failed, rest of the message skipped"
                );
                break;
            }
        }

        let diagnostics: Vec<Item> = message
            .items
            .iter()
            .filter_map(|item| {
                item.fault()
                    .map(|fault| Item::diagnostic(fault.kind, &item.describe(false)))
            })
            .collect();
        let mut reply = message.into_reply();
        reply.items.extend(diagnostics);
        reply
    }
}
