//! Small shared types: connection ids and the process-wide shutdown signal.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::info;

/// Identifier of one accepted connection (control or streaming).
///
/// Ids are unique across both listeners for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Top bit set on the streaming hello value.
    pub const HELLO_FLAG: u32 = 0x8000_0000;

    /// Raw value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Value sent as the streaming hello.
    pub fn hello(self) -> u32 {
        self.0 | Self::HELLO_FLAG
    }

    /// Recover an id from a hello value or a plain id.
    pub fn from_wire(value: u32) -> Self {
        Self(value & !Self::HELLO_FLAG)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Allocates [`ConnectionId`]s.
#[derive(Debug, Clone, Default)]
pub struct ConnectionIds {
    next: Arc<AtomicU32>,
}

impl ConnectionIds {
    /// Start numbering at 1; 0 never identifies a connection.
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Next unused id.
    pub fn allocate(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::SeqCst) & !ConnectionId::HELLO_FLAG)
    }
}

struct ShutdownInner {
    requested: AtomicBool,
    notify: Notify,
}

/// Process-wide shutdown request.
///
/// Threads poll [`is_requested`](Self::is_requested); the async entry point
/// awaits [`wait`](Self::wait).
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

impl ShutdownSignal {
    /// New, not yet requested.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownInner {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn request(&self, reason: &str) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            info!(reason, "Shutdown requested");
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("requested", &self.is_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hello_roundtrip() {
        let id = ConnectionId(42);
        assert_eq!(id.hello(), 0x8000_002A);
        assert_eq!(ConnectionId::from_wire(id.hello()), id);
        assert_eq!(ConnectionId::from_wire(42), id);
    }

    #[test]
    fn test_ids_are_unique() {
        let ids = ConnectionIds::new();
        let a = ids.allocate();
        let b = ids.clone().allocate();
        assert_ne!(a, b);
        assert_eq!(a, ConnectionId(1));
    }

    #[tokio::test]
    async fn test_shutdown_wait_resolves() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.request("test");
        signal.request("again");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait did not resolve")
            .expect("task panicked");
        assert!(signal.is_requested());
    }
}
