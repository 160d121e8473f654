//! Connection identity, handles and per-server lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection and server IDs for tracing
//! - Define the handle contract the terminator observes (`Connection`, `InFlightResponse`)
//! - Provide the concrete `SocketHandle` used by the HTTP server
//! - Count live connections per server so `close` can wait for them

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hyper::header::{HeaderName, HeaderValue};
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

static SERVER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Unique identifier for a server instance. Used to tell which server owns a connection
/// when several servers share one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(u64);

impl ServerId {
    pub fn new() -> Self {
        Self(SERVER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server-{}", self.0)
    }
}

/// Transport kind of a connection (and of the server that accepted it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Plaintext TCP.
    Plain,
    /// TLS over TCP.
    Secure,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Plain => "plain",
            ConnectionKind::Secure => "secure",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The response currently being produced on a connection.
pub trait InFlightResponse: Send + Sync {
    /// Whether the response head has already been handed to the transport.
    fn headers_sent(&self) -> bool;

    /// Add a header to the response head unless headers are already sent.
    ///
    /// The check and the write are one step; returns whether the header was taken.
    fn set_header(&self, name: HeaderName, value: HeaderValue) -> bool;
}

/// A live accepted connection as seen by the registry and the terminator.
pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    /// The server that accepted this connection.
    fn server_id(&self) -> ServerId;

    /// The in-flight response, present only while a request is being served.
    fn in_flight(&self) -> Option<Arc<dyn InFlightResponse>>;

    /// Forcefully close the connection. Must be idempotent.
    fn destroy(&self) -> io::Result<()>;
}

/// Connection handle owned jointly by the server's connection task and the registry.
///
/// `destroy` flips a watch flag; the connection task drops the socket when it sees it.
pub struct SocketHandle {
    id: ConnectionId,
    server_id: ServerId,
    kind: ConnectionKind,
    peer_addr: std::net::SocketAddr,
    in_flight: Mutex<Option<Arc<dyn InFlightResponse>>>,
    destroy_tx: watch::Sender<bool>,
}

impl SocketHandle {
    /// Create a handle and the receiver the connection task watches for destruction.
    pub fn new(
        server_id: ServerId,
        kind: ConnectionKind,
        peer_addr: std::net::SocketAddr,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (destroy_tx, destroy_rx) = watch::channel(false);
        let handle = Arc::new(Self {
            id: ConnectionId::new(),
            server_id,
            kind,
            peer_addr,
            in_flight: Mutex::new(None),
            destroy_tx,
        });
        (handle, destroy_rx)
    }

    pub fn peer_addr(&self) -> std::net::SocketAddr {
        self.peer_addr
    }

    /// Whether `destroy` has been requested.
    pub fn is_destroyed(&self) -> bool {
        *self.destroy_tx.borrow()
    }

    /// Associate an in-flight response with this connection.
    pub fn attach(&self, response: Arc<dyn InFlightResponse>) {
        *self.in_flight.lock().expect("in-flight mutex poisoned") = Some(response);
    }

    /// Clear the in-flight association, but only if it still points at `response`.
    /// A pipelined follow-up request may already have replaced it.
    pub fn detach(&self, response: &Arc<dyn InFlightResponse>) {
        let mut slot = self.in_flight.lock().expect("in-flight mutex poisoned");
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, response)) {
            *slot = None;
        }
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("kind", &self.kind)
            .field("peer_addr", &self.peer_addr)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Connection for SocketHandle {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn server_id(&self) -> ServerId {
        self.server_id
    }

    fn in_flight(&self) -> Option<Arc<dyn InFlightResponse>> {
        self.in_flight.lock().expect("in-flight mutex poisoned").clone()
    }

    fn destroy(&self) -> io::Result<()> {
        if !self.destroy_tx.send_replace(true) {
            tracing::debug!(connection_id = %self.id, peer_addr = %self.peer_addr, "Destroying connection");
        }
        Ok(())
    }
}

/// Tracks the live connections of one server.
///
/// Uses a watch channel so `wait_idle` resolves as soon as the count reaches zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id,
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> usize {
        *self.active.borrow()
    }

    /// Wait until every tracked connection has been dropped.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<usize>>,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NullResponse;

    impl InFlightResponse for NullResponse {
        fn headers_sent(&self) -> bool {
            false
        }

        fn set_header(&self, _name: HeaderName, _value: HeaderValue) -> bool {
            true
        }
    }

    fn peer() -> std::net::SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn server_id_unique() {
        assert_ne!(ServerId::new(), ServerId::new());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_last_guard_drops() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track(ConnectionId::new());

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle should resolve")
            .unwrap();
    }

    #[test]
    fn destroy_is_idempotent() {
        let (handle, rx) = SocketHandle::new(ServerId::new(), ConnectionKind::Plain, peer());
        assert!(!*rx.borrow());

        handle.destroy().unwrap();
        handle.destroy().unwrap();
        assert!(handle.is_destroyed());
        assert!(*rx.borrow());
    }

    #[test]
    fn detach_ignores_stale_response() {
        let (handle, _rx) = SocketHandle::new(ServerId::new(), ConnectionKind::Secure, peer());
        let first: Arc<dyn InFlightResponse> = Arc::new(NullResponse);
        let second: Arc<dyn InFlightResponse> = Arc::new(NullResponse);

        handle.attach(first.clone());
        handle.attach(second.clone());
        handle.detach(&first);
        assert!(handle.in_flight().is_some());

        handle.detach(&second);
        assert!(handle.in_flight().is_none());
    }
}
