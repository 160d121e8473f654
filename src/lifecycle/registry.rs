//! Registry of live connections, partitioned by transport kind.
//!
//! One registry is shared by every server in the process. Servers insert each
//! accepted connection and hold the returned [`CloseObserver`] for as long as the
//! socket lives; terminators read snapshots and remove what they destroy.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::net::connection::{Connection, ConnectionId, ConnectionKind, ServerId};
use crate::observability::metrics;

type ConnectionSet = DashMap<ConnectionId, Arc<dyn Connection>>;

#[derive(Default)]
struct RegistryInner {
    plain: ConnectionSet,
    secure: ConnectionSet,
}

impl RegistryInner {
    fn set(&self, kind: ConnectionKind) -> &ConnectionSet {
        match kind {
            ConnectionKind::Plain => &self.plain,
            ConnectionKind::Secure => &self.secure,
        }
    }
}

/// Process-wide set of open connections.
///
/// Cloning is cheap and yields a handle to the same sets.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection into the set for `kind`.
    ///
    /// The returned observer removes the entry when dropped, which the owner does
    /// once the transport has closed the socket.
    #[must_use = "dropping the observer deregisters the connection immediately"]
    pub fn track(&self, connection: Arc<dyn Connection>, kind: ConnectionKind) -> CloseObserver {
        let id = connection.id();
        let set = self.inner.set(kind);
        set.insert(id, connection);
        metrics::set_tracked_connections(kind, set.len());

        tracing::trace!(connection_id = %id, %kind, "Connection tracked");
        CloseObserver {
            registry: self.clone(),
            id,
            kind,
            armed: true,
        }
    }

    /// Copy of the current members of a set. Safe to iterate while entries are removed.
    pub fn snapshot(&self, kind: ConnectionKind) -> Vec<Arc<dyn Connection>> {
        self.inner
            .set(kind)
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Like [`snapshot`](Self::snapshot), restricted to connections accepted by `server`.
    pub fn snapshot_owned_by(&self, kind: ConnectionKind, server: ServerId) -> Vec<Arc<dyn Connection>> {
        self.inner
            .set(kind)
            .iter()
            .filter(|entry| entry.value().server_id() == server)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Remove a connection. Returns whether it was present; removing twice is a no-op.
    pub fn remove(&self, id: ConnectionId, kind: ConnectionKind) -> bool {
        let set = self.inner.set(kind);
        let removed = set.remove(&id).is_some();
        if removed {
            metrics::set_tracked_connections(kind, set.len());
            tracing::trace!(connection_id = %id, %kind, "Connection untracked");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId, kind: ConnectionKind) -> bool {
        self.inner.set(kind).contains_key(&id)
    }

    pub fn len(&self, kind: ConnectionKind) -> usize {
        self.inner.set(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.plain.is_empty() && self.inner.secure.is_empty()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("plain", &self.inner.plain.len())
            .field("secure", &self.inner.secure.len())
            .finish()
    }
}

/// One-shot deregistration handle for a tracked connection.
///
/// Fires on [`deregister`](Self::deregister) or on drop, whichever comes first. Firing
/// after a terminator already removed the entry is harmless.
#[derive(Debug)]
pub struct CloseObserver {
    registry: ConnectionRegistry,
    id: ConnectionId,
    kind: ConnectionKind,
    armed: bool,
}

impl CloseObserver {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remove the connection from its set now.
    pub fn deregister(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if std::mem::take(&mut self.armed) {
            self.registry.remove(self.id, self.kind);
        }
    }
}

impl Drop for CloseObserver {
    fn drop(&mut self) {
        self.fire();
    }
}
