//! Connection registry for Relay.
//!
//! The registry tracks every currently open connection together with its
//! outbound queue. A connection is `Open` while its entry exists; removal
//! is the `Closed` state, so a closed connection can never appear in a
//! broadcast snapshot.

use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Sender half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Bytes>;

/// Receiver half of a connection's outbound queue, owned by the
/// connection's writer task.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Bytes>;

/// A unique, opaque connection identifier assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Get the raw id value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Errors from enqueueing a payload onto a connection's outbound queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    /// No entry for the id (unknown or already unregistered).
    #[error("Connection not found")]
    NotFound,

    /// The queue's receiver is gone; the connection is dead.
    #[error("Outbound queue closed")]
    QueueClosed,
}

/// Registry entry for one open connection.
struct Entry {
    sender: OutboundSender,
}

/// Tracks all currently open connections.
///
/// The internal map is the only state shared across connection-handling
/// tasks. Each entry exclusively owns that connection's outbound sender;
/// other components enqueue through the registry, never directly.
pub struct Registry {
    connections: DashMap<ConnectionId, Entry>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection, storing the sender half of its outbound
    /// queue, and assign it a fresh unique id.
    pub fn register(&self, sender: OutboundSender) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.insert(id, Entry { sender });
        debug!(connection = %id, "Connection registered");
        id
    }

    /// Remove a connection from the registry.
    ///
    /// Idempotent: unregistering an unknown or already removed id is a
    /// no-op. Dropping the entry closes the outbound queue, so any writer
    /// task draining it terminates without further coordination.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            debug!(connection = %id, "Connection unregistered");
        }
        removed
    }

    /// Check whether a connection is currently open.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Snapshot the ids of all currently open connections.
    ///
    /// The snapshot never contains an id whose unregistration completed
    /// before this call started, and always contains every id whose
    /// registration completed before this call started.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the registry has no open connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Enqueue an encoded payload onto a connection's outbound queue.
    ///
    /// Non-blocking: the queue is unbounded, so a slow peer never stalls
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id and `QueueClosed` when the
    /// receiver side is gone.
    pub fn enqueue(&self, id: ConnectionId, payload: Bytes) -> Result<(), EnqueueError> {
        let entry = self.connections.get(&id).ok_or(EnqueueError::NotFound)?;
        trace!(connection = %id, bytes = payload.len(), "Enqueue outbound payload");
        entry
            .sender
            .send(payload)
            .map_err(|_| EnqueueError::QueueClosed)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_one(registry: &Registry) -> (ConnectionId, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.register(tx), rx)
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let registry = Registry::new();
        let (id1, _rx1) = register_one(&registry);
        let (id2, _rx2) = register_one(&registry);

        assert_ne!(id1, id2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_reflects_membership() {
        let registry = Registry::new();
        let (id1, _rx1) = register_one(&registry);
        let (id2, _rx2) = register_one(&registry);

        let snapshot = registry.snapshot();
        assert!(snapshot.contains(&id1));
        assert!(snapshot.contains(&id2));

        registry.unregister(id1);
        let snapshot = registry.snapshot();
        assert!(!snapshot.contains(&id1));
        assert!(snapshot.contains(&id2));
    }

    #[test]
    fn test_unregister_idempotent() {
        let registry = Registry::new();
        let (id, _rx) = register_one(&registry);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());

        // Unknown id is also a no-op
        let other = Registry::new();
        let (foreign, _rx2) = register_one(&other);
        assert!(!registry.unregister(foreign));
    }

    #[test]
    fn test_enqueue_delivers_in_order() {
        let registry = Registry::new();
        let (id, mut rx) = register_one(&registry);

        registry.enqueue(id, Bytes::from_static(b"first")).unwrap();
        registry.enqueue(id, Bytes::from_static(b"second")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"first"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"second"));
    }

    #[test]
    fn test_enqueue_unknown_and_closed() {
        let registry = Registry::new();
        let (id, rx) = register_one(&registry);

        drop(rx);
        assert_eq!(
            registry.enqueue(id, Bytes::from_static(b"x")),
            Err(EnqueueError::QueueClosed)
        );

        registry.unregister(id);
        assert_eq!(
            registry.enqueue(id, Bytes::from_static(b"x")),
            Err(EnqueueError::NotFound)
        );
    }
}
