//! Broadcast hub for Relay.
//!
//! The hub delivers one invocation to every open connection, independently
//! per connection: fan-out enqueues the payload onto each connection's own
//! outbound queue, so a slow or dead peer never delays the others.

use crate::registry::{ConnectionId, EnqueueError, Registry};
use bytes::Bytes;
use relay_protocol::{codec, Frame, ProtocolError};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// The broadcast hub.
///
/// Delivery is best-effort and fire-and-forget: a send failure unregisters
/// the affected connection and is never surfaced to the broadcast caller.
/// Per connection, payloads preserve the order in which broadcasts were
/// issued; no ordering is guaranteed across connections.
pub struct Hub {
    registry: Arc<Registry>,
    /// Serializes the enqueue phase of concurrent broadcasts so that every
    /// connection observes the same global broadcast order.
    fanout: Mutex<()>,
}

impl Hub {
    /// Create a hub over a registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            fanout: Mutex::new(()),
        }
    }

    /// The registry this hub fans out over.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Broadcast an invocation to all currently open connections.
    ///
    /// The invocation is encoded once; the shared payload is then enqueued
    /// onto every connection in the registry snapshot. Enqueueing is
    /// non-blocking. A connection whose queue is closed is unregistered
    /// and skipped; that failure is not surfaced here.
    ///
    /// Returns the number of connections the payload was enqueued to.
    ///
    /// # Errors
    ///
    /// Returns an error only if the invocation itself cannot be encoded.
    pub fn broadcast(&self, target: &str, args: Vec<Value>) -> Result<usize, ProtocolError> {
        let payload = codec::encode(&Frame::invocation(target, args))?;

        let _order = self.fanout.lock().unwrap_or_else(PoisonError::into_inner);

        let mut delivered = 0;
        for id in self.registry.snapshot() {
            match self.registry.enqueue(id, payload.clone()) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::QueueClosed) => {
                    debug!(connection = %id, "Send failed, unregistering");
                    self.registry.unregister(id);
                }
                // Raced with an unregister between snapshot and enqueue
                Err(EnqueueError::NotFound) => {}
            }
        }

        trace!(target = %target, recipients = delivered, "Broadcast");
        Ok(delivered)
    }

    /// Send a frame to a single connection.
    ///
    /// Used to report errors back to the sender of a failing invocation.
    /// Returns `true` if the frame was enqueued; a closed queue
    /// unregisters the connection, as in [`Hub::broadcast`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the frame cannot be encoded.
    pub fn send_to(&self, id: ConnectionId, frame: &Frame) -> Result<bool, ProtocolError> {
        let payload = codec::encode(frame)?;
        Ok(self.enqueue_or_evict(id, payload))
    }

    fn enqueue_or_evict(&self, id: ConnectionId, payload: Bytes) -> bool {
        match self.registry.enqueue(id, payload) {
            Ok(()) => true,
            Err(EnqueueError::QueueClosed) => {
                debug!(connection = %id, "Send failed, unregistering");
                self.registry.unregister(id);
                false
            }
            Err(EnqueueError::NotFound) => false,
        }
    }
}
