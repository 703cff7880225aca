//! Connection registry and broadcast fan-out.
//!
//! The registry owns the live set of connections. Each entry is an outbox:
//! an unbounded sender feeding that connection's writer task, so delivery to
//! one slow or dead client never blocks delivery to the others.

use crate::message::StoredMessage;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Self(format!("conn_{timestamp:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-connection delivery queue.
pub type Outbox = mpsc::UnboundedSender<Arc<StoredMessage>>;

/// The live set of connections eligible for broadcast.
///
/// Membership is not strongly consistent with in-flight broadcasts: a
/// message may or may not reach a connection that disconnects mid-broadcast.
/// Recovery on reconnect covers the gap.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Outbox>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the live set.
    pub fn add(&self, id: ConnectionId, outbox: Outbox) {
        debug!(connection = %id, "Connection registered");
        self.connections.insert(id, outbox);
    }

    /// Remove a connection from the live set.
    pub fn remove(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            debug!(connection = %id, "Connection deregistered");
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check whether the live set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Deliver a message to every live connection, best effort.
    ///
    /// Returns the number of outboxes that accepted the message. A failed
    /// send means the connection is shutting down; it is skipped, not
    /// retried.
    pub fn broadcast(&self, message: Arc<StoredMessage>) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if entry.value().send(Arc::clone(&message)).is_ok() {
                delivered += 1;
            } else {
                trace!(connection = %entry.key(), "Outbox closed, skipping delivery");
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<Arc<StoredMessage>>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_live_connections() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = outbox();
        let (tx2, mut rx2) = outbox();
        registry.add(ConnectionId::from("conn-1"), tx1);
        registry.add(ConnectionId::from("conn-2"), tx2);

        let msg = Arc::new(StoredMessage::new(1, "offset-1", "hello"));
        assert_eq!(registry.broadcast(msg), 2);

        assert_eq!(rx1.recv().await.unwrap().seq, 1);
        assert_eq!(rx2.recv().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn test_removed_connection_not_delivered() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = outbox();
        let (tx2, _rx2) = outbox();
        let gone = ConnectionId::from("conn-2");
        registry.add(ConnectionId::from("conn-1"), tx1);
        registry.add(gone.clone(), tx2);
        registry.remove(&gone);

        let msg = Arc::new(StoredMessage::new(1, "offset-1", "hello"));
        assert_eq!(registry.broadcast(msg), 1);
        assert_eq!(registry.len(), 1);
        assert!(rx1.recv().await.is_some());
    }

    #[test]
    fn test_broadcast_skips_closed_outbox() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = outbox();
        registry.add(ConnectionId::from("conn-1"), tx);
        drop(rx);

        // Closed receiver counts as undelivered but does not error.
        let msg = Arc::new(StoredMessage::new(1, "offset-1", "hello"));
        assert_eq!(registry.broadcast(msg), 0);
    }
}
