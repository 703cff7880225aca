//! Stored message types.

use serde::{Deserialize, Serialize};

/// A message's position in the durable log.
///
/// Sequence numbers are assigned by the store at append time, strictly
/// increase, and are never reused. The highest sequence number a client has
/// seen is its recovery cursor.
pub type Seq = u64;

/// A durably stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Server-assigned sequence number.
    pub seq: Seq,
    /// Client-supplied idempotency key, unique across all messages.
    pub client_offset: String,
    /// Message text. Opaque to the server.
    pub content: String,
}

impl StoredMessage {
    /// Create a new stored message.
    #[must_use]
    pub fn new(seq: Seq, client_offset: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            seq,
            client_offset: client_offset.into(),
            content: content.into(),
        }
    }
}
