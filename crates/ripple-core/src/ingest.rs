//! Ingestion gate: deduplicated publish handling.
//!
//! The gate is the single entry point for client publishes. Uniqueness is
//! delegated to the store's atomic insert, so a retried publish whose first
//! attempt already landed is classified as [`IngestOutcome::Ignored`] and is
//! never broadcast a second time.

use crate::message::StoredMessage;
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, StoreError};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a publish attempt that reached the store.
///
/// Store failures are reported as `Err(StoreError)` by
/// [`IngestGate::ingest`]; the caller decides logging and client-facing
/// policy.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Newly persisted; every live connection was offered the message.
    Accepted {
        /// The stored message, as broadcast.
        message: Arc<StoredMessage>,
        /// Number of live connections whose outbox accepted it.
        delivered: usize,
    },
    /// The idempotency key was already stored. Nothing was written or
    /// broadcast, and this is not an error: the original attempt succeeded.
    Ignored,
}

/// Dedup/ingestion gate in front of the message store.
#[derive(Debug, Clone)]
pub struct IngestGate {
    store: MessageStore,
    registry: Arc<ConnectionRegistry>,
}

impl IngestGate {
    /// Create a gate over `store` that fans accepted messages out through
    /// `registry`.
    #[must_use]
    pub fn new(store: MessageStore, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Ingest one publish attempt.
    ///
    /// On acceptance the message is broadcast to the live set exactly once.
    /// Duplicates and failures broadcast nothing.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`StoreError`] when the append fails for any
    /// reason other than a duplicate offset.
    pub async fn ingest(
        &self,
        client_offset: &str,
        content: &str,
    ) -> Result<IngestOutcome, StoreError> {
        match self.store.append(client_offset, content).await {
            Ok(seq) => {
                let message = Arc::new(StoredMessage::new(seq, client_offset, content));
                let delivered = self.registry.broadcast(Arc::clone(&message));
                debug!(seq, delivered, "Message accepted and broadcast");
                Ok(IngestOutcome::Accepted { message, delivered })
            }
            Err(StoreError::Duplicate) => {
                debug!(client_offset, "Duplicate publish ignored");
                Ok(IngestOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }
}
