//! # ripple-core
//!
//! Message ingestion, deduplication, persistence, and recovery for the
//! Ripple broadcast chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **MessageStore** - Durable, append-only message log (SQLite)
//! - **IngestGate** - At-most-once acceptance per client idempotency key
//! - **recover** - Backlog replay for (re)connecting clients
//! - **ConnectionRegistry** - Live-connection set and broadcast fan-out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │   Publish   │────▶│ IngestGate  │────▶│ MessageStore │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                            │                    ▲
//!                            ▼                    │ read_after
//!                  ┌────────────────────┐   ┌──────────┐
//!                  │ ConnectionRegistry │◀──│ recover  │
//!                  └────────────────────┘   └──────────┘
//! ```

pub mod ingest;
pub mod message;
pub mod recovery;
pub mod registry;
pub mod store;

pub use ingest::{IngestGate, IngestOutcome};
pub use message::{Seq, StoredMessage};
pub use recovery::recover;
pub use registry::{ConnectionId, ConnectionRegistry, Outbox};
pub use store::{MessageStore, StoreError};

#[cfg(test)]
pub(crate) mod testing {
    use crate::store::MessageStore;

    /// Open a store on a throwaway on-disk database. The directory guard
    /// must outlive the store.
    pub(crate) async fn temp_store() -> (MessageStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/messages.db", dir.path().display());
        let store = MessageStore::open(&url, 5).await.unwrap();
        (store, dir)
    }
}
