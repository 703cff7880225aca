//! Durable message log backed by SQLite.
//!
//! The log is append-only and strictly ordered: `AUTOINCREMENT` assigns each
//! accepted message a permanent, monotonically increasing sequence number,
//! and the `UNIQUE` constraint on `client_offset` makes retried publishes
//! collide at the storage layer instead of racing an application-level
//! check-then-insert.

use crate::message::{Seq, StoredMessage};
use futures_util::{Stream, StreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The client offset is already present; no row was written.
    #[error("duplicate client offset")]
    Duplicate,

    /// Underlying database failure.
    #[error("storage failure: {0}")]
    Database(#[from] sqlx::Error),
}

/// SQLite row shape for `messages`.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    client_offset: String,
    content: String,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        StoredMessage {
            seq: row.id as Seq,
            client_offset: row.client_offset,
            content: row.content,
        }
    }
}

/// The durable, append-only message log.
///
/// Cheap to clone; clones share the same bounded connection pool. Callers
/// queue on a busy pool rather than receiving an error.
#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Open (creating if missing) the database at `url` and ensure the
    /// schema exists. Schema creation is idempotent and runs on every start.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        // WAL lets backlog reads proceed while appends are in flight;
        // contending writers queue on SQLite's busy handler.
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;

        info!(url, max_connections, "Message store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages ( \
                 id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 client_offset TEXT NOT NULL UNIQUE, \
                 content TEXT NOT NULL \
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append a message if `client_offset` is not already present.
    ///
    /// Returns the assigned sequence number. Safe under concurrent calls
    /// with the same offset: exactly one succeeds, the rest observe
    /// [`StoreError::Duplicate`] and no row is written for them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] for an already-stored offset, or
    /// [`StoreError::Database`] on any other failure.
    pub async fn append(&self, client_offset: &str, content: &str) -> Result<Seq, StoreError> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO messages (client_offset, content) VALUES (?1, ?2) RETURNING id")
                .bind(client_offset)
                .bind(content)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| match &e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
                    _ => StoreError::Database(e),
                })?;

        debug!(seq = id, client_offset, "Message appended");
        Ok(id as Seq)
    }

    /// Read all messages with a sequence number strictly greater than
    /// `after`, in ascending order. `after = 0` reads from the beginning.
    ///
    /// The returned stream is lazy and finite: it scans the state at query
    /// time and is not a live subscription. Calling it again re-reads
    /// current state.
    pub fn read_after(
        &self,
        after: Seq,
    ) -> impl Stream<Item = Result<StoredMessage, StoreError>> + '_ {
        // A cursor past i64::MAX cannot match any row; clamp instead of
        // wrapping into a full-backlog replay.
        let after = i64::try_from(after).unwrap_or(i64::MAX);
        sqlx::query_as::<_, MessageRow>(
            "SELECT id, client_offset, content FROM messages WHERE id > ?1 ORDER BY id",
        )
        .bind(after)
        .fetch(&self.pool)
        .map(|res| res.map(StoredMessage::from).map_err(StoreError::from))
    }
}
