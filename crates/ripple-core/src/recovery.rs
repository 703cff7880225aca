//! Backlog recovery for (re)connecting clients.
//!
//! Replay runs after the handshake and before the connection joins the live
//! set, so a client never observes a live message ordered before its own
//! replay. Replayed messages use the same delivery path and shape as live
//! broadcasts; the client-side cursor logic does not distinguish them.

use crate::message::{Seq, StoredMessage};
use crate::registry::Outbox;
use crate::store::{MessageStore, StoreError};
use futures_util::TryStreamExt;
use std::sync::Arc;
use tracing::debug;

/// Replay every stored message with a sequence number greater than
/// `last_seen` into `outbox`, in ascending order.
///
/// Returns the number of messages replayed. Replay stops early without
/// error if the outbox closes (the client went away mid-replay).
///
/// # Errors
///
/// Returns a [`StoreError`] if the backlog read fails. Callers are expected
/// to log it and let the connection go live with zero replayed messages;
/// a recovery failure is never fatal to the connection.
pub async fn recover(
    store: &MessageStore,
    outbox: &Outbox,
    last_seen: Seq,
) -> Result<u64, StoreError> {
    let mut backlog = std::pin::pin!(store.read_after(last_seen));

    let mut replayed = 0u64;
    while let Some(message) = backlog.try_next().await? {
        if outbox.send(Arc::new(message)).is_err() {
            break;
        }
        replayed += 1;
    }

    debug!(last_seen, replayed, "Backlog replay complete");
    Ok(replayed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_store;
    use tokio::sync::mpsc;

    async fn seeded_store(count: usize) -> (MessageStore, tempfile::TempDir) {
        let (store, dir) = temp_store().await;
        for i in 1..=count {
            store
                .append(&format!("offset-{i}"), &format!("message {i}"))
                .await
                .unwrap();
        }
        (store, dir)
    }

    #[tokio::test]
    async fn test_recover_replays_tail_in_order() {
        let (store, _dir) = seeded_store(3).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let replayed = recover(&store, &tx, 1).await.unwrap();
        assert_eq!(replayed, 2);

        assert_eq!(rx.recv().await.unwrap().seq, 2);
        assert_eq!(rx.recv().await.unwrap().seq, 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recover_from_zero_replays_everything() {
        let (store, _dir) = seeded_store(4).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let replayed = recover(&store, &tx, 0).await.unwrap();
        assert_eq!(replayed, 4);

        for expected in 1..=4 {
            assert_eq!(rx.recv().await.unwrap().seq, expected);
        }
    }

    #[tokio::test]
    async fn test_recover_with_current_cursor_is_empty() {
        let (store, _dir) = seeded_store(2).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(recover(&store, &tx, 2).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recover_stops_when_client_goes_away() {
        let (store, _dir) = seeded_store(3).await;
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        // A closed outbox aborts the replay without error.
        assert_eq!(recover(&store, &tx, 0).await.unwrap(), 0);
    }
}
