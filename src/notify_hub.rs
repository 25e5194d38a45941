// notify_hub.rs - per-collection and per-document change notification.
//
// Enriched from elsewhere in the retrieval pack: saribmah-cocommand's
// `bus.rs` (a thin `tokio::sync::broadcast` wrapper, cheap-clone sender,
// `subscribe`/`publish`) and its filesystem watcher module, whose doc
// comment states the design principle followed here verbatim: the
// watcher's own thread is the sole consumer of raw filesystem events and
// applies them directly to the hub's owned broadcast channel, rather than
// fanning raw fs events out to callers.

use std::path::Path;

use dashmap::DashMap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use crate::document::DocumentSnapshot;
use crate::error::Result;

/// Bounded broadcast capacity. A lagging subscriber misses the oldest
/// buffered events rather than blocking the writer: tokio::sync::broadcast's
/// own drop-oldest-on-lag convention keeps writes off the notification path.
const CHANNEL_CAPACITY: usize = 256;

/// Owns one "something changed" broadcast channel per collection and one
/// `DocumentSnapshot` broadcast channel per document id, plus the
/// filesystem watch that re-publishes collection events for out-of-process
/// writers.
pub struct NotifyHub {
    collection_tx: broadcast::Sender<()>,
    doc_channels: DashMap<String, broadcast::Sender<Option<DocumentSnapshot>>>,
    // Kept alive for the hub's lifetime; dropping it stops the watch.
    _watcher: RecommendedWatcher,
}

impl NotifyHub {
    pub fn new(collection_dir: impl AsRef<Path>) -> Result<Self> {
        let (collection_tx, _initial_rx) = broadcast::channel(CHANNEL_CAPACITY);
        let watch_tx = collection_tx.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if res.is_ok() {
                // Ignore send errors: no subscribers means nothing to notify.
                let _ = watch_tx.send(());
            }
        })?;
        watcher.watch(collection_dir.as_ref(), RecursiveMode::NonRecursive)?;

        Ok(NotifyHub {
            collection_tx,
            doc_channels: DashMap::new(),
            _watcher: watcher,
        })
    }

    pub fn publish_collection_event(&self) {
        let _ = self.collection_tx.send(());
    }

    pub fn subscribe_collection(&self) -> broadcast::Receiver<()> {
        self.collection_tx.subscribe()
    }

    /// Returns the new receiver and whether this call created the channel
    /// (the caller pushes an initial snapshot exactly when `true`, since the
    /// hub itself has no access to the document's current data).
    /// `None` in the channel's payload means the document does not currently
    /// exist (absent or tombstoned), mirroring `get()`'s own return type.
    pub fn subscribe_document(&self, id: &str) -> (bool, broadcast::Receiver<Option<DocumentSnapshot>>) {
        let mut created = false;
        let tx = self
            .doc_channels
            .entry(id.to_string())
            .or_insert_with(|| {
                created = true;
                broadcast::channel(CHANNEL_CAPACITY).0
            });
        let rx = tx.subscribe();
        (created, rx)
    }

    pub fn publish_document(&self, id: &str, snapshot: Option<DocumentSnapshot>) {
        if let Some(tx) = self.doc_channels.get(id) {
            if tx.receiver_count() > 0 {
                let _ = tx.send(snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn collection_event_reaches_subscriber() {
        let dir = TempDir::new().unwrap();
        let hub = NotifyHub::new(dir.path()).unwrap();
        let mut rx = hub.subscribe_collection();
        hub.publish_collection_event();
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn document_event_only_sent_with_subscribers() {
        let dir = TempDir::new().unwrap();
        let hub = NotifyHub::new(dir.path()).unwrap();
        // No subscriber yet: publish must not panic or error.
        hub.publish_document("doc1", Some(DocumentSnapshot::new("doc1", json!({"id": "doc1"}))));

        let (created, mut rx) = hub.subscribe_document("doc1");
        assert!(created);
        hub.publish_document(
            "doc1",
            Some(DocumentSnapshot::new("doc1", json!({"id": "doc1", "v": 2}))),
        );
        let snap = rx.recv().await.unwrap().unwrap();
        assert_eq!(snap.data["v"], 2);
    }

    #[tokio::test]
    async fn second_subscribe_reports_not_created() {
        let dir = TempDir::new().unwrap();
        let hub = NotifyHub::new(dir.path()).unwrap();
        let (first, _rx1) = hub.subscribe_document("doc1");
        let (second, _rx2) = hub.subscribe_document("doc1");
        assert!(first);
        assert!(!second);
    }
}
