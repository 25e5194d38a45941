// store.rs - the public façade: Store, CollectionRef, DocumentRef.
//
// Grounded on the legacy DatabaseCore composition (owned Arc/RwLock handles
// to storage, no back-reference) and the legacy CollectionCore struct
// shape, adapted to replace a Façade<->subsystem cyclic reference with
// plain composition: CollectionRef/DocumentRef hold an owned Arc into
// shared per-collection state and never reference back into Store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};

use crate::document::{DocumentSnapshot, QuerySnapshot};
use crate::error::{Result, StoreError};
use crate::id_gen::generate_id;
use crate::index_manager::{IndexManager, IndexMeta};
use crate::notify_hub::NotifyHub;
use crate::planner;
use crate::query::QueryDescriptor;
use crate::record_log::RecordLog;

struct CollectionState {
    log: RwLock<RecordLog>,
    indexes: IndexManager,
    hub: NotifyHub,
}

/// Shallow overlay of `overlay`'s top-level fields onto `base`, used by
/// `set(merge=true)`/`update`. Fields absent from `overlay` are left
/// untouched in `base`; this is not a recursive deep merge.
fn merge_fields(base: &mut Value, overlay: &Value) {
    if let (Value::Object(base_map), Value::Object(overlay_map)) = (base, overlay) {
        for (key, value) in overlay_map {
            base_map.insert(key.clone(), value.clone());
        }
    }
}

/// Collect the values of every field referenced by a registered index
/// (single or composite) that are present in `obj`. Stored as the next
/// write's previously-indexed values, consumed on the following write as
/// `prev` by `IndexManager::apply_index_changes_on_update`: the unlink side
/// only removes a composite posting when every field of that composite is
/// present here, so recording a field only when it's actually in `obj` is
/// exactly what the "hadPrev" rule needs.
fn gather_indexed_fields(indexes: &IndexManager, obj: &Value) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    for meta in indexes.registered_metas() {
        for field in &meta.fields {
            if let Some(value) = obj.get(field) {
                out.entry(field.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    out
}

/// The root handle for a document store rooted at one filesystem directory.
pub struct Store {
    root: PathBuf,
    collections: DashMap<String, Arc<CollectionState>>,
}

impl Store {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Store {
            root,
            collections: DashMap::new(),
        })
    }

    fn state_for(&self, name: &str) -> Result<Arc<CollectionState>> {
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let dir = self.root.join(name);
                let log = RecordLog::open(&dir)?;
                let indexes = IndexManager::new(&dir);
                let hub = NotifyHub::new(&dir)?;
                let state = Arc::new(CollectionState {
                    log: RwLock::new(log),
                    indexes,
                    hub,
                });
                e.insert(state.clone());
                Ok(state)
            }
        }
    }

    pub fn collection(&self, name: &str) -> Result<CollectionRef> {
        let state = self.state_for(name)?;
        Ok(CollectionRef {
            name: name.to_string(),
            state,
        })
    }

    /// Registers and builds (or loads) an index definition for a collection.
    pub async fn ensure_index(&self, collection: &str, meta: IndexMeta) -> Result<()> {
        let state = self.state_for(collection)?;
        let log = state.log.read().await;
        state.indexes.ensure_index(meta, &log, true).await
    }
}

#[derive(Clone)]
pub struct CollectionRef {
    name: String,
    state: Arc<CollectionState>,
}

impl CollectionRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `collection.doc(id?)`: a fresh random id when `id` is `None`.
    pub fn doc(&self, id: Option<&str>) -> DocumentRef {
        let id = id.map(str::to_string).unwrap_or_else(generate_id);
        DocumentRef {
            id,
            state: self.state.clone(),
        }
    }

    /// `collection.add(obj) -> id`: always a fresh id, full replacement write.
    pub async fn add(&self, data: Value) -> Result<String> {
        let doc_ref = self.doc(None);
        doc_ref.set(data, false).await?;
        Ok(doc_ref.id)
    }

    pub async fn get(&self, qd: Option<&QueryDescriptor>) -> Result<QuerySnapshot> {
        let empty = QueryDescriptor::new();
        let qd = qd.unwrap_or(&empty);
        let log = self.state.log.read().await;
        let docs = planner::execute(qd, &self.state.indexes, &log).await?;
        Ok(QuerySnapshot::new(docs))
    }

    /// `collection.snapshots(qd?)`: run the query once, then re-run on every
    /// collection event, delivering each result to the subscriber. A
    /// re-run that fails (e.g. a transient I/O error) is logged and
    /// skipped rather than delivered, so the channel only ever carries a
    /// `QuerySnapshot`, never a `Result`: writers and re-runs never fail
    /// the subscription itself. Cancellation is unsubscription: dropping
    /// the returned receiver stops delivery and (once no other subscriber
    /// is attached) the spawned task exits on its next send failure.
    pub async fn snapshots(&self, qd: Option<QueryDescriptor>) -> Result<broadcast::Receiver<QuerySnapshot>> {
        let qd = qd.unwrap_or_default();
        let (tx, rx) = broadcast::channel(32);
        let initial = self.get(Some(&qd)).await?;
        let _ = tx.send(initial);

        let state = self.state.clone();
        let mut collection_rx = state.hub.subscribe_collection();
        let task_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match collection_rx.recv().await {
                    Ok(()) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                let log = state.log.read().await;
                let result = planner::execute(&qd, &state.indexes, &log).await;
                drop(log);
                let snapshot = match result {
                    Ok(docs) => QuerySnapshot::new(docs),
                    Err(e) => {
                        crate::log_warn!("snapshot re-run failed, skipping: {e}");
                        continue;
                    }
                };
                if task_tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

pub struct DocumentRef {
    id: String,
    state: Arc<CollectionState>,
}

impl DocumentRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn get(&self) -> Result<Option<DocumentSnapshot>> {
        let log = self.state.log.read().await;
        Ok(log.get_by_id(&self.id).map(|data| DocumentSnapshot::new(self.id.clone(), data)))
    }

    /// `doc.set(data, merge?)`: a full replacement when `merge` is false, or
    /// a read-overlay-append when `merge` is true.
    pub async fn set(&self, data: Value, merge: bool) -> Result<()> {
        let mut log = self.state.log.write().await;
        let prior_entry = log.entry(&self.id).cloned();

        let mut obj = if merge {
            let mut base = log.get_by_id(&self.id).unwrap_or_else(|| json!({}));
            merge_fields(&mut base, &data);
            base
        } else {
            data
        };
        if let Value::Object(map) = &mut obj {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }

        let curr_indexed = gather_indexed_fields(&self.state.indexes, &obj);
        log.append_record(&obj, Some(curr_indexed.clone()))?;
        drop(log);

        let prior_indexed = prior_entry.and_then(|e| e.prev);
        self.state
            .indexes
            .apply_index_changes_on_update(&self.id, prior_indexed.as_ref(), Some(&curr_indexed))?;

        let snapshot = DocumentSnapshot::new(self.id.clone(), obj);
        self.state.hub.publish_document(&self.id, Some(snapshot));
        self.state.hub.publish_collection_event();
        Ok(())
    }

    /// `doc.update(data)`: errors if the document does not currently exist
    /// with a not-found error; otherwise behaves like `set(merge=true)`.
    pub async fn update(&self, data: Value) -> Result<()> {
        {
            let log = self.state.log.read().await;
            if !log.exists_live(&self.id) {
                return Err(StoreError::DocumentNotFound(self.id.clone()));
            }
        }
        self.set(data, true).await
    }

    /// `doc.delete()`: a no-op if the document is already absent/tombstoned;
    /// otherwise appends a tombstone record.
    pub async fn delete(&self) -> Result<()> {
        let mut log = self.state.log.write().await;
        if !log.exists_live(&self.id) {
            return Ok(());
        }
        let prior_entry = log.entry(&self.id).cloned();
        let tombstone = json!({"id": self.id, "_deleted": true});
        log.append_record(&tombstone, None)?;
        drop(log);

        let prior_indexed = prior_entry.and_then(|e| e.prev);
        self.state
            .indexes
            .apply_index_changes_on_update(&self.id, prior_indexed.as_ref(), None)?;

        self.state.hub.publish_document(&self.id, None);
        self.state.hub.publish_collection_event();
        Ok(())
    }

    /// `doc.snapshots()`: an initial snapshot is delivered to the first
    /// subscriber for this id, then one update per subsequent write.
    pub async fn snapshots(&self) -> broadcast::Receiver<Option<DocumentSnapshot>> {
        let (created, rx) = self.state.hub.subscribe_document(&self.id);
        if created {
            let current = self.get().await.unwrap_or(None);
            self.state.hub.publish_document(&self.id, current);
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::KeyType;
    use crate::query::{Op, WhereClause};
    use tempfile::TempDir;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();

        let id = people.add(json!({"name": "Ada", "age": 30})).await.unwrap();
        let doc = people.doc(Some(&id)).get().await.unwrap().unwrap();
        assert_eq!(doc.data["name"], "Ada");
        assert_eq!(doc.data["age"], 30);
        assert_eq!(doc.id, id);
    }

    #[tokio::test]
    async fn merge_set_preserves_untouched_fields() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();

        let doc_ref = people.doc(Some("y1"));
        doc_ref.set(json!({"name": "Bob", "age": 20}), false).await.unwrap();
        doc_ref.set(json!({"age": 21}), true).await.unwrap();

        let doc = doc_ref.get().await.unwrap().unwrap();
        assert_eq!(doc.data["name"], "Bob");
        assert_eq!(doc.data["age"], 21);
        assert_eq!(doc.data["id"], "y1");
    }

    #[tokio::test]
    async fn update_on_missing_document_errors() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();

        let err = people.doc(Some("ghost")).update(json!({"age": 1})).await.unwrap_err();
        assert!(matches!(err, StoreError::DocumentNotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_get_returns_none_then_set_resurrects() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();

        let doc_ref = people.doc(Some("z1"));
        doc_ref.set(json!({"name": "gone"}), false).await.unwrap();
        doc_ref.delete().await.unwrap();
        assert!(doc_ref.get().await.unwrap().is_none());

        doc_ref.set(json!({"name": "back"}), false).await.unwrap();
        let doc = doc_ref.get().await.unwrap().unwrap();
        assert_eq!(doc.data["name"], "back");
    }

    #[tokio::test]
    async fn delete_on_absent_document_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();
        people.doc(Some("absent")).delete().await.unwrap();
    }

    #[tokio::test]
    async fn ensure_index_then_query_uses_index() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();

        people.add(json!({"age": 10})).await.unwrap();
        people.add(json!({"age": 20})).await.unwrap();
        people.add(json!({"age": 30})).await.unwrap();

        store
            .ensure_index("people", IndexMeta::single("age", KeyType::Num, true))
            .await
            .unwrap();

        let qd = QueryDescriptor::new().with_where(WhereClause::cmp("age", Op::Gte, json!(15)));
        let snapshot = people.get(Some(&qd)).await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn document_snapshots_deliver_initial_and_subsequent_updates() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();
        let doc_ref = people.doc(Some("a1"));
        doc_ref.set(json!({"name": "Ada"}), false).await.unwrap();

        let mut rx = doc_ref.snapshots().await;
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.data["name"], "Ada");

        doc_ref.set(json!({"name": "Ada2"}), true).await.unwrap();
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.data["name"], "Ada2");
    }

    #[tokio::test]
    async fn collection_snapshots_rerun_on_write() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let people = store.collection("people").unwrap();
        people.add(json!({"name": "Ada"})).await.unwrap();

        let mut rx = people.snapshots(None).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        people.add(json!({"name": "Bob"})).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.len(), 2);
    }
}
