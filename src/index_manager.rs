// index_manager.rs - per-collection registry of index definitions plus a
// lazily loaded, durably persisted cache of SecondaryIndex instances.
//
// Grounded on the legacy index registry struct and the collection
// constructor's pattern of auto-creating an index and loading persisted
// index metadata. Uses dashmap for the name->cache map, the same way it is
// reached for elsewhere in this codebase for this shape of registry, plus
// tokio::task::spawn_blocking for the dedicated rebuild worker the async
// façade needs (the synchronous core underneath has no runtime of its own).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{canonical, join_composite, KeyType};
use crate::error::Result;
use crate::log_warn;
use crate::record_log::RecordLog;
use crate::secondary_index::SecondaryIndex;

/// Declares which fields a secondary or composite index covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub fields: Vec<String>,
    pub key_types: Vec<KeyType>,
    pub ordered: bool,
}

impl IndexMeta {
    pub fn single(field: impl Into<String>, key_type: KeyType, ordered: bool) -> Self {
        IndexMeta {
            fields: vec![field.into()],
            key_types: vec![key_type],
            ordered,
        }
    }

    pub fn composite(fields: Vec<(String, KeyType)>, ordered: bool) -> Self {
        let (fields, key_types): (Vec<_>, Vec<_>) = fields.into_iter().unzip();
        IndexMeta {
            fields,
            key_types,
            ordered,
        }
    }

    /// Fields joined by `"__"`.
    pub fn name(&self) -> String {
        self.fields.join("__")
    }

    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }

    /// `secondary_<field>.idx.json` for a single field, else
    /// `composite_<f1>__<f2>...idx.json`.
    pub fn filename(&self) -> String {
        if self.is_composite() {
            format!("composite_{}.idx.json", self.fields.join("__"))
        } else {
            format!("secondary_{}.idx.json", self.fields[0])
        }
    }

    /// `Some(key)` only if every field of this meta is present in `doc`;
    /// `None` otherwise. Governs the unlink side of a composite posting: a
    /// prior value missing any field of the composite never had a posting
    /// to begin with, so there is nothing to remove.
    fn canonical_key_if_all_present(&self, doc: &HashMap<String, Value>) -> Result<Option<String>> {
        if !self.fields.iter().all(|f| doc.contains_key(f)) {
            return Ok(None);
        }
        let mut components = Vec::with_capacity(self.fields.len());
        for (field, key_type) in self.fields.iter().zip(&self.key_types) {
            components.push(canonical(&doc[field], *key_type)?);
        }
        Ok(Some(join_composite(&components)))
    }

    /// Composite key for the add side of a posting: every field present is
    /// canonicalized, and any field missing from `doc` contributes an empty
    /// string component instead, so a document is always linked under its
    /// composite index once that index is loaded, never silently dropped.
    fn canonical_key_substituting_missing(&self, doc: &HashMap<String, Value>) -> Result<String> {
        let mut components = Vec::with_capacity(self.fields.len());
        for (field, key_type) in self.fields.iter().zip(&self.key_types) {
            let component = match doc.get(field) {
                Some(v) => canonical(v, *key_type)?,
                None => String::new(),
            };
            components.push(component);
        }
        Ok(join_composite(&components))
    }
}

/// Per-collection registry of named `IndexMeta` plus a lazily loaded,
/// concurrently accessible cache of the corresponding `SecondaryIndex`.
pub struct IndexManager {
    dir: PathBuf,
    registry: DashMap<String, IndexMeta>,
    loaded: DashMap<String, SecondaryIndex>,
}

impl IndexManager {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        IndexManager {
            dir: dir.as_ref().to_path_buf(),
            registry: DashMap::new(),
            loaded: DashMap::new(),
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    pub fn meta(&self, name: &str) -> Option<IndexMeta> {
        self.registry.get(name).map(|r| r.clone())
    }

    /// Every registered index definition, whether or not its cache is
    /// currently materialized in `loaded`. Callers that need a usable
    /// posting list must still check `is_loaded` or go through `ensure_index`.
    pub fn registered_metas(&self) -> Vec<IndexMeta> {
        self.registry.iter().map(|r| r.value().clone()).collect()
    }

    fn path_for(&self, meta: &IndexMeta) -> PathBuf {
        self.dir.join(meta.filename())
    }

    fn persist(&self, meta: &IndexMeta, index: &SecondaryIndex) -> Result<()> {
        let path = self.path_for(meta);
        let tmp_path = path.with_extension("idx.json.tmp");
        std::fs::write(&tmp_path, index.to_bytes()?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn rebuild(meta: &IndexMeta, live_docs: &[Value]) -> Result<SecondaryIndex> {
        let mut index = SecondaryIndex::new();
        for doc in live_docs {
            let Some(id) = doc.get("id").and_then(Value::as_str) else {
                continue;
            };
            if meta.is_composite() {
                let mut components = Vec::with_capacity(meta.fields.len());
                for (field, key_type) in meta.fields.iter().zip(&meta.key_types) {
                    let component = match doc.get(field) {
                        Some(v) => canonical(v, *key_type)?,
                        None => String::new(),
                    };
                    components.push(component);
                }
                index.add(&join_composite(&components), id);
            } else if let Some(value) = doc.get(&meta.fields[0]) {
                let key = canonical(value, meta.key_types[0])?;
                index.add(&key, id);
            }
        }
        Ok(index)
    }

    /// Register `meta` and, unless already loaded, load it from disk
    /// (rebuilding on parse failure) or build it fresh from `log`'s live
    /// documents. When `use_worker` is true the rebuild runs on a dedicated
    /// blocking-pool thread so a large collection's initial build never
    /// stalls the caller's task.
    pub async fn ensure_index(
        &self,
        meta: IndexMeta,
        log: &RecordLog,
        use_worker: bool,
    ) -> Result<()> {
        let name = meta.name();
        self.registry.insert(name.clone(), meta.clone());
        if self.loaded.contains_key(&name) {
            return Ok(());
        }

        let path = self.path_for(&meta);
        if path.exists() {
            match std::fs::read(&path).map_err(Into::into).and_then(|b| SecondaryIndex::from_bytes(&b)) {
                Ok(index) => {
                    self.loaded.insert(name, index);
                    return Ok(());
                }
                Err(e) => log_warn!("index file {:?} failed to parse, rebuilding: {e}", path),
            }
        }

        let live_docs = log.read_all_live();
        let index = if use_worker {
            let meta_for_worker = meta.clone();
            tokio::task::spawn_blocking(move || Self::rebuild(&meta_for_worker, &live_docs))
                .await
                .map_err(|e| crate::error::StoreError::IndexError(e.to_string()))??
        } else {
            Self::rebuild(&meta, &live_docs)?
        };

        self.persist(&meta, &index)?;
        self.loaded.insert(name, index);
        Ok(())
    }

    /// Build (and durably register) a single-field index on demand, used by
    /// the planner's equality-intersection strategy. The on-demand build
    /// converges on the same durable path as `ensure_index`.
    pub async fn ensure_single_field_on_demand(
        &self,
        field: &str,
        log: &RecordLog,
    ) -> Result<()> {
        if self.registry.contains_key(field) {
            return self.ensure_index(self.registry.get(field).unwrap().clone(), log, true).await;
        }
        self.ensure_index(IndexMeta::single(field, KeyType::Auto, false), log, true)
            .await
    }

    /// Apply an id's old/new field values to every currently loaded index.
    /// `new_fields = None` models a delete: the unlink step runs, nothing
    /// is added.
    pub fn apply_index_changes_on_update(
        &self,
        id: &str,
        prev: Option<&HashMap<String, Value>>,
        new_fields: Option<&HashMap<String, Value>>,
    ) -> Result<()> {
        for entry in self.registry.iter() {
            let name = entry.key().clone();
            let meta = entry.value().clone();
            let Some(mut index) = self.loaded.get_mut(&name) else {
                continue;
            };

            if meta.is_composite() {
                if let Some(prev_map) = prev {
                    if let Some(old_key) = meta.canonical_key_if_all_present(prev_map)? {
                        index.remove(&old_key, id);
                    }
                }
                if let Some(new_map) = new_fields {
                    let new_key = meta.canonical_key_substituting_missing(new_map)?;
                    index.add(&new_key, id);
                }
            } else {
                let field = &meta.fields[0];
                let key_type = meta.key_types[0];
                if let Some(prev_map) = prev {
                    if let Some(v) = prev_map.get(field) {
                        index.remove(&canonical(v, key_type)?, id);
                    }
                }
                if let Some(new_map) = new_fields {
                    if let Some(v) = new_map.get(field) {
                        index.add(&canonical(v, key_type)?, id);
                    }
                }
            }

            self.persist(&meta, &index)?;
        }
        Ok(())
    }

    pub fn get_exact(&self, name: &str, key: &str) -> Vec<String> {
        self.loaded.get(name).map(|i| i.get_exact(key)).unwrap_or_default()
    }

    pub fn get_range(
        &self,
        name: &str,
        start: Option<&str>,
        end: Option<&str>,
        start_inclusive: bool,
        end_inclusive: bool,
        limit: usize,
    ) -> Vec<String> {
        self.loaded
            .get(name)
            .map(|i| i.get_range(start, end, start_inclusive, end_inclusive, limit))
            .unwrap_or_default()
    }

    pub fn cardinality(&self, name: &str, key: &str) -> usize {
        self.loaded.get(name).map(|i| i.cardinality(key)).unwrap_or(0)
    }
}
