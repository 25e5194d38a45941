// record_log.rs - append-only per-collection record log and primary offset index.
//
// Grounded on wal/writer.rs's append-at-EOF-then-return-offset shape and
// storage/file_storage.rs's tombstone-skip-on-scan convention, adapted from a
// transactional WAL to a plain append-only document log with a JSON (not
// paged-binary) primary index, persisted write-tmp-then-rename exactly as
// index.rs persists its artifacts.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::log_warn;

pub const LOG_FILE: &str = "data.ndjson";
pub const PRIMARY_INDEX_FILE: &str = "primary.idx.json";

/// One entry per document id, tracking where its latest record lives in the
/// log and the values that were indexed at that write.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PrimaryEntry {
    pub offset: u64,
    pub length: u64,
    pub version: u64,
    pub tombstone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<HashMap<String, Value>>,
}

impl PrimaryEntry {
    pub fn is_live(&self) -> bool {
        !self.tombstone
    }
}

/// The append-only record log and its in-memory primary offset index for one
/// collection directory.
pub struct RecordLog {
    dir: PathBuf,
    primary: HashMap<String, PrimaryEntry>,
    next_version: u64,
}

impl RecordLog {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let log_path = dir.join(LOG_FILE);
        if !log_path.exists() {
            OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)?;
        }

        let primary = match Self::load_primary_index(&dir) {
            Ok(map) => map,
            Err(e) => {
                log_warn!("primary index at {:?} failed to load, starting empty: {e}", dir);
                HashMap::new()
            }
        };

        let next_version = primary.values().map(|e| e.version).max().map_or(0, |v| v + 1);

        Ok(RecordLog {
            dir,
            primary,
            next_version,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn primary_index_path(&self) -> PathBuf {
        self.dir.join(PRIMARY_INDEX_FILE)
    }

    fn load_primary_index(dir: &Path) -> Result<HashMap<String, PrimaryEntry>> {
        let path = dir.join(PRIMARY_INDEX_FILE);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let data = fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn flush_primary_index(&self) -> Result<()> {
        let tmp_path = self.dir.join(format!("{PRIMARY_INDEX_FILE}.tmp"));
        let data = serde_json::to_vec(&self.primary)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, self.primary_index_path())?;
        Ok(())
    }

    /// Append `obj` to the log and update its primary entry. `prev` carries
    /// the field values that were indexed at the previous write, if any,
    /// forwarded unchanged so the Index Manager can unlink old postings
    /// without re-reading the old record.
    pub fn append_record(
        &mut self,
        obj: &Value,
        prev: Option<HashMap<String, Value>>,
    ) -> Result<(String, PrimaryEntry)> {
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::InvalidQuery("record is missing a string `id` field".into()))?
            .to_string();

        let mut line = serde_json::to_vec(obj)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().append(true).open(self.log_path())?;
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&line)?;

        let tombstone = obj.get("_deleted").and_then(Value::as_bool).unwrap_or(false);
        let version = self.next_version;
        self.next_version += 1;

        let entry = PrimaryEntry {
            offset,
            length: line.len() as u64,
            version,
            tombstone,
            prev,
        };

        self.primary.insert(id.clone(), entry.clone());
        self.flush_primary_index()?;
        Ok((id, entry))
    }

    pub fn entry(&self, id: &str) -> Option<&PrimaryEntry> {
        self.primary.get(id)
    }

    pub fn exists_live(&self, id: &str) -> bool {
        self.primary.get(id).is_some_and(PrimaryEntry::is_live)
    }

    fn read_at(&self, offset: u64, length: u64) -> Result<Value> {
        let mut file = File::open(self.log_path())?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    /// Returns `None` for an absent or tombstoned id, or if the stored bytes
    /// fail to parse as JSON.
    pub fn get_by_id(&self, id: &str) -> Option<Value> {
        let entry = self.primary.get(id)?;
        if entry.tombstone {
            return None;
        }
        self.read_at(entry.offset, entry.length).ok()
    }

    /// Enumerate all live documents, in arbitrary id order.
    pub fn read_all_live(&self) -> Vec<Value> {
        self.primary
            .iter()
            .filter(|(_, e)| e.is_live())
            .filter_map(|(id, _)| self.get_by_id(id))
            .collect()
    }

    /// Stream the log line-by-line and rebuild the primary index from
    /// scratch, later lines for the same id winning. A line that fails to
    /// parse still advances the offset but is otherwise skipped.
    /// `prevIndexedValues` cannot be recovered by a rebuild from the raw log
    /// alone (it is bookkeeping about index state, not log content), so
    /// rebuilt entries carry `prev = None`; the next write re-establishes it.
    pub fn rebuild_primary_index(&mut self) -> Result<()> {
        let file = File::open(self.log_path())?;
        let mut reader = BufReader::new(file);
        let mut rebuilt: HashMap<String, PrimaryEntry> = HashMap::new();
        let mut offset: u64 = 0;
        let mut max_version: u64 = 0;

        loop {
            let mut line = Vec::new();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            let line_start = offset;
            offset += n as u64;

            if !line.ends_with(b"\n") {
                // Partial trailing line from a crash mid-append; ignore it.
                break;
            }

            match serde_json::from_slice::<Value>(&line) {
                Ok(obj) => {
                    let Some(id) = obj.get("id").and_then(Value::as_str) else {
                        continue;
                    };
                    let tombstone = obj.get("_deleted").and_then(Value::as_bool).unwrap_or(false);
                    let prior = self.primary.get(id).cloned();
                    let version = prior.as_ref().map_or(max_version, |e| e.version);
                    max_version = max_version.max(version);
                    rebuilt.insert(
                        id.to_string(),
                        PrimaryEntry {
                            offset: line_start,
                            length: n as u64,
                            version,
                            tombstone,
                            prev: prior.and_then(|e| e.prev),
                        },
                    );
                }
                Err(_) => continue,
            }
        }

        self.primary = rebuilt;
        self.next_version = self.primary.values().map(|e| e.version).max().map_or(0, |v| v + 1);
        self.flush_primary_index()
    }
}
