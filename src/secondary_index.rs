// secondary_index.rs - in-memory ordered key -> posting list structure.
//
// Grounded on the legacy B+Tree ordering discipline (canonical.rs
// carries that forward into a pure string encoding) but replaces the page
// layout with a flat `{keys, postings}` shape; the partition_point binary
// search below plays the same role as a B+Tree leaf scan without the
// paging machinery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_RANGE_LIMIT: usize = 1000;

/// `{keys: [...], postings: {key: [id, ...], ...}}` exactly as serialized to
/// disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecondaryIndex {
    keys: Vec<String>,
    postings: HashMap<String, Vec<String>>,
}

impl SecondaryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn len_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn cardinality(&self, key: &str) -> usize {
        self.postings.get(key).map_or(0, Vec::len)
    }

    /// Insert `key` at its lexicographic position if new, and append `id` to
    /// its posting list if not already present.
    pub fn add(&mut self, key: &str, id: &str) {
        if !self.postings.contains_key(key) {
            let idx = self.keys.partition_point(|k| k.as_str() < key);
            self.keys.insert(idx, key.to_string());
            self.postings.insert(key.to_string(), Vec::new());
        }
        let postings = self.postings.get_mut(key).expect("just inserted above");
        if !postings.iter().any(|existing| existing == id) {
            postings.push(id.to_string());
        }
    }

    /// Drop `id` from `key`'s posting list; if the list becomes empty, the
    /// key itself is removed.
    pub fn remove(&mut self, key: &str, id: &str) {
        let Some(postings) = self.postings.get_mut(key) else {
            return;
        };
        postings.retain(|existing| existing != id);
        if postings.is_empty() {
            self.postings.remove(key);
            if let Ok(idx) = self.keys.binary_search_by(|k| k.as_str().cmp(key)) {
                self.keys.remove(idx);
            }
        }
    }

    pub fn get_exact(&self, key: &str) -> Vec<String> {
        self.postings.get(key).cloned().unwrap_or_default()
    }

    /// Concatenate posting lists for keys within `[start, end]` (bounds
    /// optionally exclusive, optionally open-ended), in key order, truncated
    /// to `limit`.
    pub fn get_range(
        &self,
        start: Option<&str>,
        end: Option<&str>,
        start_inclusive: bool,
        end_inclusive: bool,
        limit: usize,
    ) -> Vec<String> {
        let lo = match start {
            Some(s) if start_inclusive => self.keys.partition_point(|k| k.as_str() < s),
            Some(s) => self.keys.partition_point(|k| k.as_str() <= s),
            None => 0,
        };
        let hi = match end {
            Some(e) if end_inclusive => self.keys.partition_point(|k| k.as_str() <= e),
            Some(e) => self.keys.partition_point(|k| k.as_str() < e),
            None => self.keys.len(),
        };
        if lo >= hi {
            return Vec::new();
        }

        let mut out = Vec::new();
        for key in &self.keys[lo..hi] {
            if let Some(postings) = self.postings.get(key) {
                for id in postings {
                    out.push(id.clone());
                    if out.len() >= limit {
                        return out;
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_orders_keys_lexicographically() {
        let mut idx = SecondaryIndex::new();
        idx.add("b", "1");
        idx.add("a", "2");
        idx.add("c", "3");
        assert_eq!(idx.get_exact("a"), vec!["2"]);
        assert_eq!(idx.get_range(None, None, true, true, 100), vec!["2", "1", "3"]);
    }

    #[test]
    fn add_is_idempotent_per_key_per_id() {
        let mut idx = SecondaryIndex::new();
        idx.add("a", "1");
        idx.add("a", "1");
        assert_eq!(idx.get_exact("a"), vec!["1"]);
    }

    #[test]
    fn remove_drops_empty_key() {
        let mut idx = SecondaryIndex::new();
        idx.add("a", "1");
        idx.remove("a", "1");
        assert!(idx.get_exact("a").is_empty());
        assert_eq!(idx.len_keys(), 0);
    }

    #[test]
    fn range_scan_respects_inclusive_bounds() {
        let mut idx = SecondaryIndex::new();
        for (k, id) in [("10", "a"), ("20", "b"), ("30", "c"), ("40", "d")] {
            idx.add(k, id);
        }
        assert_eq!(
            idx.get_range(Some("20"), Some("30"), true, true, 100),
            vec!["b", "c"]
        );
        assert_eq!(
            idx.get_range(Some("20"), Some("30"), false, true, 100),
            vec!["c"]
        );
        assert_eq!(
            idx.get_range(Some("20"), Some("30"), true, false, 100),
            vec!["b"]
        );
    }

    #[test]
    fn range_scan_truncates_to_limit() {
        let mut idx = SecondaryIndex::new();
        for i in 0..10 {
            idx.add(&format!("{i:02}"), &format!("id{i}"));
        }
        assert_eq!(idx.get_range(None, None, true, true, 3).len(), 3);
    }

    #[test]
    fn posting_lists_preserve_insertion_order_within_a_key() {
        let mut idx = SecondaryIndex::new();
        idx.add("k", "z");
        idx.add("k", "a");
        idx.add("k", "m");
        assert_eq!(idx.get_exact("k"), vec!["z", "a", "m"]);
    }

    #[test]
    fn serialization_round_trips() {
        let mut idx = SecondaryIndex::new();
        idx.add("a", "1");
        idx.add("b", "2");
        let bytes = idx.to_bytes().unwrap();
        let restored = SecondaryIndex::from_bytes(&bytes).unwrap();
        assert_eq!(restored.get_exact("a"), vec!["1"]);
        assert_eq!(restored.get_exact("b"), vec!["2"]);
    }
}
