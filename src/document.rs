// document.rs - the document/query result types handed back across the
// façade boundary (DocumentSnapshot, QuerySnapshot).
//
// Ids are always plain Firestore-style strings (see id_gen.rs), so there is
// no tagged id type here; a document is just a flat `{id, data}` snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single document as observed at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Value,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        DocumentSnapshot {
            id: id.into(),
            data,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// The materialized result of a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub docs: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    pub fn new(docs: Vec<DocumentSnapshot>) -> Self {
        QuerySnapshot { docs }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocumentSnapshot> {
        self.docs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_snapshot_exposes_field() {
        let snap = DocumentSnapshot::new("a1", json!({"id": "a1", "name": "Ada"}));
        assert_eq!(snap.field("name"), Some(&json!("Ada")));
        assert_eq!(snap.field("missing"), None);
    }

    #[test]
    fn query_snapshot_reports_len() {
        let snap = QuerySnapshot::new(vec![
            DocumentSnapshot::new("a", json!({"id": "a"})),
            DocumentSnapshot::new("b", json!({"id": "b"})),
        ]);
        assert_eq!(snap.len(), 2);
        assert!(!snap.is_empty());
    }
}
