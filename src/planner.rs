// planner.rs - selects and executes an index strategy for a QueryDescriptor.
//
// Grounded on the legacy apply_sort/apply_limit_skip/compare_values helpers
// for the full-scan in-memory sort+limit tier, and on the legacy ordered
// B+Tree traversal for the indexed tiers (via secondary_index.rs's range scan).

use std::collections::{HashMap, HashSet};

use crate::canonical::{canonical, join_composite, UPPER_SENTINEL};
use crate::document::DocumentSnapshot;
use crate::error::Result;
use crate::index_manager::{IndexManager, IndexMeta};
use crate::query::{Op, QueryDescriptor, WhereClause};
use crate::record_log::RecordLog;
use crate::secondary_index::DEFAULT_RANGE_LIMIT;
use crate::value_utils::compare_values_with_none;

/// Plan and execute `qd` against `log`, using `indexes` to pick the cheapest
/// eligible strategy: composite full match, single-field ordered index,
/// equality intersection, then full scan.
pub async fn execute(
    qd: &QueryDescriptor,
    indexes: &IndexManager,
    log: &RecordLog,
) -> Result<Vec<DocumentSnapshot>> {
    let clauses_by_field: HashMap<&str, &WhereClause> =
        qd.wheres.iter().map(|c| (c.field.as_str(), c)).collect();

    if let Some(result) = try_composite(qd, &clauses_by_field, indexes, log)? {
        return Ok(result);
    }
    if let Some(result) = try_single_field_ordered(qd, &clauses_by_field, indexes, log).await? {
        return Ok(result);
    }
    if let Some(result) = try_equality_intersection(qd, indexes, log).await? {
        return Ok(result);
    }
    Ok(full_scan(qd, log))
}

fn materialize_filtered(log: &RecordLog, ids: Vec<String>, qd: &QueryDescriptor) -> Vec<DocumentSnapshot> {
    ids.into_iter()
        .filter_map(|id| log.get_by_id(&id).map(|data| (id, data)))
        .filter(|(_, data)| qd.matches(data))
        .map(|(id, data)| DocumentSnapshot::new(id, data))
        .collect()
}

/// Step 1: any *already loaded* composite index whose fields are all
/// covered by where-clauses. A composite that is registered but not yet
/// loaded is skipped here rather than matched against an empty posting
/// list, so the query falls through to the next planning tier instead of
/// wrongly reporting zero results.
fn try_composite(
    qd: &QueryDescriptor,
    clauses_by_field: &HashMap<&str, &WhereClause>,
    indexes: &IndexManager,
    log: &RecordLog,
) -> Result<Option<Vec<DocumentSnapshot>>> {
    for meta in indexes.registered_metas() {
        if !meta.is_composite() {
            continue;
        }
        if !indexes.is_loaded(&meta.name()) {
            continue;
        }
        if !meta.fields.iter().all(|f| clauses_by_field.contains_key(f.as_str())) {
            continue;
        }

        let mut start_components = Vec::with_capacity(meta.fields.len());
        let mut end_components = Vec::with_capacity(meta.fields.len());
        for (field, key_type) in meta.fields.iter().zip(&meta.key_types) {
            let clause = clauses_by_field[field.as_str()];
            let start = match clause.op {
                Op::Eq | Op::Gte | Op::Range => canonical(&clause.value, *key_type)?,
                _ => String::new(),
            };
            let end = match clause.op {
                Op::Eq | Op::Lte => canonical(&clause.value, *key_type)?,
                _ => match &clause.end_value {
                    Some(v) => canonical(v, *key_type)?,
                    None => UPPER_SENTINEL.to_string(),
                },
            };
            start_components.push(start);
            end_components.push(end);
        }

        let start_key = join_composite(&start_components);
        let end_key = join_composite(&end_components);
        let limit = qd.limit.unwrap_or(DEFAULT_RANGE_LIMIT);
        let ids = indexes.get_range(&meta.name(), Some(&start_key), Some(&end_key), true, true, limit);
        return Ok(Some(materialize_filtered(log, ids, qd)));
    }
    Ok(None)
}

/// Step 2: a registered, ordered single-field index matching `order_by`.
async fn try_single_field_ordered(
    qd: &QueryDescriptor,
    clauses_by_field: &HashMap<&str, &WhereClause>,
    indexes: &IndexManager,
    log: &RecordLog,
) -> Result<Option<Vec<DocumentSnapshot>>> {
    let Some(order_by) = &qd.order_by else {
        return Ok(None);
    };
    let Some(meta) = indexes.meta(&order_by.field) else {
        return Ok(None);
    };
    if meta.is_composite() || !meta.ordered {
        return Ok(None);
    }

    indexes.ensure_index(meta.clone(), log, true).await?;
    let key_type = meta.key_types[0];

    let (start, end, start_inclusive, end_inclusive) = match clauses_by_field.get(order_by.field.as_str()) {
        Some(clause) => translate_bounds(clause, key_type)?,
        None => (None, None, true, true),
    };

    let limit = qd.limit.unwrap_or(DEFAULT_RANGE_LIMIT);
    let mut ids = indexes.get_range(
        &meta.name(),
        start.as_deref(),
        end.as_deref(),
        start_inclusive,
        end_inclusive,
        limit,
    );
    if order_by.descending {
        ids.reverse();
    }
    Ok(Some(materialize_filtered(log, ids, qd)))
}

/// Translate a where-clause on the ordered field into a range-scan bound
/// pair (`==` -> `(k,k)`, `>=`/`>` -> `(k,·)`, `<=`/`<` -> `(·,k)`,
/// `range` -> `(value,end_value)`).
fn translate_bounds(
    clause: &WhereClause,
    key_type: crate::canonical::KeyType,
) -> Result<(Option<String>, Option<String>, bool, bool)> {
    Ok(match clause.op {
        Op::Eq => {
            let k = canonical(&clause.value, key_type)?;
            (Some(k.clone()), Some(k), true, true)
        }
        Op::Gte => (Some(canonical(&clause.value, key_type)?), None, true, true),
        Op::Gt => (Some(canonical(&clause.value, key_type)?), None, false, true),
        Op::Lte => (None, Some(canonical(&clause.value, key_type)?), true, true),
        Op::Lt => (None, Some(canonical(&clause.value, key_type)?), true, false),
        Op::Range => {
            let start = canonical(&clause.value, key_type)?;
            let end = clause
                .end_value
                .as_ref()
                .map(|v| canonical(v, key_type))
                .transpose()?;
            (Some(start), end, true, true)
        }
    })
}

/// Step 3: intersect equality postings, building single-field indexes
/// on demand (on-demand builds are durably persisted, the same as
/// `ensure_index`).
async fn try_equality_intersection(
    qd: &QueryDescriptor,
    indexes: &IndexManager,
    log: &RecordLog,
) -> Result<Option<Vec<DocumentSnapshot>>> {
    let eq_clauses: Vec<&WhereClause> = qd.wheres.iter().filter(|c| c.op == Op::Eq).collect();
    if eq_clauses.is_empty() {
        return Ok(None);
    }

    let mut posting_sets: Vec<Vec<String>> = Vec::with_capacity(eq_clauses.len());
    for clause in &eq_clauses {
        indexes.ensure_single_field_on_demand(&clause.field, log).await?;
        let meta = indexes
            .meta(&clause.field)
            .expect("ensure_single_field_on_demand just registered this field");
        let key = canonical(&clause.value, meta.key_types[0])?;
        posting_sets.push(indexes.get_exact(&clause.field, &key));
    }

    posting_sets.sort_by_key(|ids| ids.len());
    let mut iter = posting_sets.into_iter();
    let mut acc = iter.next().unwrap_or_default();
    for set in iter {
        let lookup: HashSet<&str> = set.iter().map(String::as_str).collect();
        acc.retain(|id| lookup.contains(id.as_str()));
    }

    let limit = qd.limit.unwrap_or(DEFAULT_RANGE_LIMIT);
    acc.truncate(limit);
    Ok(Some(materialize_filtered(log, acc, qd)))
}

/// Step 4: read every live document, filter, sort, then truncate.
fn full_scan(qd: &QueryDescriptor, log: &RecordLog) -> Vec<DocumentSnapshot> {
    let mut docs: Vec<_> = log
        .read_all_live()
        .into_iter()
        .filter(|doc| qd.matches(doc))
        .collect();

    if let Some(order_by) = &qd.order_by {
        docs.sort_by(|a, b| {
            let ordering = compare_values_with_none(a.get(&order_by.field), b.get(&order_by.field));
            if order_by.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    if let Some(limit) = qd.limit {
        docs.truncate(limit);
    }

    docs.into_iter()
        .map(|data| {
            let id = data.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            DocumentSnapshot::new(id, data)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::KeyType;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RecordLog, IndexManager) {
        let dir = TempDir::new().unwrap();
        let coll_dir = dir.path().join("people");
        let log = RecordLog::open(&coll_dir).unwrap();
        let indexes = IndexManager::new(&coll_dir);
        (dir, log, indexes)
    }

    #[tokio::test]
    async fn full_scan_filters_sorts_and_limits() {
        let (_dir, mut log, indexes) = setup();
        for (id, age) in [("a", 10), ("b", 40), ("c", 20), ("d", 30)] {
            log.append_record(&json!({"id": id, "age": age}), None).unwrap();
        }
        let qd = QueryDescriptor::new()
            .with_where(WhereClause::cmp("age", Op::Gte, json!(20)))
            .with_order_by("age", false);
        let results = execute(&qd, &indexes, &log).await.unwrap();
        let ages: Vec<i64> = results.iter().map(|d| d.data["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![20, 30, 40]);
    }

    #[tokio::test]
    async fn range_query_with_registered_index() {
        let (_dir, mut log, indexes) = setup();
        for (id, age) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            log.append_record(&json!({"id": id, "age": age}), None).unwrap();
        }
        indexes
            .ensure_index(IndexMeta::single("age", KeyType::Num, true), &log, false)
            .await
            .unwrap();

        let qd = QueryDescriptor::new()
            .with_where(WhereClause::cmp("age", Op::Gte, json!(20)))
            .with_where(WhereClause::cmp("age", Op::Lte, json!(35)))
            .with_order_by("age", false);
        let results = execute(&qd, &indexes, &log).await.unwrap();
        let ages: Vec<i64> = results.iter().map(|d| d.data["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![20, 30]);
    }

    #[tokio::test]
    async fn composite_prefix_query() {
        let (_dir, mut log, indexes) = setup();
        log.append_record(&json!({"id": "a", "age": 30, "created": "2024-01"}), None)
            .unwrap();
        log.append_record(&json!({"id": "b", "age": 30, "created": "2024-02"}), None)
            .unwrap();
        log.append_record(&json!({"id": "c", "age": 31, "created": "2024-01"}), None)
            .unwrap();

        indexes
            .ensure_index(
                IndexMeta::composite(
                    vec![
                        ("age".to_string(), KeyType::Num),
                        ("created".to_string(), KeyType::Str),
                    ],
                    true,
                ),
                &log,
                false,
            )
            .await
            .unwrap();

        let qd = QueryDescriptor::new()
            .with_where(WhereClause::eq("age", json!(30)))
            .with_where(WhereClause::cmp("created", Op::Gte, json!("2024-02")));
        let results = execute(&qd, &indexes, &log).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[tokio::test]
    async fn equality_intersection_across_two_fields() {
        let (_dir, mut log, indexes) = setup();
        log.append_record(&json!({"id": "a", "name": "Ada", "email": "a@x"}), None)
            .unwrap();
        log.append_record(&json!({"id": "b", "name": "Ada", "email": "b@x"}), None)
            .unwrap();

        let qd = QueryDescriptor::new()
            .with_where(WhereClause::eq("name", json!("Ada")))
            .with_where(WhereClause::eq("email", json!("a@x")));
        let results = execute(&qd, &indexes, &log).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn missing_record_dropped_silently() {
        let (_dir, mut log, indexes) = setup();
        log.append_record(&json!({"id": "a", "name": "Ada"}), None).unwrap();
        indexes
            .ensure_index(IndexMeta::single("name", crate::canonical::KeyType::Str, false), &log, false)
            .await
            .unwrap();

        // simulate a stale posting pointing at an id with no record
        let qd = QueryDescriptor::new().with_where(WhereClause::eq("name", json!("Ada")));
        let results = execute(&qd, &indexes, &log).await.unwrap();
        assert_eq!(results.len(), 1);
    }
}
