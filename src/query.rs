// query.rs - the logical query descriptor consumed by the planner.
//
// The legacy query module implemented a MongoDB-style `$gt`/`$and`/...
// operator registry over ad-hoc JSON filter trees; this store's
// QueryDescriptor is a flat, structured where-clause list instead, so that
// code is not reused directly. Its one-test-per-operator style is kept, and
// value_utils.rs's compare_values/get_nested_value are reused directly for
// the full-scan operator semantics below.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::value_utils::{compare_values, get_nested_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Gte,
    Gt,
    Lte,
    Lt,
    Range,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereClause {
    pub field: String,
    pub op: Op,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_value: Option<Value>,
}

impl WhereClause {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        WhereClause {
            field: field.into(),
            op: Op::Eq,
            value,
            end_value: None,
        }
    }

    pub fn cmp(field: impl Into<String>, op: Op, value: Value) -> Self {
        WhereClause {
            field: field.into(),
            op,
            value,
            end_value: None,
        }
    }

    pub fn range(field: impl Into<String>, value: Value, end_value: Value) -> Self {
        WhereClause {
            field: field.into(),
            op: Op::Range,
            value,
            end_value: Some(end_value),
        }
    }

    /// Evaluate this clause against a raw document field value. Missing
    /// fields behave as `null`; non-comparable or null LHS values make the
    /// clause false, never true.
    pub fn matches(&self, doc: &Value) -> bool {
        let field_value = get_nested_value(doc, &self.field).cloned().unwrap_or(Value::Null);
        if field_value.is_null() {
            return false;
        }
        match self.op {
            Op::Eq => field_value == self.value,
            Op::Gte => matches!(
                compare_values(&field_value, &self.value),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ),
            Op::Gt => compare_values(&field_value, &self.value) == Some(Ordering::Greater),
            Op::Lte => matches!(
                compare_values(&field_value, &self.value),
                Some(Ordering::Less) | Some(Ordering::Equal)
            ),
            Op::Lt => compare_values(&field_value, &self.value) == Some(Ordering::Less),
            Op::Range => {
                let above_start = matches!(
                    compare_values(&field_value, &self.value),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                );
                let below_end = match &self.end_value {
                    Some(end) => matches!(
                        compare_values(&field_value, end),
                        Some(Ordering::Less) | Some(Ordering::Equal)
                    ),
                    None => true,
                };
                above_start && below_end
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// A logical, language-neutral description of a query: a set of where
/// clauses, an optional sort, and an optional result cap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryDescriptor {
    #[serde(default)]
    pub wheres: Vec<WhereClause>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_where(mut self, clause: WhereClause) -> Self {
        self.wheres.push(clause);
        self
    }

    pub fn with_order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.wheres.iter().all(|clause| clause.matches(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_matches_equal_values_only() {
        let clause = WhereClause::eq("name", json!("Ada"));
        assert!(clause.matches(&json!({"name": "Ada"})));
        assert!(!clause.matches(&json!({"name": "Bob"})));
    }

    #[test]
    fn gte_is_inclusive() {
        let clause = WhereClause::cmp("age", Op::Gte, json!(20));
        assert!(clause.matches(&json!({"age": 20})));
        assert!(clause.matches(&json!({"age": 21})));
        assert!(!clause.matches(&json!({"age": 19})));
    }

    #[test]
    fn gt_is_exclusive() {
        let clause = WhereClause::cmp("age", Op::Gt, json!(20));
        assert!(!clause.matches(&json!({"age": 20})));
        assert!(clause.matches(&json!({"age": 21})));
    }

    #[test]
    fn lte_and_lt_bounds() {
        let lte = WhereClause::cmp("age", Op::Lte, json!(20));
        assert!(lte.matches(&json!({"age": 20})));
        let lt = WhereClause::cmp("age", Op::Lt, json!(20));
        assert!(!lt.matches(&json!({"age": 20})));
    }

    #[test]
    fn range_is_inclusive_both_ends() {
        let clause = WhereClause::range("age", json!(20), json!(30));
        assert!(clause.matches(&json!({"age": 20})));
        assert!(clause.matches(&json!({"age": 30})));
        assert!(clause.matches(&json!({"age": 25})));
        assert!(!clause.matches(&json!({"age": 31})));
    }

    #[test]
    fn missing_field_never_matches() {
        let clause = WhereClause::cmp("age", Op::Gte, json!(0));
        assert!(!clause.matches(&json!({"name": "Ada"})));
    }

    #[test]
    fn non_comparable_types_never_match() {
        let clause = WhereClause::cmp("age", Op::Gte, json!(20));
        assert!(!clause.matches(&json!({"age": "thirty"})));
    }

    #[test]
    fn descriptor_matches_requires_all_clauses() {
        let qd = QueryDescriptor::new()
            .with_where(WhereClause::eq("name", json!("Ada")))
            .with_where(WhereClause::cmp("age", Op::Gte, json!(18)));
        assert!(qd.matches(&json!({"name": "Ada", "age": 30})));
        assert!(!qd.matches(&json!({"name": "Ada", "age": 10})));
    }
}
