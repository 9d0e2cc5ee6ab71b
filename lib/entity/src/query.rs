//! Shared query evaluation for entity store implementations.
//!
//! Stores hand over their full row set as `(insertion_seq, document)` pairs;
//! filtering, sorting, and cursor pagination happen here so both backends
//! behave identically.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::EntityError;
use crate::traits::{EntityPage, EntityQuery, Filter, SortDirection, DEFAULT_PAGE_SIZE};

impl Filter {
    /// Whether a document satisfies this condition.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq(property, want) => doc.get(property) == Some(want),
            Filter::Lt(property, want) => {
                doc.get(property).and_then(|v| compare_values(v, want)) == Some(Ordering::Less)
            }
            Filter::Gt(property, want) => {
                doc.get(property).and_then(|v| compare_values(v, want)) == Some(Ordering::Greater)
            }
            Filter::And(conditions) => conditions.iter().all(|c| c.matches(doc)),
            Filter::Or(conditions) => conditions.iter().any(|c| c.matches(doc)),
        }
    }
}

/// Compare two JSON scalars. Mixed or non-scalar types are incomparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Documents missing the sort property sort after documents that have it.
fn compare_property(a: &Value, b: &Value, property: &str) -> Ordering {
    match (a.get(property), b.get(property)) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Filter, sort, and paginate a row set.
pub(crate) fn run_query(
    rows: Vec<(u64, Value)>,
    query: &EntityQuery,
) -> Result<EntityPage, EntityError> {
    let mut rows: Vec<(u64, Value)> = rows
        .into_iter()
        .filter(|(_, doc)| query.filter.as_ref().map_or(true, |f| f.matches(doc)))
        .collect();

    match &query.sort {
        Some(sort) => rows.sort_by(|(seq_a, a), (seq_b, b)| {
            let ord = compare_property(a, b, &sort.property);
            let ord = match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            // Insertion order breaks ties regardless of direction.
            ord.then(seq_a.cmp(seq_b))
        }),
        None => rows.sort_by_key(|(seq, _)| *seq),
    }

    let offset = match &query.cursor {
        None => 0,
        Some(cursor) => cursor
            .parse::<usize>()
            .map_err(|_| EntityError::Query(format!("invalid cursor: {cursor}")))?,
    };
    let limit = if query.limit == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        query.limit
    };

    let total = rows.len();
    let entities: Vec<Value> = rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|(_, doc)| doc)
        .collect();
    let consumed = offset + entities.len();
    let cursor = (consumed < total).then(|| consumed.to_string());

    Ok(EntityPage { entities, cursor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_matches_exact_value() {
        let doc = json!({"status": "pending", "n": 3});
        assert!(Filter::eq("status", "pending").matches(&doc));
        assert!(!Filter::eq("status", "failed").matches(&doc));
        assert!(Filter::eq("n", 3).matches(&doc));
    }

    #[test]
    fn missing_property_never_matches() {
        let doc = json!({"a": 1});
        assert!(!Filter::eq("b", 1).matches(&doc));
        assert!(!Filter::lt("b", 10).matches(&doc));
        assert!(!Filter::gt("b", 0).matches(&doc));
    }

    #[test]
    fn lt_gt_on_numbers_and_strings() {
        let doc = json!({"n": 5, "ts": "2026-01-02T00:00:00.000Z"});
        assert!(Filter::lt("n", 6).matches(&doc));
        assert!(!Filter::lt("n", 5).matches(&doc));
        assert!(Filter::gt("n", 4).matches(&doc));
        assert!(Filter::gt("ts", "2026-01-01T00:00:00.000Z").matches(&doc));
        assert!(Filter::lt("ts", "2026-01-03T00:00:00.000Z").matches(&doc));
    }

    #[test]
    fn mixed_types_are_incomparable() {
        let doc = json!({"n": 5});
        assert!(!Filter::lt("n", "5").matches(&doc));
        assert!(!Filter::gt("n", "4").matches(&doc));
    }

    #[test]
    fn and_or_compose() {
        let doc = json!({"type": "a", "status": "pending"});
        let cond = Filter::and(vec![
            Filter::eq("type", "a"),
            Filter::or(vec![Filter::eq("status", "pending"), Filter::eq("status", "processing")]),
        ]);
        assert!(cond.matches(&doc));

        let cond = Filter::and(vec![Filter::eq("type", "b"), Filter::eq("status", "pending")]);
        assert!(!cond.matches(&doc));
    }

    #[test]
    fn invalid_cursor_is_a_query_error() {
        let result = run_query(vec![], &EntityQuery {
            cursor: Some("not-a-number".into()),
            ..Default::default()
        });
        assert!(matches!(result, Err(EntityError::Query(_))));
    }
}
