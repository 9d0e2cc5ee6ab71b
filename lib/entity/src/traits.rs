use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EntityError;

/// Default page size when a query does not specify one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// Filter — the condition language
// ---------------------------------------------------------------------------

/// A condition over top-level document properties.
///
/// Comparisons (`Lt`/`Gt`) apply to numbers and to strings; RFC 3339
/// timestamps stored with fixed precision compare correctly as strings.
/// A document missing the named property never matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(property: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(property.to_string(), value.into())
    }

    pub fn lt(property: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(property.to_string(), value.into())
    }

    pub fn gt(property: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(property.to_string(), value.into())
    }

    pub fn and(conditions: Vec<Filter>) -> Self {
        Filter::And(conditions)
    }

    pub fn or(conditions: Vec<Filter>) -> Self {
        Filter::Or(conditions)
    }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort order for a query: one property plus a direction. Ties always
/// break by insertion order, which every store implementation tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub property: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(property: &str) -> Self {
        Self {
            property: property.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(property: &str) -> Self {
        Self {
            property: property.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

// ---------------------------------------------------------------------------
// Query / Page
// ---------------------------------------------------------------------------

/// A paged query against an entity store.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    pub filter: Option<Filter>,
    pub sort: Option<Sort>,
    /// Opaque cursor from a previous [`EntityPage`].
    pub cursor: Option<String>,
    /// Page size; `0` means [`DEFAULT_PAGE_SIZE`].
    pub limit: usize,
}

impl Default for EntityQuery {
    fn default() -> Self {
        Self {
            filter: None,
            sort: None,
            cursor: None,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct EntityPage {
    pub entities: Vec<Value>,
    /// Present when more results remain; feed back into [`EntityQuery::cursor`].
    pub cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Key-addressable document storage with condition queries.
///
/// Documents are JSON objects keyed by an id chosen by the caller. Stores
/// must remember first-write order per key so equal sort keys page out in
/// insertion order.
pub trait EntityStore: Send + Sync {
    /// Fetch a document. Returns `None` if the key does not exist.
    fn get(&self, id: &str) -> Result<Option<Value>, EntityError>;

    /// Insert or replace a document. Replacing keeps the key's original
    /// insertion order.
    fn set(&self, id: &str, doc: &Value) -> Result<(), EntityError>;

    /// Delete a document. Returns whether the key existed.
    fn remove(&self, id: &str) -> Result<bool, EntityError>;

    /// Run a filtered, sorted, paged query.
    fn query(&self, query: &EntityQuery) -> Result<EntityPage, EntityError>;
}
