//! Key-addressable entity storage with condition queries.
//!
//! The [`EntityStore`] trait is the persistence seam for the task connector:
//! JSON documents keyed by id, plus a small condition language (equality,
//! less-than, greater-than, `And`/`Or`), single-property sorting with a
//! stable insertion-order tie-break, and cursor pagination.

pub mod error;
pub mod memory;
mod query;
pub mod redb;
pub mod traits;

pub use error::EntityError;
pub use memory::MemoryStore;
pub use self::redb::RedbStore;
pub use traits::{EntityPage, EntityQuery, EntityStore, Filter, Sort, SortDirection, DEFAULT_PAGE_SIZE};
