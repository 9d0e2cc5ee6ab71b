use thiserror::Error;

/// Errors surfaced by entity store implementations.
#[derive(Error, Debug)]
pub enum EntityError {
    /// Backend failure (I/O, transaction, lock).
    #[error("{0}")]
    Storage(String),

    /// A stored document could not be decoded.
    #[error("{0}")]
    Encoding(String),

    /// The query itself is malformed (e.g. an unparseable cursor).
    #[error("{0}")]
    Query(String),
}
