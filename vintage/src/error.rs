//! Error types for the vintage bitemporal market-data repository.

use thiserror::Error;

use crate::validate::ValidationError;

/// The main error type for all vintage operations.
#[derive(Error, Debug)]
pub enum VintageError {
    /// Error raised by the instrument validator.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Error raised while merging properties or series.
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Error raised by the storage engine's write or read path.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error raised by the document-store connection layer.
    #[error("doc store error: {0}")]
    DocStore(#[from] DocStoreError),

    /// Error raised while coercing RFC3339 strings into timestamps.
    #[error("time error: {0}")]
    Time(#[from] TimeError),
}

/// Errors that can occur while merging properties or series.
#[derive(Error, Debug)]
pub enum MergeError {
    /// A merge mode string was not `append` or `replace`.
    #[error("unsupported merge mode: '{mode}'")]
    UnsupportedMode {
        /// The unrecognized mode string.
        mode: String,
    },
}

/// Errors that can occur in the storage engine's write or read path.
#[derive(Error, Debug)]
pub enum StoreError {
    /// `upsert` was called with a batch that is not a list, tuple, or single mapping.
    #[error("upsert: supplied instrument data is not a list or mapping")]
    InvalidBatch,

    /// A refs record pointed at a properties or series-index path that no longer exists.
    #[error("dangling reference: ref for ({source}, {ticker}) has no path for k={k}")]
    DanglingReference {
        /// The source of the alias with the dangling reference.
        source: String,
        /// The ticker of the alias with the dangling reference.
        ticker: String,
        /// The path key that could not be resolved.
        k: String,
    },

    /// An insert was cancelled partway through and the partially written refs
    /// records have been rolled back.
    #[error("insert cancelled for instrument with first ticker ({source}, {ticker})")]
    InsertCancelled {
        /// The source of the instrument's primary alias.
        source: String,
        /// The ticker of the instrument's primary alias.
        ticker: String,
    },
}

/// Errors that can occur at the document-store connection layer.
#[derive(Error, Debug)]
pub enum DocStoreError {
    /// A required connection setting was not supplied explicitly or via environment.
    #[error("missing required connection setting: {0}")]
    MissingConfig(&'static str),

    /// A write violated a unique index (source+ticker on refs, k+r on paths, or k+t+r on sheets).
    #[error("unique index conflict on {collection} ({detail})")]
    Conflict {
        /// The collection whose unique index was violated.
        collection: &'static str,
        /// A short description of the conflicting key.
        detail: String,
    },

    /// Index creation or the initial handshake with the backing store failed.
    #[error("cannot access the store: {0}")]
    ConnectionFailed(String),
}

/// Errors that can occur while coercing strings into timestamps.
#[derive(Error, Debug)]
pub enum TimeError {
    /// A string was expected to match the RFC3339 pattern `YYYY-MM-DDTHH:MM:SSZ` but did not.
    #[error("'{0}' is not an RFC3339 datetime of the form YYYY-MM-DDTHH:MM:SSZ")]
    NotRfc3339(String),
}

/// Type alias for `Result<T, VintageError>`.
pub type Result<T> = std::result::Result<T, VintageError>;
