//! # vintage
//!
//! Bitemporal market-data repository for financial instruments.
//!
//! vintage stores compound **instruments** — alias tickers, a free-form
//! properties document, and one or more named time series — under
//! revision-time semantics, and answers point-in-time queries by any
//! alias. Every write lands as a new revision; nothing is ever mutated
//! in place, so a read at an earlier instant always reproduces what was
//! visible then.
//!
//! **Status**: the backend shipped here ([`MemoryDocStore`]) is an
//! in-process reference implementation. A production deployment
//! supplies its own [`DocStore`] over a persistent backend; the engine
//! itself is backend-agnostic.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vintage::{MemoryDocStore, MergeMode, Store};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::connect(Arc::new(MemoryDocStore::new())).await?;
//!
//! let batch = vec![serde_json::json!({
//!     "tickers": [["ISIN", "XS0000000000"]],
//!     "properties": {"cat": "equity", "name": "Acme"},
//!     "series": {"price": [["2020-01-01T00:00:00Z", 10.0]]},
//! })];
//!
//! store.upsert(batch, MergeMode::Append, MergeMode::Append, false).await?;
//! let instrument = store.get("ISIN", "XS0000000000", None, None, None).await?;
//! assert!(instrument.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`time`] — RFC3339 codec, millisecond truncation, recursive coercion
//! - [`model`] — `ObjectId`, `Instrument`, `Sample`, `MergeMode`
//! - [`validate`] — structural validation of instrument documents
//! - [`merge`] — property-map and series merge primitives
//! - [`consolidate`] — deduplication of a batch by primary alias
//! - [`docstore`] — the `DocStore` abstraction and its in-memory backend
//! - [`query`] — read-path revision aggregation
//! - [`store`] — the storage engine tying the above together
//! - [`error`] — error types

pub mod consolidate;
pub mod docstore;
pub mod error;
pub mod merge;
pub mod model;
pub mod query;
pub mod store;
pub mod time;
pub mod validate;

// Re-export primary API types at crate root for convenience.
pub use docstore::{ConnectionConfig, DocStore, MemoryDocStore};
pub use error::{Result, VintageError};
pub use model::{Instrument, MergeMode, ObjectId};
pub use store::{CollectionCounts, ResolvedInstrument, Store, UpsertReport};
pub use time::Timestamp;
