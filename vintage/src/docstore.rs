//! Abstract document-store interface and the in-process reference
//! implementation.
//!
//! The storage engine in [`crate::store`] never touches a concrete
//! database; it only calls through [`DocStore`] and the four collection
//! traits it exposes. [`MemoryDocStore`] is the only backend shipped
//! here — a `parking_lot`-guarded in-memory reference implementation
//! good enough to exercise every invariant the engine depends on.
//! A production deployment swaps in a different `DocStore` without
//! touching the engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::DocStoreError;
use crate::model::ObjectId;
use crate::time::Timestamp;

/// One alias record: `refs` in the data model.
#[derive(Debug, Clone, PartialEq)]
pub struct RefsRecord {
    /// This record's own identifier.
    pub id: ObjectId,
    /// The data source that minted this ticker.
    pub source: String,
    /// The ticker string.
    pub ticker: String,
    /// Instant from which this alias is valid.
    pub valid_from: Timestamp,
    /// Instant until which this alias is valid.
    pub valid_until: Timestamp,
    /// Path key for this instrument's properties.
    pub props: ObjectId,
    /// Path key for this instrument's series-index.
    pub series: ObjectId,
    /// Path key for this instrument's (uninterpreted) scenarios.
    pub scenarios: ObjectId,
}

/// One revisioned attribute document: `paths` in the data model.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRecord {
    /// Path key: one of a refs record's `props`/`series`/`scenarios` ids.
    pub k: ObjectId,
    /// Revision instant.
    pub r: Timestamp,
    /// The attribute value at this revision.
    pub v: serde_json::Value,
}

/// One revisioned sample: `sheets` in the data model.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRecord {
    /// Sheet key: a series-index entry's value.
    pub k: ObjectId,
    /// Revision instant at which this sample was written.
    pub r: Timestamp,
    /// Observation time.
    pub t: Timestamp,
    /// Sample value.
    pub v: serde_json::Value,
}

/// Operations against the `refs` collection.
#[async_trait]
pub trait RefsCollection: Send + Sync {
    /// Inserts a new alias record.
    async fn insert(&self, record: RefsRecord) -> Result<(), DocStoreError>;

    /// Finds the alias record for `(source, ticker)` valid at `as_of`,
    /// i.e. with `valid_from <= as_of <= valid_until`.
    async fn find_by_alias(
        &self,
        source: &str,
        ticker: &str,
        as_of: Timestamp,
    ) -> Result<Option<RefsRecord>, DocStoreError>;

    /// Lists every alias record valid at `as_of`, optionally restricted
    /// to one source.
    async fn list_valid(
        &self,
        source: Option<&str>,
        as_of: Timestamp,
    ) -> Result<Vec<RefsRecord>, DocStoreError>;

    /// Finds every alias record sharing a given `props` path key and
    /// valid at `as_of` — how a properties match is joined back to its
    /// tickers.
    async fn find_by_props(
        &self,
        props: ObjectId,
        as_of: Timestamp,
    ) -> Result<Vec<RefsRecord>, DocStoreError>;

    /// Sets `valid_until` on the alias record with the given id.
    /// Returns `false` if no such record exists.
    async fn set_valid_until(&self, id: ObjectId, valid_until: Timestamp) -> Result<bool, DocStoreError>;

    /// Deletes a refs record by id. Used only as the compensating action
    /// when an insert is cancelled partway through.
    async fn delete_by_id(&self, id: ObjectId) -> Result<(), DocStoreError>;

    /// Deletes every refs record with `valid_from > t`.
    async fn purge_after(&self, t: Timestamp) -> Result<(), DocStoreError>;

    /// Number of records currently stored.
    async fn count(&self) -> Result<usize, DocStoreError>;

    /// Empties the collection.
    async fn clear(&self) -> Result<(), DocStoreError>;
}

/// Operations against the `paths` collection.
#[async_trait]
pub trait PathsCollection: Send + Sync {
    /// Writes a revision, unique-upserting on `(k, r)`: writing the same
    /// `(k, r)` twice replaces the stored value rather than duplicating
    /// the row.
    async fn upsert(&self, record: PathRecord) -> Result<(), DocStoreError>;

    /// Returns the path with the greatest `r <= as_of` for key `k`.
    async fn latest(&self, k: ObjectId, as_of: Timestamp) -> Result<Option<PathRecord>, DocStoreError>;

    /// Returns the latest revision `r <= as_of` for every distinct key
    /// `k` in the collection. This is the index-scan-and-group-by-k
    /// step `find_instruments` relies on to filter properties paths by
    /// value without a richer query language.
    async fn all_latest(&self, as_of: Timestamp) -> Result<Vec<PathRecord>, DocStoreError>;

    /// Deletes every path with `r > t`.
    async fn purge_after(&self, t: Timestamp) -> Result<(), DocStoreError>;

    /// Number of records currently stored.
    async fn count(&self) -> Result<usize, DocStoreError>;

    /// Empties the collection.
    async fn clear(&self) -> Result<(), DocStoreError>;
}

/// Operations against the `sheets` collection.
#[async_trait]
pub trait SheetsCollection: Send + Sync {
    /// Inserts a batch of sample rows. A row whose `(k, t, r)` already
    /// exists is treated as a per-row upsert (its value is replaced)
    /// rather than rejected, matching the documented bulk-insert
    /// fallback without requiring the caller to retry.
    async fn insert_many(&self, records: Vec<SheetRecord>) -> Result<(), DocStoreError>;

    /// Returns the samples for key `k` with `r <= as_of` and
    /// `from <= t <= to`, in no particular order; the caller performs
    /// the group-by-t-keep-last-r aggregation.
    async fn window(
        &self,
        k: ObjectId,
        as_of: Timestamp,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<SheetRecord>, DocStoreError>;

    /// Returns the minimum and maximum observation time among samples
    /// for key `k` with `r <= as_of`, or `None` if there are none.
    async fn time_bounds(&self, k: ObjectId, as_of: Timestamp) -> Result<Option<(Timestamp, Timestamp)>, DocStoreError>;

    /// Deletes every sample with `r > t`.
    async fn purge_after(&self, t: Timestamp) -> Result<(), DocStoreError>;

    /// Number of records currently stored.
    async fn count(&self) -> Result<usize, DocStoreError>;

    /// Empties the collection.
    async fn clear(&self) -> Result<(), DocStoreError>;
}

/// Operations against the reserved `spaces` collection. Nothing in the
/// engine writes to it; it exists so `count_items`/`purge_db` account
/// for all four collections uniformly.
#[async_trait]
pub trait SpacesCollection: Send + Sync {
    /// Number of records currently stored.
    async fn count(&self) -> Result<usize, DocStoreError>;

    /// Empties the collection.
    async fn clear(&self) -> Result<(), DocStoreError>;
}

/// A connected document store, exposing its four collections.
///
/// `DocStore` exposes accessors rather than inheriting the collection
/// traits directly so that each collection stays independently
/// object-safe; `refs()`/`paths()`/`sheets()`/`spaces()` are the only
/// points of contact the storage engine needs.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// The `refs` collection.
    fn refs(&self) -> &dyn RefsCollection;
    /// The `paths` collection.
    fn paths(&self) -> &dyn PathsCollection;
    /// The `sheets` collection.
    fn sheets(&self) -> &dyn SheetsCollection;
    /// The `spaces` collection.
    fn spaces(&self) -> &dyn SpacesCollection;

    /// Creates the indexes required by the data model. Must be callable
    /// repeatedly; repeated creation is idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::ConnectionFailed`] if the handshake with
    /// the backing store fails.
    async fn ensure_indexes(&self) -> Result<(), DocStoreError>;
}

#[derive(Default)]
struct MemoryRefs {
    rows: RwLock<Vec<RefsRecord>>,
}

#[async_trait]
impl RefsCollection for MemoryRefs {
    async fn insert(&self, record: RefsRecord) -> Result<(), DocStoreError> {
        let mut rows = self.rows.write();
        if rows
            .iter()
            .any(|r| r.source == record.source && r.ticker == record.ticker && r.id != record.id)
        {
            return Err(DocStoreError::Conflict {
                collection: "refs",
                detail: format!("({}, {})", record.source, record.ticker),
            });
        }
        rows.push(record);
        Ok(())
    }

    async fn find_by_alias(
        &self,
        source: &str,
        ticker: &str,
        as_of: Timestamp,
    ) -> Result<Option<RefsRecord>, DocStoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .find(|r| {
                r.source == source && r.ticker == ticker && r.valid_from <= as_of && as_of <= r.valid_until
            })
            .cloned())
    }

    async fn list_valid(
        &self,
        source: Option<&str>,
        as_of: Timestamp,
    ) -> Result<Vec<RefsRecord>, DocStoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.valid_from <= as_of && as_of <= r.valid_until)
            .filter(|r| source.is_none_or(|s| s == r.source))
            .cloned()
            .collect())
    }

    async fn find_by_props(
        &self,
        props: ObjectId,
        as_of: Timestamp,
    ) -> Result<Vec<RefsRecord>, DocStoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|r| r.props == props && r.valid_from <= as_of && as_of <= r.valid_until)
            .cloned()
            .collect())
    }

    async fn set_valid_until(&self, id: ObjectId, valid_until: Timestamp) -> Result<bool, DocStoreError> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|r| r.id == id) {
            Some(r) => {
                r.valid_until = valid_until;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_by_id(&self, id: ObjectId) -> Result<(), DocStoreError> {
        self.rows.write().retain(|r| r.id != id);
        Ok(())
    }

    async fn purge_after(&self, t: Timestamp) -> Result<(), DocStoreError> {
        self.rows.write().retain(|r| r.valid_from <= t);
        Ok(())
    }

    async fn count(&self) -> Result<usize, DocStoreError> {
        Ok(self.rows.read().len())
    }

    async fn clear(&self) -> Result<(), DocStoreError> {
        self.rows.write().clear();
        Ok(())
    }
}

#[derive(Default)]
struct MemoryPaths {
    rows: RwLock<Vec<PathRecord>>,
}

#[async_trait]
impl PathsCollection for MemoryPaths {
    async fn upsert(&self, record: PathRecord) -> Result<(), DocStoreError> {
        let mut rows = self.rows.write();
        match rows.iter_mut().find(|p| p.k == record.k && p.r == record.r) {
            Some(existing) => existing.v = record.v,
            None => rows.push(record),
        }
        Ok(())
    }

    async fn latest(&self, k: ObjectId, as_of: Timestamp) -> Result<Option<PathRecord>, DocStoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|p| p.k == k && p.r <= as_of)
            .max_by_key(|p| p.r)
            .cloned())
    }

    async fn all_latest(&self, as_of: Timestamp) -> Result<Vec<PathRecord>, DocStoreError> {
        let mut by_key: HashMap<ObjectId, PathRecord> = HashMap::new();
        for row in self.rows.read().iter().filter(|p| p.r <= as_of) {
            by_key
                .entry(row.k)
                .and_modify(|existing| {
                    if row.r > existing.r {
                        *existing = row.clone();
                    }
                })
                .or_insert_with(|| row.clone());
        }
        Ok(by_key.into_values().collect())
    }

    async fn purge_after(&self, t: Timestamp) -> Result<(), DocStoreError> {
        self.rows.write().retain(|p| p.r <= t);
        Ok(())
    }

    async fn count(&self) -> Result<usize, DocStoreError> {
        Ok(self.rows.read().len())
    }

    async fn clear(&self) -> Result<(), DocStoreError> {
        self.rows.write().clear();
        Ok(())
    }
}

#[derive(Default)]
struct MemorySheets {
    rows: RwLock<Vec<SheetRecord>>,
}

#[async_trait]
impl SheetsCollection for MemorySheets {
    async fn insert_many(&self, records: Vec<SheetRecord>) -> Result<(), DocStoreError> {
        let mut rows = self.rows.write();
        for record in records {
            match rows
                .iter_mut()
                .find(|s| s.k == record.k && s.t == record.t && s.r == record.r)
            {
                Some(existing) => existing.v = record.v,
                None => rows.push(record),
            }
        }
        Ok(())
    }

    async fn window(
        &self,
        k: ObjectId,
        as_of: Timestamp,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<SheetRecord>, DocStoreError> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|s| s.k == k && s.r <= as_of && s.t >= from && s.t <= to)
            .cloned()
            .collect())
    }

    async fn time_bounds(&self, k: ObjectId, as_of: Timestamp) -> Result<Option<(Timestamp, Timestamp)>, DocStoreError> {
        let rows = self.rows.read();
        let mut times = rows.iter().filter(|s| s.k == k && s.r <= as_of).map(|s| s.t);
        let first = match times.next() {
            Some(t) => t,
            None => return Ok(None),
        };
        let (min, max) = times.fold((first, first), |(min, max), t| (min.min(t), max.max(t)));
        Ok(Some((min, max)))
    }

    async fn purge_after(&self, t: Timestamp) -> Result<(), DocStoreError> {
        self.rows.write().retain(|s| s.r <= t);
        Ok(())
    }

    async fn count(&self) -> Result<usize, DocStoreError> {
        Ok(self.rows.read().len())
    }

    async fn clear(&self) -> Result<(), DocStoreError> {
        self.rows.write().clear();
        Ok(())
    }
}

#[derive(Default)]
struct MemorySpaces {
    rows: RwLock<Vec<serde_json::Value>>,
}

#[async_trait]
impl SpacesCollection for MemorySpaces {
    async fn count(&self) -> Result<usize, DocStoreError> {
        Ok(self.rows.read().len())
    }

    async fn clear(&self) -> Result<(), DocStoreError> {
        self.rows.write().clear();
        Ok(())
    }
}

/// An in-process, `parking_lot`-guarded document store.
///
/// This is the reference backend: it satisfies every invariant the
/// storage engine depends on, but keeps no data beyond the lifetime of
/// the process. `Clone` is cheap — it shares the same underlying
/// collections through `Arc`.
#[derive(Clone, Default)]
pub struct MemoryDocStore {
    refs: Arc<MemoryRefs>,
    paths: Arc<MemoryPaths>,
    sheets: Arc<MemorySheets>,
    spaces: Arc<MemorySpaces>,
}

impl MemoryDocStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocStore for MemoryDocStore {
    fn refs(&self) -> &dyn RefsCollection {
        self.refs.as_ref()
    }

    fn paths(&self) -> &dyn PathsCollection {
        self.paths.as_ref()
    }

    fn sheets(&self) -> &dyn SheetsCollection {
        self.sheets.as_ref()
    }

    fn spaces(&self) -> &dyn SpacesCollection {
        self.spaces.as_ref()
    }

    async fn ensure_indexes(&self) -> Result<(), DocStoreError> {
        Ok(())
    }
}

/// Connection settings for a document-store backend, resolved from
/// explicit values first and the process environment second.
///
/// Environment variable names match the external contract: `mongodb_host`,
/// `mongodb_port`, `mongodb_user`, `mongodb_pwd`, `signaldb_collection`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Store host.
    pub host: Option<String>,
    /// Store port.
    pub port: Option<u16>,
    /// Store username.
    pub user: Option<String>,
    /// Store password.
    pub pwd: Option<String>,
    /// Target collection/database name.
    pub col: Option<String>,
}

impl ConnectionConfig {
    /// Builds a config from explicit CLI values, falling back to the
    /// environment for anything left unset.
    pub fn resolve(
        host: Option<String>,
        port: Option<u16>,
        user: Option<String>,
        pwd: Option<String>,
        col: Option<String>,
    ) -> Self {
        Self {
            host: host.or_else(|| std::env::var("mongodb_host").ok()),
            port: port.or_else(|| std::env::var("mongodb_port").ok().and_then(|p| p.parse().ok())),
            user: user.or_else(|| std::env::var("mongodb_user").ok()),
            pwd: pwd.or_else(|| std::env::var("mongodb_pwd").ok()),
            col: col.or_else(|| std::env::var("signaldb_collection").ok()),
        }
    }
}
