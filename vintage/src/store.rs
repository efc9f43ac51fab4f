//! The storage engine: insert/update instruments into the four-collection
//! revisioned store, point-in-time reads, and list/find/delete/rollback.
//!
//! `Store` is the only thing a caller needs: it is constructed around a
//! [`DocStore`] handle (ensuring the required indexes exist), and from
//! then on every operation goes through the write path ([`Store::upsert`])
//! or the read path ([`Store::get`], [`Store::find_instruments`],
//! [`Store::list_tickers`]), plus the maintenance operations
//! ([`Store::delete`], [`Store::rollback`], [`Store::count_items`],
//! [`Store::purge_db`]).

use std::collections::HashMap;
use std::sync::Arc;

use crate::docstore::{DocStore, PathRecord, RefsRecord, SheetRecord};
use crate::error::{StoreError, VintageError};
use crate::merge::{merge_properties, merge_series};
use crate::model::{Instrument, MergeMode, ObjectId, Properties, Sample};
use crate::query::aggregate_sheets;
use crate::time::Timestamp;
use crate::validate::extract_instrument;

/// An instrument as reconstructed by a read: its currently-valid
/// aliases, its properties at the requested instant, and its series
/// within the requested window.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInstrument {
    /// Every alias sharing this instrument's properties id, valid at the
    /// instant the read was performed against.
    pub aliases: Vec<(String, String)>,
    /// Properties visible at the requested instant.
    pub properties: Properties,
    /// Series visible at the requested instant, within the requested window.
    pub series: std::collections::BTreeMap<String, Vec<Sample>>,
}

/// Outcome of a single `upsert` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Number of instruments inserted as new.
    pub inserted: usize,
    /// Number of instruments merged into an existing one.
    pub updated: usize,
    /// Number of input documents rejected by the validator and skipped.
    pub skipped_invalid: usize,
}

/// Collection sizes reported by [`Store::count_items`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionCounts {
    /// Rows in `refs`.
    pub refs: usize,
    /// Rows in `paths`.
    pub paths: usize,
    /// Rows in `sheets`.
    pub sheets: usize,
    /// Rows in `spaces`.
    pub spaces: usize,
}

fn index_from_value(v: &serde_json::Value) -> HashMap<String, ObjectId> {
    v.as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(name, id)| {
                    let id: ObjectId = serde_json::from_value(id.clone()).ok()?;
                    Some((name.clone(), id))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn index_to_value(index: &HashMap<String, ObjectId>) -> serde_json::Value {
    let obj: serde_json::Map<String, serde_json::Value> = index
        .iter()
        .map(|(name, id)| (name.clone(), serde_json::to_value(id).expect("ObjectId serializes")))
        .collect();
    serde_json::Value::Object(obj)
}

fn properties_to_value(properties: &Properties) -> serde_json::Value {
    serde_json::Value::Object(properties.clone())
}

fn properties_from_value(v: Option<serde_json::Value>) -> Properties {
    v.and_then(|v| v.as_object().cloned()).unwrap_or_default()
}

/// The bitemporal market-data repository.
pub struct Store {
    doc_store: Arc<dyn DocStore>,
}

impl Store {
    /// Connects to `doc_store`, ensuring the required indexes exist.
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] if the initial handshake or
    /// index creation fails; this is fatal and the caller should abort
    /// startup.
    pub async fn connect(doc_store: Arc<dyn DocStore>) -> Result<Self, VintageError> {
        doc_store.ensure_indexes().await?;
        Ok(Self { doc_store })
    }

    /// Validates, optionally consolidates, and writes a batch of
    /// instrument documents.
    ///
    /// Invalid documents are logged and skipped; the call still succeeds
    /// and reports how many were skipped. A single `now` is computed
    /// once and shared by every write this batch performs.
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] if the underlying store
    /// rejects a write for a reason other than the recoverable
    /// conflicts this method already handles.
    pub async fn upsert(
        &self,
        batch: Vec<serde_json::Value>,
        props_mode: MergeMode,
        series_mode: MergeMode,
        consolidate: bool,
    ) -> Result<UpsertReport, VintageError> {
        let mut instruments = Vec::with_capacity(batch.len());
        let mut skipped_invalid = 0;
        for doc in batch {
            match extract_instrument(doc) {
                Ok(instrument) => instruments.push(instrument),
                Err(err) => {
                    tracing::warn!(code = err.code(), error = %err, "skipping invalid instrument");
                    skipped_invalid += 1;
                }
            }
        }

        if consolidate {
            instruments = crate::consolidate::consolidate(instruments, props_mode);
        }

        let now = Timestamp::now();
        let mut inserted = 0;
        let mut updated = 0;
        for instrument in instruments {
            match self.locate(&instrument, now).await? {
                Some(main_ref) => {
                    self.update_instrument(&main_ref, &instrument, now, props_mode, series_mode)
                        .await?;
                    updated += 1;
                }
                None => {
                    self.insert_instrument(&instrument, now).await?;
                    inserted += 1;
                }
            }
        }

        Ok(UpsertReport {
            inserted,
            updated,
            skipped_invalid,
        })
    }

    /// Logs a ref whose properties path has no revision visible yet — a
    /// refs record pointing at a path that was never written, or was
    /// purged out from under it. Never returned as an error: both `get`
    /// and `upsert` fall back to (and, on a subsequent write, repair)
    /// empty properties rather than failing the call.
    fn warn_dangling_reference(&self, main_ref: &RefsRecord, outcome: &str) {
        let err = StoreError::DanglingReference {
            source: main_ref.source.clone(),
            ticker: main_ref.ticker.clone(),
            k: main_ref.props.to_string(),
        };
        tracing::warn!(%err, outcome, "dangling reference: properties path missing for ref");
    }

    async fn locate(&self, instrument: &Instrument, now: Timestamp) -> Result<Option<RefsRecord>, VintageError> {
        for (source, ticker) in &instrument.aliases {
            if let Some(r) = self.doc_store.refs().find_by_alias(source, ticker, now).await? {
                return Ok(Some(r));
            }
        }
        Ok(None)
    }

    async fn insert_instrument(&self, instrument: &Instrument, now: Timestamp) -> Result<(), VintageError> {
        let props_id = ObjectId::new();
        let series_id = ObjectId::new();
        let scenarios_id = ObjectId::new();

        let mut inserted_ref_ids = Vec::with_capacity(instrument.aliases.len());
        for (source, ticker) in &instrument.aliases {
            let id = ObjectId::new();
            let record = RefsRecord {
                id,
                source: source.clone(),
                ticker: ticker.clone(),
                valid_from: now,
                valid_until: Timestamp::max_sentinel(),
                props: props_id,
                series: series_id,
                scenarios: scenarios_id,
            };
            if let Err(err) = self.doc_store.refs().insert(record).await {
                return self.cancel_insert(instrument, inserted_ref_ids, &err).await;
            }
            inserted_ref_ids.push(id);
        }

        if let Err(err) = self
            .write_instrument_paths(props_id, series_id, instrument, now)
            .await
        {
            return self.cancel_insert(instrument, inserted_ref_ids, &err).await;
        }

        Ok(())
    }

    /// Writes the properties path, series-index path, and sheet rows for
    /// a freshly-inserted instrument. Split out from [`Self::insert_instrument`]
    /// so every failure after the refs are written, not just a refs
    /// conflict, triggers the same compensating rollback.
    async fn write_instrument_paths(
        &self,
        props_id: ObjectId,
        series_id: ObjectId,
        instrument: &Instrument,
        now: Timestamp,
    ) -> Result<(), VintageError> {
        self.doc_store
            .paths()
            .upsert(PathRecord {
                k: props_id,
                r: now,
                v: properties_to_value(&instrument.properties),
            })
            .await?;

        let mut index = HashMap::new();
        let mut rows = Vec::new();
        for (name, samples) in &instrument.series {
            let sheet_key = ObjectId::new();
            index.insert(name.clone(), sheet_key);
            rows.extend(samples.iter().map(|s| SheetRecord {
                k: sheet_key,
                r: now,
                t: s.t,
                v: s.v.clone(),
            }));
        }

        self.doc_store
            .paths()
            .upsert(PathRecord {
                k: series_id,
                r: now,
                v: index_to_value(&index),
            })
            .await?;

        if !rows.is_empty() {
            self.doc_store.sheets().insert_many(rows).await?;
        }

        Ok(())
    }

    /// Deletes every refs record already inserted for a cancelled insert,
    /// then reports the cancellation. Called whenever any step past the
    /// refs writes — the properties path, the series-index path, or the
    /// sheet rows — fails, so an insert never leaves refs pointing at
    /// paths that were never written.
    async fn cancel_insert(
        &self,
        instrument: &Instrument,
        inserted_ref_ids: Vec<ObjectId>,
        err: &dyn std::fmt::Display,
    ) -> Result<(), VintageError> {
        for already_inserted in inserted_ref_ids {
            self.doc_store.refs().delete_by_id(already_inserted).await?;
        }
        let (source, ticker) = instrument.primary_alias();
        tracing::warn!(%source, %ticker, %err, "insert cancelled, rolled back partial refs");
        Err(StoreError::InsertCancelled {
            source: source.to_string(),
            ticker: ticker.to_string(),
        }
        .into())
    }

    async fn update_instrument(
        &self,
        main_ref: &RefsRecord,
        instrument: &Instrument,
        now: Timestamp,
        props_mode: MergeMode,
        series_mode: MergeMode,
    ) -> Result<(), VintageError> {
        let existing_props_path = self.doc_store.paths().latest(main_ref.props, now).await?;
        if existing_props_path.is_none() {
            self.warn_dangling_reference(main_ref, "repairing on this upsert");
        }
        let mut properties = properties_from_value(existing_props_path.map(|p| p.v));
        let update_props = merge_properties(&mut properties, &instrument.properties, props_mode);

        let existing_series_path = self.doc_store.paths().latest(main_ref.series, now).await?;
        let mut index = index_from_value(&existing_series_path.map(|p| p.v).unwrap_or_default());
        let mut update_series_refs = false;
        let mut rows = Vec::new();

        for (name, samples) in &instrument.series {
            match index.get(name).copied() {
                None => {
                    let sheet_key = ObjectId::new();
                    index.insert(name.clone(), sheet_key);
                    update_series_refs = true;
                    rows.extend(samples.iter().map(|s| SheetRecord {
                        k: sheet_key,
                        r: now,
                        t: s.t,
                        v: s.v.clone(),
                    }));
                }
                Some(sheet_key) => {
                    let delta = self.series_delta(sheet_key, samples, now).await?;
                    rows.extend(delta.into_iter().map(|s| SheetRecord {
                        k: sheet_key,
                        r: now,
                        t: s.t,
                        v: s.v,
                    }));
                }
            }
        }

        if series_mode == MergeMode::Replace {
            let incoming_names: std::collections::HashSet<&String> = instrument.series.keys().collect();
            let stale: Vec<String> = index
                .keys()
                .filter(|name| !incoming_names.contains(name))
                .cloned()
                .collect();
            if !stale.is_empty() {
                for name in stale {
                    index.remove(&name);
                }
                update_series_refs = true;
            }
        }

        if update_props {
            self.doc_store
                .paths()
                .upsert(PathRecord {
                    k: main_ref.props,
                    r: now,
                    v: properties_to_value(&properties),
                })
                .await?;
        }

        if update_series_refs {
            self.doc_store
                .paths()
                .upsert(PathRecord {
                    k: main_ref.series,
                    r: now,
                    v: index_to_value(&index),
                })
                .await?;
        }

        if !rows.is_empty() {
            self.doc_store.sheets().insert_many(rows).await?;
        }

        Ok(())
    }

    /// Computes the sheet rows that must be written for one named
    /// series already present in the series-index: when the input's
    /// time window does not overlap what is stored, every input sample
    /// is written directly; otherwise the overlapping portion is merged
    /// via [`merge_series`] and only the delta is written.
    async fn series_delta(
        &self,
        sheet_key: ObjectId,
        samples: &[Sample],
        now: Timestamp,
    ) -> Result<Vec<Sample>, VintageError> {
        let (Some(input_min), Some(input_max)) = (samples.iter().map(|s| s.t).min(), samples.iter().map(|s| s.t).max())
        else {
            return Ok(Vec::new());
        };

        let stored_bounds = self.doc_store.sheets().time_bounds(sheet_key, now).await?;
        let disjoint = match stored_bounds {
            Some((stored_min, stored_max)) => input_max < stored_min || input_min > stored_max,
            None => true,
        };

        if disjoint {
            return Ok(samples.to_vec());
        }

        let existing_rows = self
            .doc_store
            .sheets()
            .window(sheet_key, now, input_min, input_max)
            .await?;
        let existing_samples = aggregate_sheets(existing_rows);
        Ok(merge_series(&existing_samples, samples))
    }

    /// Reads an instrument as it existed at `as_of` (default: now),
    /// restricted to the series window `[series_from, series_to]`
    /// (default: unbounded).
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] on a storage failure.
    pub async fn get(
        &self,
        source: &str,
        ticker: &str,
        as_of: Option<Timestamp>,
        series_from: Option<Timestamp>,
        series_to: Option<Timestamp>,
    ) -> Result<Option<ResolvedInstrument>, VintageError> {
        let as_of = as_of.unwrap_or_else(Timestamp::now);
        let Some(main_ref) = self.doc_store.refs().find_by_alias(source, ticker, as_of).await? else {
            return Ok(None);
        };
        self.resolve(&main_ref, as_of, series_from, series_to).await.map(Some)
    }

    async fn resolve(
        &self,
        main_ref: &RefsRecord,
        as_of: Timestamp,
        series_from: Option<Timestamp>,
        series_to: Option<Timestamp>,
    ) -> Result<ResolvedInstrument, VintageError> {
        let aliases = self
            .doc_store
            .refs()
            .find_by_props(main_ref.props, as_of)
            .await?
            .into_iter()
            .map(|r| (r.source, r.ticker))
            .collect();

        let latest_props_path = self.doc_store.paths().latest(main_ref.props, as_of).await?;
        if latest_props_path.is_none() {
            self.warn_dangling_reference(main_ref, "returning empty properties");
        }
        let properties = properties_from_value(latest_props_path.map(|p| p.v));

        let mut series = std::collections::BTreeMap::new();
        if let Some(series_path) = self.doc_store.paths().latest(main_ref.series, as_of).await? {
            let index = index_from_value(&series_path.v);
            let from = series_from.unwrap_or_else(Timestamp::min_sentinel);
            let to = series_to.unwrap_or_else(Timestamp::max_sentinel);
            for (name, sheet_key) in index {
                let rows = self.doc_store.sheets().window(sheet_key, as_of, from, to).await?;
                series.insert(name, aggregate_sheets(rows));
            }
        }

        Ok(ResolvedInstrument {
            aliases,
            properties,
            series,
        })
    }

    /// Finds every instrument whose properties match every `(key, value)`
    /// pair in `filter`, as of `as_of` (default: now).
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] on a storage failure.
    pub async fn find_instruments(
        &self,
        filter: &Properties,
        as_of: Option<Timestamp>,
    ) -> Result<Vec<ResolvedInstrument>, VintageError> {
        let as_of = as_of.unwrap_or_else(Timestamp::now);
        let latest_props = self.doc_store.paths().all_latest(as_of).await?;

        let mut out = Vec::new();
        for path in latest_props {
            let matches = filter.iter().all(|(key, value)| path.v.get(key) == Some(value));
            if !matches {
                continue;
            }
            let refs = self.doc_store.refs().find_by_props(path.k, as_of).await?;
            let Some(main_ref) = refs.into_iter().next() else {
                continue;
            };
            out.push(self.resolve(&main_ref, as_of, None, None).await?);
        }
        Ok(out)
    }

    /// Lists every `(source, ticker)` alias valid at `as_of`, optionally
    /// restricted to one `source`.
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] on a storage failure.
    pub async fn list_tickers(
        &self,
        source: Option<&str>,
        as_of: Option<Timestamp>,
    ) -> Result<Vec<(String, String)>, VintageError> {
        let as_of = as_of.unwrap_or_else(Timestamp::now);
        Ok(self
            .doc_store
            .refs()
            .list_valid(source, as_of)
            .await?
            .into_iter()
            .map(|r| (r.source, r.ticker))
            .collect())
    }

    /// Retires the alias `(source, ticker)` as of now. Other aliases of
    /// the same instrument, and historical reads before this instant,
    /// are unaffected.
    ///
    /// Returns `false` if no such alias is currently valid.
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] on a storage failure.
    pub async fn delete(&self, source: &str, ticker: &str) -> Result<bool, VintageError> {
        let now = Timestamp::now();
        let Some(existing) = self.doc_store.refs().find_by_alias(source, ticker, now).await? else {
            return Ok(false);
        };
        Ok(self.doc_store.refs().set_valid_until(existing.id, now).await?)
    }

    /// Purges every refs record, path, and sheet written strictly after
    /// `t`. Does not resurrect a `valid_until` edit made at exactly `t`.
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] on a storage failure.
    pub async fn rollback(&self, t: Timestamp) -> Result<(), VintageError> {
        self.doc_store.refs().purge_after(t).await?;
        self.doc_store.paths().purge_after(t).await?;
        self.doc_store.sheets().purge_after(t).await?;
        Ok(())
    }

    /// Reports the size of each of the four collections.
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] on a storage failure.
    pub async fn count_items(&self) -> Result<CollectionCounts, VintageError> {
        Ok(CollectionCounts {
            refs: self.doc_store.refs().count().await?,
            paths: self.doc_store.paths().count().await?,
            sheets: self.doc_store.sheets().count().await?,
            spaces: self.doc_store.spaces().count().await?,
        })
    }

    /// Empties all four collections.
    ///
    /// # Errors
    ///
    /// Returns [`VintageError::DocStore`] on a storage failure.
    pub async fn purge_db(&self) -> Result<(), VintageError> {
        self.doc_store.refs().clear().await?;
        self.doc_store.paths().clear().await?;
        self.doc_store.sheets().clear().await?;
        self.doc_store.spaces().clear().await?;
        Ok(())
    }
}
