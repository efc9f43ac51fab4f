//! Deduplicates a batch of incoming instruments by primary alias.
//!
//! `consolidate` is the in-memory reconciliation pass that runs before
//! instruments reach the storage engine: instruments that share a
//! primary alias (the first ticker in their alias list) are merged into
//! one, using the same [`crate::merge`] primitives the storage engine
//! uses on the write path, so the behaviour of "upsert with consolidate"
//! and "consolidate then upsert without" stays consistent.

use std::collections::BTreeMap;

use crate::merge::merge_properties;
use crate::model::{Instrument, MergeMode, Sample};

/// Merges `instruments` so that each primary alias appears exactly once.
///
/// The first instrument seen for a primary alias becomes the seed: its
/// alias list and properties are kept, and later duplicates are folded
/// in under `props_mode`. Series are merged per name by accumulating
/// samples into a map keyed by observation time, where a later sample
/// overwrites an earlier one at the same time; the final series is
/// emitted sorted ascending by time.
///
/// Consolidating an already-consolidated list returns a structurally
/// equal list, since every primary alias is already unique and every
/// per-name accumulator collapses to its own input unchanged.
pub fn consolidate(instruments: Vec<Instrument>, props_mode: MergeMode) -> Vec<Instrument> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut seeds: BTreeMap<(String, String), Instrument> = BTreeMap::new();
    let mut accumulators: BTreeMap<(String, String), BTreeMap<String, BTreeMap<crate::time::Timestamp, serde_json::Value>>> =
        BTreeMap::new();

    for instrument in instruments {
        let key = {
            let (source, ticker) = instrument.primary_alias();
            (source.to_string(), ticker.to_string())
        };

        let acc = accumulators.entry(key.clone()).or_default();
        for (name, samples) in &instrument.series {
            let series_acc = acc.entry(name.clone()).or_default();
            for sample in samples {
                series_acc.insert(sample.t, sample.v.clone());
            }
        }

        match seeds.get_mut(&key) {
            Some(seed) => {
                merge_properties(&mut seed.properties, &instrument.properties, props_mode);
            }
            None => {
                order.push(key.clone());
                seeds.insert(key, instrument);
            }
        }
    }

    order
        .into_iter()
        .map(|key| {
            let mut seed = seeds.remove(&key).expect("seeded above");
            let acc = accumulators.remove(&key).expect("accumulated above");
            seed.series = acc
                .into_iter()
                .map(|(name, by_time)| {
                    let samples = by_time.into_iter().map(|(t, v)| Sample { t, v }).collect();
                    (name, samples)
                })
                .collect();
            seed
        })
        .collect()
}
