//! Read-path aggregation: turning raw, possibly-overlapping revisions
//! into the single value visible at a chosen instant.
//!
//! The core operation here is the same one the design notes describe as
//! a "group-by-last-revision aggregation": for every `(k, t)` pair, the
//! newest revision `r <= as_of` is authoritative, and older revisions
//! are shadowed rather than deleted. [`aggregate_sheets`] implements
//! this for a series; [`crate::store::Store::get`] implements the
//! analogous single-value case for a properties path by taking the path
//! with the greatest `r`.

use std::collections::BTreeMap;

use crate::docstore::SheetRecord;
use crate::model::Sample;
use crate::time::Timestamp;

/// Reduces a set of raw sheet rows (already filtered to one sheet key,
/// one `as_of` ceiling, and one time window) to the sequence of samples
/// visible at that instant, sorted ascending by observation time.
///
/// Rows are folded in ascending revision order, so the last write to a
/// given `t` — the newest `r <= as_of` — is what survives into the
/// output, exactly matching the sort-by-r-ascending, group-by-t,
/// keep-last rule.
pub fn aggregate_sheets(mut rows: Vec<SheetRecord>) -> Vec<Sample> {
    rows.sort_by_key(|r| r.r);
    let mut by_time: BTreeMap<Timestamp, serde_json::Value> = BTreeMap::new();
    for row in rows {
        by_time.insert(row.t, row.v);
    }
    by_time.into_iter().map(|(t, v)| Sample { t, v }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectId;
    use serde_json::json;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_exact(s).unwrap()
    }

    #[test]
    fn later_revision_shadows_earlier_one_at_same_time() {
        let k = ObjectId::new();
        let t = ts("2020-01-01T00:00:00Z");
        let rows = vec![
            SheetRecord { k, r: ts("2020-01-01T00:00:00Z"), t, v: json!(1.0) },
            SheetRecord { k, r: ts("2020-02-01T00:00:00Z"), t, v: json!(2.0) },
        ];
        let out = aggregate_sheets(rows);
        assert_eq!(out, vec![Sample { t, v: json!(2.0) }]);
    }

    #[test]
    fn output_is_sorted_ascending_by_time() {
        let k = ObjectId::new();
        let rows = vec![
            SheetRecord { k, r: ts("2020-01-01T00:00:00Z"), t: ts("2020-03-01T00:00:00Z"), v: json!(3) },
            SheetRecord { k, r: ts("2020-01-01T00:00:00Z"), t: ts("2020-01-01T00:00:00Z"), v: json!(1) },
            SheetRecord { k, r: ts("2020-01-01T00:00:00Z"), t: ts("2020-02-01T00:00:00Z"), v: json!(2) },
        ];
        let out = aggregate_sheets(rows);
        let times: Vec<_> = out.iter().map(|s| s.t).collect();
        assert_eq!(times, vec![ts("2020-01-01T00:00:00Z"), ts("2020-02-01T00:00:00Z"), ts("2020-03-01T00:00:00Z")]);
    }
}
