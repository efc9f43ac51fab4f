//! Property-map and series merge primitives.
//!
//! These are pure, in-memory functions with no knowledge of storage or
//! revisioning: [`merge_properties`] combines two property bags under an
//! `append`/`replace` policy, and [`merge_series`] computes the delta
//! between an existing sorted series and an incoming one.

use crate::model::{MergeMode, Properties, Sample};

/// Reserved property keys that survive a `replace` merge even when
/// absent from the incoming map.
const PRESERVED_ON_REPLACE: &[&str] = &["series", "_id"];

/// Merges `new` into `old` in place under `mode`, returning whether `old`
/// was modified.
///
/// `append`: a key from `new` is added to `old` only if `old` does not
/// already have it; existing values are never overwritten.
///
/// `replace`: every key from `new` overwrites `old`, and then any key
/// present in `old` but absent from `new` is removed, except `series`
/// and `_id`, which are always preserved.
pub fn merge_properties(old: &mut Properties, new: &Properties, mode: MergeMode) -> bool {
    let mut modified = false;
    match mode {
        MergeMode::Append => {
            for (k, v) in new {
                if !old.contains_key(k) {
                    old.insert(k.clone(), v.clone());
                    modified = true;
                }
            }
        }
        MergeMode::Replace => {
            for (k, v) in new {
                if old.get(k) != Some(v) {
                    old.insert(k.clone(), v.clone());
                    modified = true;
                }
            }
            let stale: Vec<String> = old
                .keys()
                .filter(|k| !new.contains_key(*k) && !PRESERVED_ON_REPLACE.contains(&k.as_str()))
                .cloned()
                .collect();
            for k in stale {
                old.remove(&k);
                modified = true;
            }
        }
    }
    modified
}

/// Computes the delta that must be written as new sheet rows when
/// merging `new` samples into an `old` sorted series.
///
/// A new sample whose time already occurs in `old` with an equal value
/// is dropped (no-op); every other new sample is kept. The result is not
/// re-sorted relative to `new`'s input order beyond what the caller
/// already guarantees (series extraction sorts ascending by time).
pub fn merge_series(old: &[Sample], new: &[Sample]) -> Vec<Sample> {
    let old_by_time: std::collections::HashMap<_, _> = old.iter().map(|s| (s.t, &s.v)).collect();
    new.iter()
        .filter(|s| old_by_time.get(&s.t) != Some(&&s.v))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, serde_json::Value)]) -> Properties {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn append_never_overwrites() {
        let mut old = props(&[("cat", json!("equity")), ("name", json!("Acme"))]);
        let new = props(&[("name", json!("Changed")), ("ccy", json!("USD"))]);
        let modified = merge_properties(&mut old, &new, MergeMode::Append);
        assert!(modified);
        assert_eq!(old.get("name").unwrap(), "Acme");
        assert_eq!(old.get("ccy").unwrap(), "USD");
        assert_eq!(old.get("cat").unwrap(), "equity");
    }

    #[test]
    fn replace_overwrites_and_prunes() {
        let mut old = props(&[("cat", json!("equity")), ("name", json!("Acme"))]);
        let new = props(&[("name", json!("Changed")), ("ccy", json!("USD"))]);
        let modified = merge_properties(&mut old, &new, MergeMode::Replace);
        assert!(modified);
        assert_eq!(old.get("name").unwrap(), "Changed");
        assert_eq!(old.get("ccy").unwrap(), "USD");
        assert!(!old.contains_key("cat"));
    }

    #[test]
    fn replace_preserves_series_and_id() {
        let mut old = props(&[("series", json!({"k": "v"})), ("_id", json!("abc"))]);
        let new = props(&[]);
        let modified = merge_properties(&mut old, &new, MergeMode::Replace);
        assert!(!modified);
        assert!(old.contains_key("series"));
        assert!(old.contains_key("_id"));
    }

    #[test]
    fn no_op_merge_reports_unmodified() {
        let mut old = props(&[("cat", json!("equity"))]);
        let new = props(&[("cat", json!("equity"))]);
        assert!(!merge_properties(&mut old, &new, MergeMode::Append));
        assert!(!merge_properties(&mut old, &new, MergeMode::Replace));
    }

    #[test]
    fn series_merge_drops_equal_values_keeps_differing_and_new() {
        use crate::time::Timestamp;
        let t1 = Timestamp::parse_exact("2020-01-01T00:00:00Z").unwrap();
        let t2 = Timestamp::parse_exact("2020-01-02T00:00:00Z").unwrap();
        let t3 = Timestamp::parse_exact("2020-01-03T00:00:00Z").unwrap();
        let old = vec![
            Sample { t: t1, v: json!(1.0) },
            Sample { t: t2, v: json!(2.0) },
        ];
        let new = vec![
            Sample { t: t2, v: json!(2.5) },
            Sample { t: t3, v: json!(3.0) },
        ];
        let delta = merge_series(&old, &new);
        assert_eq!(delta, vec![Sample { t: t2, v: json!(2.5) }, Sample { t: t3, v: json!(3.0) }]);
    }

    #[test]
    fn series_merge_of_identical_series_is_empty() {
        use crate::time::Timestamp;
        let t1 = Timestamp::parse_exact("2020-01-01T00:00:00Z").unwrap();
        let old = vec![Sample { t: t1, v: json!(1.0) }];
        assert!(merge_series(&old, &old).is_empty());
    }
}
