//! Integration tests for the full store lifecycle: write, read,
//! correction, deletion, and rollback against an in-memory document
//! store.

use std::sync::Arc;

use serde_json::json;
use vintage::{MemoryDocStore, MergeMode, Store};

async fn fresh_store() -> Store {
    Store::connect(Arc::new(MemoryDocStore::new())).await.unwrap()
}

fn instrument(tickers: serde_json::Value, properties: serde_json::Value, series: serde_json::Value) -> serde_json::Value {
    json!({ "tickers": tickers, "properties": properties, "series": series })
}

#[tokio::test]
async fn insert_then_get_by_either_alias() {
    let store = fresh_store().await;
    let doc = instrument(
        json!([["ISIN", "A"], ["BB", "B"]]),
        json!({"cat": "equity", "name": "Acme"}),
        json!({"price": [["2020-01-01T00:00:00Z", 10.0], ["2020-01-02T00:00:00Z", 11.0]]}),
    );

    let report = store.upsert(vec![doc], MergeMode::Append, MergeMode::Append, false).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped_invalid, 0);

    let by_isin = store.get("ISIN", "A", None, None, None).await.unwrap().unwrap();
    let by_bb = store.get("BB", "B", None, None, None).await.unwrap().unwrap();

    assert_eq!(by_isin.properties, by_bb.properties);
    assert_eq!(by_isin.series, by_bb.series);
    assert_eq!(by_isin.properties.get("cat").unwrap(), "equity");
    assert_eq!(by_isin.series["price"].len(), 2);

    let times: Vec<_> = by_isin.series["price"].iter().map(|s| s.t.to_rfc3339()).collect();
    assert_eq!(times, vec!["2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"]);
}

#[tokio::test]
async fn append_mode_never_overwrites_existing_property() {
    let store = fresh_store().await;
    let tickers = json!([["ISIN", "A"], ["BB", "B"]]);
    let first = instrument(tickers.clone(), json!({"cat": "equity", "name": "Acme"}), json!({}));
    store.upsert(vec![first], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let second = instrument(tickers, json!({"name": "Changed", "ccy": "USD"}), json!({}));
    store.upsert(vec![second], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let got = store.get("ISIN", "A", None, None, None).await.unwrap().unwrap();
    assert_eq!(got.properties.get("cat").unwrap(), "equity");
    assert_eq!(got.properties.get("name").unwrap(), "Acme");
    assert_eq!(got.properties.get("ccy").unwrap(), "USD");
}

#[tokio::test]
async fn replace_mode_overwrites_and_drops_unmentioned_keys() {
    let store = fresh_store().await;
    let tickers = json!([["ISIN", "A"]]);
    let first = instrument(tickers.clone(), json!({"cat": "equity", "name": "Acme"}), json!({}));
    store.upsert(vec![first], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let second = instrument(tickers, json!({"name": "Changed", "ccy": "USD"}), json!({}));
    store.upsert(vec![second], MergeMode::Replace, MergeMode::Append, false).await.unwrap();

    let got = store.get("ISIN", "A", None, None, None).await.unwrap().unwrap();
    assert_eq!(got.properties.get("name").unwrap(), "Changed");
    assert_eq!(got.properties.get("ccy").unwrap(), "USD");
    assert!(!got.properties.contains_key("cat"));
}

#[tokio::test]
async fn series_correction_over_disjoint_then_overlapping_windows() {
    let store = fresh_store().await;
    let tickers = json!([["ISIN", "A"]]);

    let first = instrument(
        tickers.clone(),
        json!({}),
        json!({"price": [["2020-01-01T00:00:00Z", 1.0], ["2020-01-02T00:00:00Z", 2.0]]}),
    );
    store.upsert(vec![first], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let after_first = store.get("ISIN", "A", None, None, None).await.unwrap().unwrap();
    let values: Vec<_> = after_first.series["price"].iter().map(|s| s.v.clone()).collect();
    assert_eq!(values, vec![json!(1.0), json!(2.0)]);

    let second = instrument(
        tickers,
        json!({}),
        json!({"price": [["2020-01-02T00:00:00Z", 2.5], ["2020-01-03T00:00:00Z", 3.0]]}),
    );
    store.upsert(vec![second], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let after_second = store.get("ISIN", "A", None, None, None).await.unwrap().unwrap();
    let values: Vec<_> = after_second.series["price"].iter().map(|s| s.v.clone()).collect();
    assert_eq!(values, vec![json!(1.0), json!(2.5), json!(3.0)]);
}

#[tokio::test]
async fn upsert_is_idempotent_on_collection_sizes() {
    let store = fresh_store().await;
    let doc = instrument(
        json!([["ISIN", "A"]]),
        json!({"cat": "equity"}),
        json!({"price": [["2020-01-01T00:00:00Z", 1.0]]}),
    );

    store.upsert(vec![doc.clone()], MergeMode::Append, MergeMode::Append, false).await.unwrap();
    let n0 = store.count_items().await.unwrap();
    store.upsert(vec![doc], MergeMode::Append, MergeMode::Append, false).await.unwrap();
    let n1 = store.count_items().await.unwrap();

    assert_eq!(n0, n1);
}

#[tokio::test]
async fn delete_then_rollback_restores_original_instrument() {
    let store = fresh_store().await;
    let doc = instrument(
        json!([["ISIN", "A"]]),
        json!({"cat": "equity"}),
        json!({"price": [["2020-01-01T00:00:00Z", 1.0]]}),
    );
    store.upsert(vec![doc], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let t0 = vintage::Timestamp::now();
    assert!(store.delete("ISIN", "A").await.unwrap());
    assert!(store.get("ISIN", "A", None, None, None).await.unwrap().is_none());

    store.rollback(t0).await.unwrap();
    let restored = store.get("ISIN", "A", None, None, None).await.unwrap().unwrap();
    assert_eq!(restored.properties.get("cat").unwrap(), "equity");
}

#[tokio::test]
async fn delete_is_visible_only_from_the_delete_instant_onward() {
    let store = fresh_store().await;
    let doc = instrument(json!([["ISIN", "A"]]), json!({"cat": "equity"}), json!({}));
    store.upsert(vec![doc], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let before_delete = vintage::Timestamp::now();
    store.delete("ISIN", "A").await.unwrap();

    assert!(store.get("ISIN", "A", Some(before_delete), None, None).await.unwrap().is_some());
    assert!(store.get("ISIN", "A", None, None, None).await.unwrap().is_none());
}

#[tokio::test]
async fn consolidate_flag_merges_duplicate_primary_aliases_in_one_batch() {
    let store = fresh_store().await;
    let a = instrument(json!([["ISIN", "A"]]), json!({"cat": "equity"}), json!({}));
    let b = instrument(json!([["ISIN", "A"]]), json!({"name": "Acme"}), json!({}));

    let report = store.upsert(vec![a, b], MergeMode::Append, MergeMode::Append, true).await.unwrap();
    assert_eq!(report.inserted, 1);

    let got = store.get("ISIN", "A", None, None, None).await.unwrap().unwrap();
    assert_eq!(got.properties.get("cat").unwrap(), "equity");
    assert_eq!(got.properties.get("name").unwrap(), "Acme");
}

#[tokio::test]
async fn invalid_documents_are_skipped_without_failing_the_batch() {
    let store = fresh_store().await;
    let valid = instrument(json!([["ISIN", "A"]]), json!({}), json!({}));
    let invalid = json!({"tickers": [], "properties": {}, "series": {}});

    let report = store.upsert(vec![valid, invalid], MergeMode::Append, MergeMode::Append, false).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped_invalid, 1);
}

#[tokio::test]
async fn find_instruments_matches_on_property_equality() {
    let store = fresh_store().await;
    let a = instrument(json!([["ISIN", "A"]]), json!({"cat": "equity"}), json!({}));
    let b = instrument(json!([["ISIN", "B"]]), json!({"cat": "bond"}), json!({}));
    store.upsert(vec![a, b], MergeMode::Append, MergeMode::Append, false).await.unwrap();

    let mut filter = serde_json::Map::new();
    filter.insert("cat".to_string(), json!("equity"));
    let found = store.find_instruments(&filter, None).await.unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].aliases, vec![("ISIN".to_string(), "A".to_string())]);
}

#[tokio::test]
async fn list_tickers_reports_currently_valid_aliases_only() {
    let store = fresh_store().await;
    let a = instrument(json!([["ISIN", "A"]]), json!({}), json!({}));
    let b = instrument(json!([["BB", "B"]]), json!({}), json!({}));
    store.upsert(vec![a, b], MergeMode::Append, MergeMode::Append, false).await.unwrap();
    store.delete("ISIN", "A").await.unwrap();

    let all = store.list_tickers(None, None).await.unwrap();
    assert_eq!(all, vec![("BB".to_string(), "B".to_string())]);
}

#[tokio::test]
async fn purge_db_empties_every_collection() {
    let store = fresh_store().await;
    let doc = instrument(
        json!([["ISIN", "A"]]),
        json!({"cat": "equity"}),
        json!({"price": [["2020-01-01T00:00:00Z", 1.0]]}),
    );
    store.upsert(vec![doc], MergeMode::Append, MergeMode::Append, false).await.unwrap();
    store.purge_db().await.unwrap();

    let counts = store.count_items().await.unwrap();
    assert_eq!(counts.refs, 0);
    assert_eq!(counts.paths, 0);
    assert_eq!(counts.sheets, 0);
    assert_eq!(counts.spaces, 0);
}

#[tokio::test]
async fn twenty_instruments_with_two_aliases_each_are_cross_ticker_equivalent() {
    let store = fresh_store().await;
    let mut docs = Vec::new();
    for i in 0..20 {
        docs.push(instrument(
            json!([["ISIN", format!("I{i}")], ["BB", format!("B{i}")]]),
            json!({"idx": i}),
            json!({}),
        ));
    }
    // Shuffle deterministically by reversing, rather than relying on
    // system randomness the store must not depend on.
    docs.reverse();
    store.upsert(docs, MergeMode::Append, MergeMode::Append, false).await.unwrap();

    for i in 0..20 {
        let by_isin = store.get("ISIN", &format!("I{i}"), None, None, None).await.unwrap().unwrap();
        let by_bb = store.get("BB", &format!("B{i}"), None, None, None).await.unwrap().unwrap();
        assert_eq!(by_isin.properties, by_bb.properties);
    }
}
