//! Structural validation of an instrument document.
//!
//! [`validate`] checks an untyped [`serde_json::Value`] against the
//! ordered rules an instrument must satisfy before it can be coerced,
//! consolidated, or stored. Each failure carries a stable numeric code so
//! callers can assert on *which* rule rejected a document, not just that
//! one did. [`extract_instrument`] performs the same walk while also
//! building the typed [`Instrument`] the rest of the write path consumes,
//! so a document is only ever walked once.

use serde_json::Value;

use crate::model::{Instrument, Sample};
use crate::time::Timestamp;

/// One structural defect in an instrument document, carrying the stable
/// rule code used in diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Rule 1: the top-level value is not a JSON object.
    #[error("instrument is not a mapping")]
    NotAMapping,
    /// Rule 2: one of `tickers`, `properties`, `series` is missing.
    #[error("instrument is missing required key '{0}'")]
    MissingKey(&'static str),
    /// Rule 3: `tickers` is not an array.
    #[error("'tickers' is not a sequence")]
    TickersNotSequence,
    /// Rule 4: `tickers` has no elements.
    #[error("'tickers' is empty")]
    TickersEmpty,
    /// Rule 5: a ticker entry is not itself an array.
    #[error("ticker at index {0} is not a sequence")]
    TickerNotSequence(usize),
    /// Rule 6: a ticker entry does not have exactly two elements.
    #[error("ticker at index {0} does not have exactly 2 elements")]
    TickerWrongLength(usize),
    /// Rule 7: one of the two ticker elements is not a string.
    #[error("ticker at index {0} has a non-string part")]
    TickerPartNotString(usize),
    /// Rule 8: one of the two ticker elements is an empty string.
    #[error("ticker at index {0} has an empty part")]
    TickerPartEmpty(usize),
    /// Rule 9: `series` is not an object.
    #[error("'series' is not a mapping")]
    SeriesNotMapping,
    /// Rule 10: a series key, once reached via JSON object iteration, is
    /// not representable as a string. JSON object keys are always
    /// strings, so this rule exists for parity with the rule ordering;
    /// it can never actually fail.
    #[error("series name is not a string")]
    SeriesNameNotString,
    /// Rule 11: a series name is the empty string.
    #[error("series name is empty")]
    SeriesNameEmpty,
    /// Rule 12: a sample is not a 2-element sequence.
    #[error("sample in series '{series}' at index {index} is not a 2-element sequence")]
    SampleNotSequence {
        /// The series the offending sample belongs to.
        series: String,
        /// Index of the offending sample within that series.
        index: usize,
    },
    /// Rule 13: a sample does not have exactly two elements.
    #[error("sample in series '{series}' at index {index} does not have exactly 2 elements")]
    SampleWrongLength {
        /// The series the offending sample belongs to.
        series: String,
        /// Index of the offending sample within that series.
        index: usize,
    },
    /// Rule 14: `sample[0]` is not an RFC3339 string of the required form.
    #[error("sample in series '{series}' at index {index} does not have an RFC3339 time in position 0")]
    SampleTimeNotRfc3339 {
        /// The series the offending sample belongs to.
        series: String,
        /// Index of the offending sample within that series.
        index: usize,
    },
    /// Rule 15: a series name contains a reserved character (`.` or `$`).
    #[error("series name '{0}' contains a reserved character")]
    SeriesNameReserved(String),
    /// Rule 16: a property key contains a reserved character (`.` or `$`).
    #[error("property key '{0}' contains a reserved character")]
    PropertyKeyReserved(String),
}

impl ValidationError {
    /// The stable rule code for this failure, matching the 1-based rule
    /// ordering documents must satisfy.
    pub fn code(&self) -> u8 {
        match self {
            Self::NotAMapping => 1,
            Self::MissingKey(_) => 2,
            Self::TickersNotSequence => 3,
            Self::TickersEmpty => 4,
            Self::TickerNotSequence(_) => 5,
            Self::TickerWrongLength(_) => 6,
            Self::TickerPartNotString(_) => 7,
            Self::TickerPartEmpty(_) => 8,
            Self::SeriesNotMapping => 9,
            Self::SeriesNameNotString => 10,
            Self::SeriesNameEmpty => 11,
            Self::SampleNotSequence { .. } => 12,
            Self::SampleWrongLength { .. } => 13,
            Self::SampleTimeNotRfc3339 { .. } => 14,
            Self::SeriesNameReserved(_) => 15,
            Self::PropertyKeyReserved(_) => 16,
        }
    }
}

fn has_reserved_char(s: &str) -> bool {
    s.contains('.') || s.contains('$')
}

fn check_property_keys(properties: &serde_json::Map<String, Value>) -> Result<(), ValidationError> {
    for key in properties.keys() {
        if has_reserved_char(key) {
            return Err(ValidationError::PropertyKeyReserved(key.clone()));
        }
        if let Some(nested) = properties.get(key).and_then(Value::as_object) {
            check_property_keys(nested)?;
        }
    }
    Ok(())
}

/// Validates `doc` against the 16 ordered structural rules. Returns the
/// first rule violated, if any.
///
/// # Errors
///
/// Returns the [`ValidationError`] for the first rule, in order, that
/// `doc` fails.
pub fn validate(doc: &Value) -> Result<(), ValidationError> {
    let obj = doc.as_object().ok_or(ValidationError::NotAMapping)?;

    for key in ["tickers", "properties", "series"] {
        if !obj.contains_key(key) {
            return Err(ValidationError::MissingKey(key));
        }
    }

    let tickers = obj["tickers"]
        .as_array()
        .ok_or(ValidationError::TickersNotSequence)?;
    if tickers.is_empty() {
        return Err(ValidationError::TickersEmpty);
    }
    for (i, ticker) in tickers.iter().enumerate() {
        let parts = ticker
            .as_array()
            .ok_or(ValidationError::TickerNotSequence(i))?;
        if parts.len() != 2 {
            return Err(ValidationError::TickerWrongLength(i));
        }
        for part in parts {
            let s = part.as_str().ok_or(ValidationError::TickerPartNotString(i))?;
            if s.is_empty() {
                return Err(ValidationError::TickerPartEmpty(i));
            }
        }
    }

    let series = obj["series"].as_object().ok_or(ValidationError::SeriesNotMapping)?;
    for (name, samples) in series {
        if name.is_empty() {
            return Err(ValidationError::SeriesNameEmpty);
        }
        let samples = samples
            .as_array()
            .ok_or(ValidationError::SampleNotSequence {
                series: name.clone(),
                index: 0,
            })?;
        for (i, sample) in samples.iter().enumerate() {
            let parts = sample.as_array().ok_or_else(|| ValidationError::SampleNotSequence {
                series: name.clone(),
                index: i,
            })?;
            if parts.len() != 2 {
                return Err(ValidationError::SampleWrongLength {
                    series: name.clone(),
                    index: i,
                });
            }
            let t = parts[0].as_str().filter(|s| Timestamp::matches_pattern(s));
            if t.is_none() {
                return Err(ValidationError::SampleTimeNotRfc3339 {
                    series: name.clone(),
                    index: i,
                });
            }
        }
        if has_reserved_char(name) {
            return Err(ValidationError::SeriesNameReserved(name.clone()));
        }
    }

    let properties = obj["properties"]
        .as_object()
        .ok_or(ValidationError::MissingKey("properties"))?;
    check_property_keys(properties)?;

    Ok(())
}

/// Validates `doc` and, if valid, extracts the typed [`Instrument`] it
/// describes, coercing series sample times and any embedded RFC3339
/// string in `properties` in the same pass.
///
/// # Errors
///
/// Returns the same [`ValidationError`] as [`validate`].
pub fn extract_instrument(mut doc: Value) -> Result<Instrument, ValidationError> {
    validate(&doc)?;
    crate::time::recursive_coerce(&mut doc);

    let obj = doc.as_object_mut().expect("validated above");
    let tickers = obj.remove("tickers").expect("validated above");
    let properties = obj
        .remove("properties")
        .expect("validated above")
        .as_object()
        .expect("validated above")
        .clone();
    let series_obj = obj.remove("series").expect("validated above");

    let aliases = tickers
        .as_array()
        .expect("validated above")
        .iter()
        .map(|t| {
            let parts = t.as_array().expect("validated above");
            (
                parts[0].as_str().expect("validated above").to_string(),
                parts[1].as_str().expect("validated above").to_string(),
            )
        })
        .collect();

    let mut series = std::collections::BTreeMap::new();
    for (name, samples) in series_obj.as_object().expect("validated above") {
        let mut named_samples = Vec::new();
        for sample in samples.as_array().expect("validated above") {
            let parts = sample.as_array().expect("validated above");
            let t = Timestamp::parse_exact(parts[0].as_str().expect("validated above"))
                .expect("validated above");
            named_samples.push(Sample {
                t,
                v: parts[1].clone(),
            });
        }
        named_samples.sort_by_key(|s| s.t);
        series.insert(name.clone(), named_samples);
    }

    Ok(Instrument {
        aliases,
        properties,
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc() -> Value {
        json!({
            "tickers": [["ISIN", "A"], ["BB", "B"]],
            "properties": {"cat": "equity", "name": "Acme"},
            "series": {"price": [["2020-01-01T00:00:00Z", 10.0], ["2020-01-02T00:00:00Z", 11.0]]},
        })
    }

    #[test]
    fn accepts_valid_document() {
        assert!(validate(&valid_doc()).is_ok());
    }

    #[test]
    fn rejects_non_mapping() {
        assert_eq!(validate(&json!([1, 2, 3])).unwrap_err().code(), 1);
    }

    #[test]
    fn rejects_missing_key() {
        let mut doc = valid_doc();
        doc.as_object_mut().unwrap().remove("series");
        assert_eq!(validate(&doc).unwrap_err().code(), 2);
    }

    #[test]
    fn rejects_empty_tickers() {
        let mut doc = valid_doc();
        doc["tickers"] = json!([]);
        assert_eq!(validate(&doc).unwrap_err().code(), 4);
    }

    #[test]
    fn rejects_empty_ticker_part() {
        let mut doc = valid_doc();
        doc["tickers"] = json!([["ISIN", ""]]);
        assert_eq!(validate(&doc).unwrap_err().code(), 8);
    }

    #[test]
    fn rejects_non_rfc3339_sample_time() {
        let mut doc = valid_doc();
        doc["series"]["price"] = json!([["not-a-time", 1.0]]);
        assert_eq!(validate(&doc).unwrap_err().code(), 14);
    }

    #[test]
    fn rejects_reserved_characters_in_series_name() {
        let mut doc = valid_doc();
        doc["series"] = json!({"pri.ce": [["2020-01-01T00:00:00Z", 1.0]]});
        assert_eq!(validate(&doc).unwrap_err().code(), 15);
    }

    #[test]
    fn rejects_reserved_characters_in_property_key() {
        let mut doc = valid_doc();
        doc["properties"] = json!({"a$b": 1});
        assert_eq!(validate(&doc).unwrap_err().code(), 16);
    }

    #[test]
    fn extracts_typed_instrument() {
        let instrument = extract_instrument(valid_doc()).unwrap();
        assert_eq!(instrument.aliases.len(), 2);
        assert_eq!(instrument.primary_alias(), ("ISIN", "A"));
        assert_eq!(instrument.series.get("price").unwrap().len(), 2);
        assert_eq!(instrument.properties.get("cat").unwrap(), "equity");
    }
}
