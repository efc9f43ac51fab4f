//! Core data types shared across validation, merging, consolidation and
//! storage: opaque identifiers, instrument aliases, and the typed
//! instrument shape produced once a document has passed validation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::Timestamp;

/// An opaque identifier shared by every refs record that names the same
/// underlying properties path, series path, or scenarios path.
///
/// Stands in for the source's database-assigned object id: this
/// implementation mints its own, since nothing about the identifier's
/// value is ever inspected, only its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Mints a fresh, random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A free-form property bag. Values are opaque JSON; the only key with
/// reserved meaning is `series`, which carries the instrument's
/// observation series rather than a scalar property.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// One observation in a time series: an RFC3339 instant paired with an
/// arbitrary JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Observation time.
    pub t: Timestamp,
    /// Observed value.
    pub v: serde_json::Value,
}

/// A single incoming instrument, already validated and coerced: one or
/// more aliases (the first is the primary alias under which the
/// instrument is inserted or looked up for updates), a property bag, and
/// zero or more named time series.
///
/// This is the typed shape the validator hands to the rest of the write
/// path; nothing downstream of [`crate::validate::extract_instrument`]
/// ever looks at a raw `serde_json::Value` again.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    /// Every `(source, ticker)` alias this instrument is known under.
    /// The first entry is the primary alias.
    pub aliases: Vec<(String, String)>,
    /// Scalar and nested properties, excluding `series`.
    pub properties: Properties,
    /// Named observation series, each sorted ascending by time.
    pub series: std::collections::BTreeMap<String, Vec<Sample>>,
}

impl Instrument {
    /// The primary `(source, ticker)` pair, i.e. the first alias.
    ///
    /// # Panics
    ///
    /// Panics if `aliases` is empty. The validator guarantees at least
    /// one alias before an `Instrument` is ever constructed, so this
    /// should never be reachable outside test code that builds one by
    /// hand.
    pub fn primary_alias(&self) -> (&str, &str) {
        let (source, ticker) = &self.aliases[0];
        (source.as_str(), ticker.as_str())
    }
}

/// How an incoming write combines with what is already on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Existing keys are kept; only keys absent from the current record
    /// are added.
    Append,
    /// Incoming keys overwrite existing ones; keys present in the old
    /// record but absent from the new one are dropped, except `series`
    /// and `_id`, which always survive an update.
    Replace,
}

impl MergeMode {
    /// Parses the wire representation (`"append"` or `"replace"`).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::MergeError::UnsupportedMode`] for any
    /// other string.
    pub fn parse(s: &str) -> Result<Self, crate::error::MergeError> {
        match s {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            other => Err(crate::error::MergeError::UnsupportedMode {
                mode: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_distinct() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }

    #[test]
    fn merge_mode_parses_known_strings() {
        assert_eq!(MergeMode::parse("append").unwrap(), MergeMode::Append);
        assert_eq!(MergeMode::parse("replace").unwrap(), MergeMode::Replace);
        assert!(MergeMode::parse("bogus").is_err());
    }
}
