//! Data carried through one harvest iteration: the pagination cursor, decoded
//! alert batches, and the flattened events handed to the publisher.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Opaque continuation token. Everything before it has already been fetched.
///
/// The empty cursor means "start of retained history".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Cursor {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Threat metadata keyed by threat key inside a single batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreatInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub severity: i64,
    #[serde(default)]
    pub policy: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Wisdom {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub flags: Option<Vec<String>>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

/// One alert as reported by the detection API.
///
/// `fields` is flat and varies by `kind`; empty-string values carry no data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alert {
    #[serde(rename = "eventType")]
    pub kind: String,
    #[serde(rename = "event", default, deserialize_with = "null_as_default")]
    pub fields: Map<String, Value>,
    #[serde(rename = "threats", default, deserialize_with = "null_as_default")]
    pub threat_keys: Vec<String>,
    #[serde(default)]
    pub wisdom: Option<Wisdom>,
}

/// `null` decodes like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Result of one successful fetch.
#[derive(Debug, Clone, Default)]
pub struct AlertBatch {
    /// Authoritative cursor for the next fetch, whether or not `has_more` is set.
    pub cursor: Cursor,
    pub has_more: bool,
    pub alerts: Vec<Alert>,
    pub threat_catalog: HashMap<String, ThreatInfo>,
    /// Alerts dropped while decoding because their payload was malformed.
    pub skipped: usize,
}

/// Flattened, schema-stable record produced per (alert, threat) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub timestamp: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl NormalizedEvent {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl Serialize for NormalizedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry(
            "@timestamp",
            &self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
