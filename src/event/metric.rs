use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single field value carried by a [`Metric`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Unsigned(u64),
    Boolean(bool),
    String(String),
}

impl FieldValue {
    /// Returns `true` for floating point values that have no JSON representation.
    pub fn is_non_finite(&self) -> bool {
        matches!(self, Self::Float(value) if !value.is_finite())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => write!(fmt, "{value}"),
            Self::Integer(value) => write!(fmt, "{value}"),
            Self::Unsigned(value) => write!(fmt, "{value}"),
            Self::Boolean(value) => write!(fmt, "{value}"),
            Self::String(value) => write!(fmt, "{value:?}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A named, timestamped set of field values and tags.
///
/// Metrics are built once upstream and are read-only from then on; the
/// builder methods consume `self`.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    fields: BTreeMap<String, FieldValue>,
    tags: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            tags: BTreeMap::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub const fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
