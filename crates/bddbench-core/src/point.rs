use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::line_protocol;

/// A single field value in line protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl FieldValue {
    /// Numeric view of the value, used by the in-memory target for aggregation.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Boolean(_) | Self::String(_) => None,
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
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        Self::from(value as u64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}i"),
            Self::Float(v) if v.is_finite() => write!(f, "{v}"),
            // Line protocol has no NaN/inf literal.
            Self::Float(_) => write!(f, "0"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{}\"", line_protocol::escape_string_field(v)),
        }
    }
}

/// One timestamped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Timestamp in the precision of the owning workload.
    pub timestamp: i64,
}

impl Point {
    #[must_use]
    pub fn new(measurement: impl Into<String>, timestamp: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Renders the point as one line of line protocol (no trailing newline).
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        line_protocol::encode_point(self)
    }
}

/// Ordered points sent in one write call.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Worker-local batch index.
    pub index: u64,
    pub worker_index: usize,
    pub points: Vec<Point>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Newline-separated line protocol body for the write endpoint.
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        line_protocol::encode_points(&self.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_values_render_with_line_protocol_suffixes() {
        assert_eq!(FieldValue::Integer(7).to_string(), "7i");
        assert_eq!(FieldValue::Float(1.5).to_string(), "1.5");
        assert_eq!(FieldValue::Float(f64::NAN).to_string(), "0");
        assert_eq!(FieldValue::Boolean(true).to_string(), "true");
        assert_eq!(FieldValue::from("a\"b").to_string(), "\"a\\\"b\"");
    }

    #[test]
    fn large_unsigned_values_saturate() {
        assert_eq!(FieldValue::from(u64::MAX), FieldValue::Integer(i64::MAX));
    }
}
