//! Core data types for the Strata query engine
//!
//! This module defines the value model that flows through every stage of a
//! query:
//! - `DataPoint`: a timestamp plus exactly one typed payload
//! - `DataPointValue`: the payload variants
//! - `TagSet`: the tag multimap attached to a row
//! - `GroupByResult`: provenance of the group-by bucket that produced a row

use crate::datapoints::error::{ValueError, ValueResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Data-store type tag for 64-bit integers
pub const LONG_TYPE: &str = "kairos_long";
/// Data-store type tag for 64-bit floats
pub const DOUBLE_TYPE: &str = "kairos_double";
/// Data-store type tag for UTF-8 strings
pub const STRING_TYPE: &str = "kairos_string";
/// Data-store type tag for the legacy long-or-double union
pub const LEGACY_TYPE: &str = "kairos_legacy";
/// Data-store type tag for explicit gap markers
pub const NULL_TYPE: &str = "kairos_null";
/// Data-store type tag for complex numbers
pub const COMPLEX_TYPE: &str = "kairos_complex";
/// Data-store type tag for fractions
pub const FRACTION_TYPE: &str = "kairos_fraction";

/// Two-variant numeric union kept for compatibility with older data files
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LegacyValue {
    Long(i64),
    Double(f64),
}

/// A complex number payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex {
    pub real: f64,
    pub imaginary: f64,
}

/// A fraction payload; the denominator is never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    numerator: i64,
    denominator: i64,
}

impl Fraction {
    /// Create a fraction, rejecting a zero denominator
    pub fn new(numerator: i64, denominator: i64) -> ValueResult<Self> {
        if denominator == 0 {
            return Err(ValueError::ZeroDenominator);
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }

    /// The fraction's value as a float
    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// The typed payload of a data point
#[derive(Debug, Clone, PartialEq)]
pub enum DataPointValue {
    Long(i64),
    Double(f64),
    String(String),
    Legacy(LegacyValue),
    /// Explicit gap; aggregators must not read past it
    Null,
    Complex(Complex),
    Fraction(Fraction),
}

impl DataPointValue {
    /// Stable tag used as the on-disk and registry key
    pub fn data_store_type(&self) -> &'static str {
        match self {
            DataPointValue::Long(_) => LONG_TYPE,
            DataPointValue::Double(_) => DOUBLE_TYPE,
            DataPointValue::String(_) => STRING_TYPE,
            DataPointValue::Legacy(_) => LEGACY_TYPE,
            DataPointValue::Null => NULL_TYPE,
            DataPointValue::Complex(_) => COMPLEX_TYPE,
            DataPointValue::Fraction(_) => FRACTION_TYPE,
        }
    }

    /// Label reported to API clients
    pub fn api_type(&self) -> &'static str {
        match self {
            DataPointValue::Long(_) | DataPointValue::Legacy(LegacyValue::Long(_)) => "long",
            DataPointValue::Double(_) | DataPointValue::Legacy(LegacyValue::Double(_)) => "double",
            DataPointValue::String(_) => "string",
            DataPointValue::Null => "null",
            DataPointValue::Complex(_) => "complex",
            DataPointValue::Fraction(_) => "fraction",
        }
    }
}

/// A single time-series value
///
/// Immutable once built. Numeric access follows a check-first contract:
/// call [`is_long`](Self::is_long) / [`is_double`](Self::is_double) before
/// [`long_value`](Self::long_value) / [`double_value`](Self::double_value).
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Unix timestamp in milliseconds
    timestamp: i64,
    value: DataPointValue,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: DataPointValue) -> Self {
        Self { timestamp, value }
    }

    pub fn long(timestamp: i64, value: i64) -> Self {
        Self::new(timestamp, DataPointValue::Long(value))
    }

    pub fn double(timestamp: i64, value: f64) -> Self {
        Self::new(timestamp, DataPointValue::Double(value))
    }

    pub fn string(timestamp: i64, value: impl Into<String>) -> Self {
        Self::new(timestamp, DataPointValue::String(value.into()))
    }

    pub fn legacy_long(timestamp: i64, value: i64) -> Self {
        Self::new(timestamp, DataPointValue::Legacy(LegacyValue::Long(value)))
    }

    pub fn legacy_double(timestamp: i64, value: f64) -> Self {
        Self::new(timestamp, DataPointValue::Legacy(LegacyValue::Double(value)))
    }

    pub fn null(timestamp: i64) -> Self {
        Self::new(timestamp, DataPointValue::Null)
    }

    pub fn complex(timestamp: i64, real: f64, imaginary: f64) -> Self {
        Self::new(timestamp, DataPointValue::Complex(Complex { real, imaginary }))
    }

    /// Create a fraction data point, rejecting a zero denominator
    pub fn fraction(timestamp: i64, numerator: i64, denominator: i64) -> ValueResult<Self> {
        let fraction = Fraction::new(numerator, denominator)?;
        Ok(Self::new(timestamp, DataPointValue::Fraction(fraction)))
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn value(&self) -> &DataPointValue {
        &self.value
    }

    pub fn into_value(self) -> DataPointValue {
        self.value
    }

    pub fn data_store_type(&self) -> &'static str {
        self.value.data_store_type()
    }

    pub fn api_type(&self) -> &'static str {
        self.value.api_type()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, DataPointValue::Null)
    }

    pub fn is_long(&self) -> bool {
        matches!(
            self.value,
            DataPointValue::Long(_) | DataPointValue::Legacy(LegacyValue::Long(_))
        )
    }

    pub fn is_double(&self) -> bool {
        matches!(
            self.value,
            DataPointValue::Double(_)
                | DataPointValue::Legacy(LegacyValue::Double(_))
                | DataPointValue::Fraction(_)
        )
    }

    /// Integer value of a numeric point; doubles are truncated
    ///
    /// # Panics
    /// Panics on a `Null` point. A gap marker reaching an aggregator means
    /// stages were chained incorrectly, and a default would corrupt results.
    pub fn long_value(&self) -> ValueResult<i64> {
        match &self.value {
            DataPointValue::Long(v) | DataPointValue::Legacy(LegacyValue::Long(v)) => Ok(*v),
            DataPointValue::Double(v) | DataPointValue::Legacy(LegacyValue::Double(v)) => {
                Ok(*v as i64)
            }
            DataPointValue::Fraction(f) => Ok(f.numerator.wrapping_div(f.denominator)),
            DataPointValue::Null => panic!(
                "long_value() called on a null data point at {}",
                self.timestamp
            ),
            other => Err(ValueError::NotNumeric {
                api_type: other.api_type(),
            }),
        }
    }

    /// Float value of a numeric point; longs are widened
    ///
    /// # Panics
    /// Panics on a `Null` point, see [`long_value`](Self::long_value).
    pub fn double_value(&self) -> ValueResult<f64> {
        match &self.value {
            DataPointValue::Double(v) | DataPointValue::Legacy(LegacyValue::Double(v)) => Ok(*v),
            DataPointValue::Long(v) | DataPointValue::Legacy(LegacyValue::Long(v)) => {
                Ok(*v as f64)
            }
            DataPointValue::Fraction(f) => Ok(f.to_f64()),
            DataPointValue::Null => panic!(
                "double_value() called on a null data point at {}",
                self.timestamp
            ),
            other => Err(ValueError::NotNumeric {
                api_type: other.api_type(),
            }),
        }
    }

    /// Render the payload for an API response
    pub fn json_value(&self) -> Value {
        match &self.value {
            DataPointValue::Long(v) | DataPointValue::Legacy(LegacyValue::Long(v)) => json!(v),
            DataPointValue::Double(v) | DataPointValue::Legacy(LegacyValue::Double(v)) => {
                Value::from(*v)
            }
            DataPointValue::String(s) => json!(s),
            DataPointValue::Null => Value::Null,
            DataPointValue::Complex(c) => json!({ "real": c.real, "imaginary": c.imaginary }),
            DataPointValue::Fraction(f) => {
                json!({ "numerator": f.numerator, "denominator": f.denominator })
            }
        }
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}={}", self.timestamp, self.api_type(), self.json_value())
    }
}

/// One representative value per tag name, computed once per row
pub type TagContext = BTreeMap<String, String>;

/// Tag multimap: each key maps to one or more values
///
/// A row produced by merging several series carries every original value
/// of a tag. Ordering is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet(BTreeMap<String, BTreeSet<String>>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a tag value
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add a value under `key`, keeping any existing values
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().insert(value.into());
    }

    /// All values recorded for `key`
    pub fn get(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.0.get(key)
    }

    /// First (lowest) value recorded for `key`
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|values| values.iter().next())
            .map(String::as_str)
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.get(key).is_some_and(|values| values.contains(value))
    }

    /// Union another tag set into this one
    pub fn merge(&mut self, other: &TagSet) {
        for (key, values) in &other.0 {
            self.0
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    /// Collapse to one representative value per tag name
    pub fn tag_context(&self) -> TagContext {
        self.0
            .iter()
            .filter_map(|(key, values)| {
                values
                    .iter()
                    .next()
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for TagSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = TagSet::new();
        for (key, value) in iter {
            tags.insert(key, value);
        }
        tags
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|(key, values)| {
                let values: Vec<&str> = values.iter().map(String::as_str).collect();
                format!("{}={}", key, values.join("|"))
            })
            .collect();
        write!(f, "{{{}}}", rendered.join(", "))
    }
}

/// Provenance of the group-by bucket that produced a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupByResult {
    /// Group-by kind, e.g. "time", "value" or "tag"
    pub kind: String,
    /// Kind-specific description of the bucket
    pub body: Value,
}

impl GroupByResult {
    pub fn new(kind: impl Into<String>, body: Value) -> Self {
        Self {
            kind: kind.into(),
            body,
        }
    }

    /// Render as a JSON object carrying the kind under `name`
    pub fn to_json(&self) -> Value {
        match &self.body {
            Value::Object(fields) => {
                let mut fields = fields.clone();
                fields.insert("name".to_string(), json!(self.kind));
                Value::Object(fields)
            }
            other => json!({ "name": self.kind, "value": other }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_and_labels() {
        assert_eq!(DataPoint::long(1, 5).data_store_type(), LONG_TYPE);
        assert_eq!(DataPoint::double(1, 5.0).api_type(), "double");
        assert_eq!(DataPoint::legacy_long(1, 5).api_type(), "long");
        assert_eq!(DataPoint::legacy_double(1, 5.0).api_type(), "double");
        assert_eq!(DataPoint::legacy_double(1, 5.0).data_store_type(), LEGACY_TYPE);
        assert_eq!(DataPoint::null(1).data_store_type(), NULL_TYPE);
        assert_eq!(DataPoint::complex(1, 1.0, 2.0).api_type(), "complex");
    }

    #[test]
    fn test_numeric_access() {
        let point = DataPoint::long(1000, 42);
        assert!(point.is_long());
        assert!(!point.is_double());
        assert_eq!(point.long_value(), Ok(42));
        assert_eq!(point.double_value(), Ok(42.0));

        let point = DataPoint::double(1000, 2.75);
        assert!(point.is_double());
        assert_eq!(point.long_value(), Ok(2));

        let point = DataPoint::fraction(1000, 3, 4).unwrap();
        assert!(point.is_double());
        assert_eq!(point.double_value(), Ok(0.75));
    }

    #[test]
    fn test_non_numeric_access_errors() {
        let point = DataPoint::string(1000, "up");
        assert!(!point.is_long());
        assert!(!point.is_double());
        assert_eq!(
            point.long_value(),
            Err(ValueError::NotNumeric { api_type: "string" })
        );

        let point = DataPoint::complex(1000, 1.0, -1.0);
        assert!(point.double_value().is_err());
    }

    #[test]
    #[should_panic(expected = "null data point")]
    fn test_null_numeric_access_panics() {
        let point = DataPoint::null(1000);
        let _ = point.double_value();
    }

    #[test]
    fn test_fraction_rejects_zero_denominator() {
        assert_eq!(
            DataPoint::fraction(1000, 1, 0),
            Err(ValueError::ZeroDenominator)
        );
        assert!(Fraction::new(1, -3).is_ok());
    }

    #[test]
    fn test_json_value() {
        assert_eq!(DataPoint::long(1, 7).json_value(), json!(7));
        assert_eq!(DataPoint::null(1).json_value(), Value::Null);
        assert_eq!(
            DataPoint::complex(1, 1.5, -2.0).json_value(),
            json!({ "real": 1.5, "imaginary": -2.0 })
        );
        assert_eq!(
            DataPoint::fraction(1, 1, 3).unwrap().json_value(),
            json!({ "numerator": 1, "denominator": 3 })
        );
    }

    #[test]
    fn test_tag_set_multimap() {
        let mut tags = TagSet::new().with("host", "b").with("host", "a");
        tags.insert("dc", "east");

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("host").map(|v| v.len()), Some(2));
        assert_eq!(tags.first("host"), Some("a"));
        assert!(tags.contains("dc", "east"));

        let context = tags.tag_context();
        assert_eq!(context.get("host").map(String::as_str), Some("a"));
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn test_tag_set_merge() {
        let mut left: TagSet = [("host", "a")].into_iter().collect();
        let right: TagSet = [("host", "b"), ("dc", "west")].into_iter().collect();
        left.merge(&right);

        assert!(left.contains("host", "a"));
        assert!(left.contains("host", "b"));
        assert!(left.contains("dc", "west"));
        assert_eq!(left.to_string(), "{dc=west, host=a|b}");
    }

    #[test]
    fn test_group_by_result_json() {
        let result = GroupByResult::new("value", json!({ "range_size": 10, "group": 2 }));
        let rendered = result.to_json();
        assert_eq!(rendered["name"], json!("value"));
        assert_eq!(rendered["group"], json!(2));

        let result = GroupByResult::new("tag", json!("host"));
        assert_eq!(result.to_json(), json!({ "name": "tag", "value": "host" }));
    }
}
