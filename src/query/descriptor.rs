//! Query descriptors and hashing
//!
//! A `QueryDescriptor` is the normalized form of a query. Tags and other
//! collections are ordered, so two logically identical queries serialize to
//! the same JSON and therefore hash to the same `QueryHash`.

use crate::datapoints::TagSet;
use crate::query::error::{QueryError, QueryResult};
use crate::query::merge::Order;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;

/// Domain prefix mixed into every query hash
const QUERY_HASH_DOMAIN: &[u8] = b"strata-query:v1";

/// Digest bytes kept in a `QueryHash`
const QUERY_HASH_BYTES: usize = 16;

/// Time range for queries (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in milliseconds
    pub start: i64,
    /// End timestamp (exclusive), in milliseconds
    pub end: i64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start >= end`
    pub fn new(start: i64, end: i64) -> QueryResult<Self> {
        Self::try_new(start, end).ok_or_else(|| {
            QueryError::InvalidTimeRange(format!(
                "start ({}) must be less than end ({})",
                start, end
            ))
        })
    }

    /// Create a time range, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if this range overlaps with another
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Get the duration in milliseconds
    pub fn duration_millis(&self) -> i64 {
        self.end - self.start
    }
}

/// Stable hash of a normalized query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryHash(String);

impl QueryHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for QueryHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for QueryHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Normalized description of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub metric: String,
    pub time_range: TimeRange,
    /// Tag filter: a series matches if it has any listed value for every key
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub aggregators: Vec<String>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: Order,
}

impl QueryDescriptor {
    pub fn new(metric: impl Into<String>, time_range: TimeRange) -> Self {
        Self {
            metric: metric.into(),
            time_range,
            tags: TagSet::new(),
            aggregators: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            order: Order::Asc,
        }
    }

    /// Builder method: add a tag filter value
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    /// Builder method: add an aggregator name
    pub fn aggregator(mut self, name: impl Into<String>) -> Self {
        self.aggregators.push(name.into());
        self
    }

    /// Builder method: add a group-by name
    pub fn group_by(mut self, name: impl Into<String>) -> Self {
        self.group_by.push(name.into());
        self
    }

    /// Builder method: set the result limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder method: set the output order
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Fail fast on queries that cannot be executed
    pub fn validate(&self) -> QueryResult<()> {
        if self.metric.trim().is_empty() {
            return Err(QueryError::InvalidQuery("metric name is empty".into()));
        }
        if self.time_range.start >= self.time_range.end {
            return Err(QueryError::InvalidTimeRange(format!(
                "start ({}) must be less than end ({})",
                self.time_range.start, self.time_range.end
            )));
        }
        if self.limit == Some(0) {
            return Err(QueryError::InvalidQuery("limit must be positive".into()));
        }
        Ok(())
    }

    /// Hash of the canonical JSON rendering
    ///
    /// The first 128 bits of a SHA-256 digest, hex encoded.
    pub fn hash(&self) -> QueryHash {
        let bytes = match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize query for hashing");
                self.metric.as_bytes().to_vec()
            }
        };

        let mut hasher = Sha256::new();
        hasher.update(QUERY_HASH_DOMAIN);
        hasher.update(&bytes);
        let digest = hasher.finalize();

        let mut out = String::with_capacity(QUERY_HASH_BYTES * 2);
        for byte in &digest[..QUERY_HASH_BYTES] {
            let _ = write!(out, "{byte:02x}");
        }
        QueryHash(out)
    }

    /// Whether a series with these tags is selected by the tag filter
    pub fn matches_tags(&self, series: &TagSet) -> bool {
        self.tags.iter().all(|(key, wanted)| {
            series
                .get(key)
                .map_or(false, |values| values.iter().any(|v| wanted.contains(v)))
        })
    }
}
