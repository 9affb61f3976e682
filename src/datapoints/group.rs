//! Data point groups
//!
//! A group is one row of a query result: a metric name, a tag set, the
//! group-by provenance, and a forward-only sequence of points. Groups are
//! single pass. Once drained they cannot be restarted, and every group must
//! be closed so that any temp storage behind it is released.

use crate::datapoints::types::{DataPoint, GroupByResult, TagSet};
use std::collections::VecDeque;

/// One row of a query result
pub trait DataPointGroup: Iterator<Item = DataPoint> + Send {
    /// Metric name
    fn name(&self) -> &str;

    /// Tags identifying this row
    fn tags(&self) -> &TagSet;

    /// Group-by buckets that produced this row
    fn group_by_results(&self) -> &[GroupByResult];

    fn add_group_by_result(&mut self, result: GroupByResult);

    /// Release file handles and temp storage. Safe to call more than once.
    fn close(&mut self);
}

/// In-memory group
///
/// Used by store collaborators that build rows directly and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRow {
    name: String,
    tags: TagSet,
    group_by_results: Vec<GroupByResult>,
    points: VecDeque<DataPoint>,
}

impl MemoryRow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder method: add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    /// Builder method: replace the tag set
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Builder method: append points
    pub fn points(mut self, points: impl IntoIterator<Item = DataPoint>) -> Self {
        self.points.extend(points);
        self
    }

    pub fn push(&mut self, point: DataPoint) {
        self.points.push_back(point);
    }

    /// Points not yet consumed
    pub fn remaining(&self) -> usize {
        self.points.len()
    }
}

impl Iterator for MemoryRow {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        self.points.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.points.len(), Some(self.points.len()))
    }
}

impl DataPointGroup for MemoryRow {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &TagSet {
        &self.tags
    }

    fn group_by_results(&self) -> &[GroupByResult] {
        &self.group_by_results
    }

    fn add_group_by_result(&mut self, result: GroupByResult) {
        self.group_by_results.push(result);
    }

    fn close(&mut self) {
        self.points.clear();
    }
}
