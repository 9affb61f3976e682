//! K-way merge of sorted sequences
//!
//! Keeps one head element per source in a binary heap of source indices,
//! ordered by the caller's comparator and then by source index. The index
//! tie-break makes the output stable: on equal keys the earlier source wins,
//! in both ascending and descending order.

use crate::datapoints::{DataPoint, DataPointGroup, GroupByResult, TagSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Output order of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            other => Err(format!("unknown order: {}", other)),
        }
    }
}

/// Lazy merge of N individually sorted iterators
///
/// Every source must already be sorted in the merge's `order`.
pub struct SortedMerge<T, I, F>
where
    I: Iterator<Item = T>,
    F: Fn(&T, &T) -> Ordering,
{
    sources: Vec<I>,
    heads: Vec<Option<T>>,
    /// Source indices with a pending head, heap-ordered
    heap: Vec<usize>,
    order: Order,
    compare: F,
}

impl<T, I, F> SortedMerge<T, I, F>
where
    I: Iterator<Item = T>,
    F: Fn(&T, &T) -> Ordering,
{
    /// Build a merge, pulling exactly one element from each source
    pub fn new(order: Order, compare: F, sources: Vec<I>) -> Self {
        let mut merge = Self {
            heads: Vec::with_capacity(sources.len()),
            heap: Vec::with_capacity(sources.len()),
            sources,
            order,
            compare,
        };

        for idx in 0..merge.sources.len() {
            let head = merge.sources[idx].next();
            let present = head.is_some();
            merge.heads.push(head);
            if present {
                merge.push(idx);
            }
        }
        merge
    }

    pub fn has_next(&self) -> bool {
        !self.heap.is_empty()
    }

    /// The element the next call to `next` will return
    pub fn peek(&self) -> Option<&T> {
        self.heap.first().and_then(|&idx| self.heads[idx].as_ref())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sources_mut(&mut self) -> &mut [I] {
        &mut self.sources
    }

    /// Whether source `a`'s head must be emitted before source `b`'s
    fn before(&self, a: usize, b: usize) -> bool {
        let ordering = match (&self.heads[a], &self.heads[b]) {
            (Some(x), Some(y)) => {
                let ord = (self.compare)(x, y);
                match self.order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            }
            _ => Ordering::Equal,
        };
        ordering.then(a.cmp(&b)) == Ordering::Less
    }

    fn push(&mut self, idx: usize) {
        self.heap.push(idx);
        self.sift_up(self.heap.len() - 1);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.before(self.heap[pos], self.heap[parent]) {
                self.heap.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut best = pos;
            if left < len && self.before(self.heap[left], self.heap[best]) {
                best = left;
            }
            if right < len && self.before(self.heap[right], self.heap[best]) {
                best = right;
            }
            if best == pos {
                break;
            }
            self.heap.swap(pos, best);
            pos = best;
        }
    }
}

impl<T, I, F> Iterator for SortedMerge<T, I, F>
where
    I: Iterator<Item = T>,
    F: Fn(&T, &T) -> Ordering,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let &idx = self.heap.first()?;
        let item = self.heads[idx].take();

        // Advance the winning source one element
        self.heads[idx] = self.sources[idx].next();
        if self.heads[idx].is_some() {
            self.sift_down(0);
        } else {
            let last = self.heap.len() - 1;
            self.heap.swap(0, last);
            self.heap.pop();
            if !self.heap.is_empty() {
                self.sift_down(0);
            }
        }
        item
    }
}

/// Merge sorted sequences into one sorted sequence
pub fn merge<T, I, F>(order: Order, compare: F, sequences: Vec<I>) -> SortedMerge<T, I, F>
where
    I: Iterator<Item = T>,
    F: Fn(&T, &T) -> Ordering,
{
    SortedMerge::new(order, compare, sequences)
}

fn by_timestamp(a: &DataPoint, b: &DataPoint) -> Ordering {
    a.timestamp().cmp(&b.timestamp())
}

type PointOrdering = fn(&DataPoint, &DataPoint) -> Ordering;
type PointMerge = SortedMerge<DataPoint, Box<dyn DataPointGroup>, PointOrdering>;

/// One time-ordered group built from several groups
///
/// Source groups must yield points in the merge order.
///
/// Tags and group-by results are the union of the sources'. Closing the
/// merged row closes every source.
pub struct MergedRow {
    name: String,
    tags: TagSet,
    group_by_results: Vec<GroupByResult>,
    merge: PointMerge,
    closed: bool,
}

impl MergedRow {
    pub fn new(order: Order, groups: Vec<Box<dyn DataPointGroup>>) -> Self {
        let name = groups
            .first()
            .map(|g| g.name().to_string())
            .unwrap_or_default();

        let mut tags = TagSet::new();
        let mut group_by_results: Vec<GroupByResult> = Vec::new();
        for group in &groups {
            tags.merge(group.tags());
            for result in group.group_by_results() {
                if !group_by_results.contains(result) {
                    group_by_results.push(result.clone());
                }
            }
        }

        Self {
            name,
            tags,
            group_by_results,
            merge: SortedMerge::new(order, by_timestamp as PointOrdering, groups),
            closed: false,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.closed && self.merge.has_next()
    }

    /// Number of merged source groups
    pub fn source_count(&self) -> usize {
        self.merge.source_count()
    }
}

impl Iterator for MergedRow {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        if self.closed {
            return None;
        }
        self.merge.next()
    }
}

impl DataPointGroup for MergedRow {
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
        if self.closed {
            return;
        }
        self.closed = true;
        for source in self.merge.sources_mut() {
            source.close();
        }
    }
}

impl Drop for MergedRow {
    fn drop(&mut self) {
        self.close();
    }
}
