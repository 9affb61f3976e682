//! Row readers over a finalized cache

use crate::datapoints::{
    varint, CodecRegistry, DataPoint, DataPointGroup, GroupByResult, TagSet,
};
use crate::storage::cache::{RowCache, RowMeta};
use crate::storage::error::{StorageError, StorageResult};
use memmap2::Mmap;
use std::sync::Arc;
use tracing::warn;

/// Forward-only reader for one row of a [`RowCache`]
///
/// A decode failure (truncated entry, unknown type id, unknown type tag)
/// marks the row corrupt: it is logged once and the reader yields nothing
/// further. Other rows of the same cache are unaffected.
pub struct RowReader {
    name: Arc<str>,
    meta: RowMeta,
    mmap: Option<Arc<Mmap>>,
    registry: Arc<CodecRegistry>,
    type_tags: Arc<[String]>,
    position: usize,
    end: usize,
    remaining: u64,
    prev_timestamp: i64,
    corrupt: bool,
}

impl RowReader {
    pub(crate) fn new(
        name: Arc<str>,
        meta: RowMeta,
        mmap: Option<Arc<Mmap>>,
        registry: Arc<CodecRegistry>,
        type_tags: Arc<[String]>,
    ) -> Self {
        let mapped = mmap.as_ref().map_or(0, |m| m.len());
        let end = usize::try_from(meta.offset.saturating_add(meta.length))
            .unwrap_or(usize::MAX)
            .min(mapped);
        let position = usize::try_from(meta.offset).unwrap_or(usize::MAX).min(end);
        let remaining = meta.point_count;

        Self {
            name,
            meta,
            mmap,
            registry,
            type_tags,
            position,
            end,
            remaining,
            prev_timestamp: 0,
            corrupt: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &TagSet {
        &self.meta.tags
    }

    pub fn meta(&self) -> &RowMeta {
        &self.meta
    }

    /// Points not yet read
    pub fn remaining(&self) -> u64 {
        if self.corrupt {
            0
        } else {
            self.remaining
        }
    }

    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    fn read_entry(&mut self) -> StorageResult<DataPoint> {
        let mut source: &[u8] = match &self.mmap {
            Some(mmap) => &mmap[self.position..self.end],
            None => &[],
        };

        let delta = varint::read_signed(&mut source)?;
        let type_id = varint::read_unsigned(&mut source)?;
        let type_tag = usize::try_from(type_id)
            .ok()
            .and_then(|id| self.type_tags.get(id))
            .ok_or_else(|| {
                StorageError::Corruption(format!("type id {} not in cache type table", type_id))
            })?;

        let timestamp = self.prev_timestamp.wrapping_add(delta);
        let point = self.registry.decode(type_tag, timestamp, &mut source)?;

        self.position = self.end - source.len();
        self.prev_timestamp = timestamp;
        Ok(point)
    }
}

impl Iterator for RowReader {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        if self.corrupt || self.remaining == 0 {
            return None;
        }

        match self.read_entry() {
            Ok(point) => {
                self.remaining -= 1;
                Some(point)
            }
            Err(e) => {
                warn!(
                    row = %self.name,
                    tags = %self.meta.tags,
                    remaining = self.remaining,
                    error = %e,
                    "Corrupt cache row, skipping remaining points"
                );
                self.corrupt = true;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, usize::try_from(self.remaining()).ok())
    }
}

impl std::fmt::Debug for RowReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReader")
            .field("name", &self.name)
            .field("tags", &self.meta.tags)
            .field("remaining", &self.remaining)
            .field("corrupt", &self.corrupt)
            .finish()
    }
}

/// A [`DataPointGroup`] backed by a cache row
///
/// When it owns its cache (group partitions), closing the row deletes the
/// partition file.
pub struct CachedRow {
    reader: RowReader,
    group_by_results: Vec<GroupByResult>,
    owned_cache: Option<RowCache>,
    closed: bool,
}

impl CachedRow {
    pub fn new(reader: RowReader) -> Self {
        Self {
            reader,
            group_by_results: Vec::new(),
            owned_cache: None,
            closed: false,
        }
    }

    /// Wrap a reader together with the cache it reads from
    pub fn owning(reader: RowReader, cache: RowCache) -> Self {
        Self {
            reader,
            group_by_results: Vec::new(),
            owned_cache: Some(cache),
            closed: false,
        }
    }

    pub fn reader(&self) -> &RowReader {
        &self.reader
    }
}

impl Iterator for CachedRow {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        if self.closed {
            return None;
        }
        self.reader.next()
    }
}

impl DataPointGroup for CachedRow {
    fn name(&self) -> &str {
        self.reader.name()
    }

    fn tags(&self) -> &TagSet {
        self.reader.tags()
    }

    fn group_by_results(&self) -> &[GroupByResult] {
        &self.group_by_results
    }

    fn add_group_by_result(&mut self, result: GroupByResult) {
        self.group_by_results.push(result);
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some(mut cache) = self.owned_cache.take() {
            if let Err(e) = cache.close() {
                warn!(path = %cache.path().display(), error = %e, "Failed to delete partition cache");
            }
        }
    }
}

impl Drop for CachedRow {
    fn drop(&mut self) {
        self.close();
    }
}
