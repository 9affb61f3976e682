//! Group partitioning
//!
//! Splits input rows into sub-rows keyed by the tuple of group ids that the
//! configured strategies assign to each point. Partitions are shared by all
//! inputs of one call: a key seen in several inputs yields one partition
//! whose tag set is the union of theirs. Every partition is spilled through
//! its own [`RowCache`] and comes back as a [`CachedRow`] that owns (and on
//! close deletes) that cache.

use crate::datapoints::{
    CodecRegistry, DataPoint, DataPointGroup, GroupByResult, TagContext,
};
use crate::storage::{
    CachedRow, RowCache, StorageError, StorageResult, DEFAULT_WRITE_BUFFER_ENTRIES,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Pluggable group-by
pub trait GroupByStrategy: Send + Sync {
    /// Bucket id for a point; negative ids mark points the strategy does
    /// not apply to and form their own bucket
    fn group_id(&self, point: &DataPoint, tags: &TagContext) -> i32;

    /// Describe bucket `id` for the rows it produces
    fn describe(&self, id: i32) -> GroupByResult;
}

/// One group id per strategy, in strategy order
pub type GroupKey = Vec<i32>;

/// Partition under construction
struct Partition {
    cache: RowCache,
    results: Vec<GroupByResult>,
    /// Last input that wrote a point here
    last_input: usize,
}

/// Partitions rows by group key
#[derive(Debug, Clone)]
pub struct Grouper {
    temp_dir: PathBuf,
    registry: Arc<CodecRegistry>,
    buffer_entries: usize,
}

impl Grouper {
    pub fn new(temp_dir: impl Into<PathBuf>, registry: Arc<CodecRegistry>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            registry,
            buffer_entries: DEFAULT_WRITE_BUFFER_ENTRIES,
        }
    }

    /// Builder method: write buffer size for partition caches
    pub fn with_buffer_entries(mut self, entries: usize) -> Self {
        self.buffer_entries = entries;
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Partition every input by the strategies' group keys
    ///
    /// With no strategies the inputs are returned unchanged. Otherwise every
    /// input is drained and closed in turn, and one row per distinct key is
    /// emitted in the order keys were first seen across all inputs. Each
    /// row carries the strategies' descriptions of its key followed by the
    /// group-by results of the inputs that contributed to it.
    pub fn group(
        &self,
        strategies: &[Arc<dyn GroupByStrategy>],
        inputs: Vec<Box<dyn DataPointGroup>>,
    ) -> StorageResult<Vec<Box<dyn DataPointGroup>>> {
        if strategies.is_empty() {
            return Ok(inputs);
        }

        let mut slots: HashMap<GroupKey, usize> = HashMap::new();
        let mut partitions: Vec<Partition> = Vec::new();

        for (index, mut input) in inputs.into_iter().enumerate() {
            let drained = self.drain_input(
                strategies,
                index,
                input.as_mut(),
                &mut slots,
                &mut partitions,
            );
            input.close();
            drained?;
        }

        let mut rows: Vec<Box<dyn DataPointGroup>> = Vec::with_capacity(partitions.len());
        for mut partition in partitions {
            partition.cache.finish_row()?;
            let reader = partition
                .cache
                .get_rows()?
                .into_iter()
                .next()
                .ok_or_else(|| StorageError::InvalidState("partition has no row".into()))?;

            let mut row = CachedRow::owning(reader, partition.cache);
            for result in partition.results {
                row.add_group_by_result(result);
            }
            rows.push(Box::new(row));
        }
        Ok(rows)
    }

    fn drain_input(
        &self,
        strategies: &[Arc<dyn GroupByStrategy>],
        index: usize,
        input: &mut dyn DataPointGroup,
        slots: &mut HashMap<GroupKey, usize>,
        partitions: &mut Vec<Partition>,
    ) -> StorageResult<()> {
        let tag_context = input.tags().tag_context();

        while let Some(point) = input.next() {
            let key: GroupKey = strategies
                .iter()
                .map(|s| s.group_id(&point, &tag_context))
                .collect();

            let slot = match slots.get(&key) {
                Some(&slot) => slot,
                None => {
                    let mut cache = self.create_partition_cache(input.name())?;
                    cache.begin_row(point.data_store_type(), input.tags().clone())?;
                    debug!(metric = %input.name(), key = ?key, path = %cache.path().display(), "Created group partition");

                    let results = strategies
                        .iter()
                        .zip(&key)
                        .map(|(strategy, id)| strategy.describe(*id))
                        .collect();
                    partitions.push(Partition {
                        cache,
                        results,
                        last_input: index,
                    });
                    slots.insert(key, partitions.len() - 1);
                    partitions.len() - 1
                }
            };

            let partition = &mut partitions[slot];
            if partition.last_input != index {
                partition.cache.merge_row_tags(input.tags())?;
                partition.last_input = index;
            }
            partition.cache.append(&point)?;
        }

        for partition in partitions.iter_mut().filter(|p| p.last_input == index) {
            for result in input.group_by_results() {
                if !partition.results.contains(result) {
                    partition.results.push(result.clone());
                }
            }
        }
        Ok(())
    }

    fn create_partition_cache(&self, name: &str) -> StorageResult<RowCache> {
        let path = self
            .temp_dir
            .join(format!("group_{}.cache", Uuid::new_v4()));
        Ok(RowCache::create(name, path, Arc::clone(&self.registry))?
            .with_buffer_entries(self.buffer_entries))
    }
}
