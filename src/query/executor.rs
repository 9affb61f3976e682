//! Query Executor
//!
//! Runs one query end to end:
//! 1. Admission: wait for a permit keyed by the query hash
//! 2. Scan: the store collaborator fills a fresh row cache
//! 3. Partition: group-by strategies split the rows
//! 4. Output: groups handed back together with the permit and the cache
//!
//! # Execution Pipeline
//!
//! ```text
//! Query → hash → wait_for_slot → [blocking] scan → rows → group → QueryOutput
//!                                        ↑ kill checks ↑
//! ```

use crate::config::EngineConfig;
use crate::datapoints::{CodecRegistry, DataPoint, DataPointGroup, TagSet};
use crate::query::admission::{AdmissionController, KillSignal, QuerySlot};
use crate::query::descriptor::{QueryDescriptor, QueryHash};
use crate::query::error::{QueryError, QueryResult};
use crate::query::grouper::{GroupByStrategy, Grouper};
use crate::query::merge::{MergedRow, Order};
use crate::storage::{CachedRow, RowCache, StorageError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Points written between kill checks in [`MemoryStore`]
const KILL_CHECK_INTERVAL: usize = 1024;

/// Storage lookup collaborator
///
/// Writes one cache row per matching series into `sink`, each row's points
/// sorted by timestamp in `query.order`. Runs on a blocking thread and
/// should poll [`QueryContext::check_killed`] between series.
pub trait StoreScan: Send + Sync {
    fn scan(
        &self,
        query: &QueryDescriptor,
        sink: &mut RowCache,
        ctx: &QueryContext,
    ) -> QueryResult<()>;
}

/// Per-query state passed through scan and partitioning
#[derive(Debug, Clone)]
pub struct QueryContext {
    hash: QueryHash,
    kill: KillSignal,
    registry: Arc<CodecRegistry>,
    config: Arc<EngineConfig>,
}

impl QueryContext {
    pub fn new(
        hash: QueryHash,
        kill: KillSignal,
        registry: Arc<CodecRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            hash,
            kill,
            registry,
            config,
        }
    }

    pub fn hash(&self) -> &QueryHash {
        &self.hash
    }

    pub fn kill_signal(&self) -> &KillSignal {
        &self.kill
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_killed()
    }

    /// Fail with `Cancelled` once the query has been killed
    pub fn check_killed(&self) -> QueryResult<()> {
        if self.kill.is_killed() {
            return Err(QueryError::Cancelled {
                hash: self.hash.to_string(),
            });
        }
        Ok(())
    }
}

/// Query engine: admission, scan, and partitioning
pub struct QueryEngine {
    config: Arc<EngineConfig>,
    registry: Arc<CodecRegistry>,
    admission: AdmissionController,
    grouper: Grouper,
    store: Arc<dyn StoreScan>,
}

impl QueryEngine {
    /// Create an engine with the built-in codecs
    pub fn new(config: EngineConfig, store: Arc<dyn StoreScan>) -> QueryResult<Self> {
        Self::with_registry(config, CodecRegistry::with_defaults(), store)
    }

    /// Create an engine with a caller-supplied codec registry
    pub fn with_registry(
        config: EngineConfig,
        mut registry: CodecRegistry,
        store: Arc<dyn StoreScan>,
    ) -> QueryResult<Self> {
        config
            .validate()
            .map_err(|e| QueryError::Config(e.to_string()))?;

        registry
            .set_default_long_type(&config.default_long_type)
            .map_err(|e| QueryError::Config(e.to_string()))?;
        registry
            .set_default_double_type(&config.default_double_type)
            .map_err(|e| QueryError::Config(e.to_string()))?;

        std::fs::create_dir_all(&config.temp_dir).map_err(StorageError::from)?;

        let registry = Arc::new(registry);
        let admission = AdmissionController::new(config.max_concurrent_queries)?;
        let grouper = Grouper::new(config.temp_dir.clone(), Arc::clone(&registry))
            .with_buffer_entries(config.write_buffer_entries);

        info!(
            temp_dir = %config.temp_dir.display(),
            max_concurrent_queries = config.max_concurrent_queries,
            "Query engine initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry,
            admission,
            grouper,
            store,
        })
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a query and return its groups
    ///
    /// The permit travels with the blocking scan and then with the returned
    /// output, so it is held until the output is closed or dropped. Dropping
    /// this future mid-scan leaves the permit with the scan until it ends.
    pub async fn execute(
        &self,
        query: QueryDescriptor,
        strategies: Vec<Arc<dyn GroupByStrategy>>,
    ) -> QueryResult<QueryOutput> {
        query.validate()?;
        let hash = query.hash();

        let slot = self
            .admission
            .wait_for_slot(hash.clone(), query.clone())
            .await?;

        let ctx = QueryContext::new(
            hash.clone(),
            slot.kill_signal().clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        );
        let store = Arc::clone(&self.store);
        let grouper = self.grouper.clone();
        let start = Instant::now();

        let order = query.order;

        let (cache, groups, slot) = tokio::task::spawn_blocking(move || {
            let (cache, groups) = run_query(store.as_ref(), &grouper, &query, &ctx, &strategies)?;
            Ok::<_, QueryError>((cache, groups, slot))
        })
        .await
        .map_err(|e| QueryError::Execution(format!("scan task failed: {}", e)))??;

        info!(
            hash = %hash,
            rows = cache.row_count(),
            points = cache.point_count(),
            groups = groups.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );

        Ok(QueryOutput {
            hash,
            order,
            groups,
            cache: Some(cache),
            slot: Some(slot),
        })
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("config", &self.config)
            .field("admission", &self.admission)
            .finish()
    }
}

fn run_query(
    store: &dyn StoreScan,
    grouper: &Grouper,
    query: &QueryDescriptor,
    ctx: &QueryContext,
    strategies: &[Arc<dyn GroupByStrategy>],
) -> QueryResult<(RowCache, Vec<Box<dyn DataPointGroup>>)> {
    let path = ctx
        .config()
        .temp_dir
        .join(format!("query_{}.cache", Uuid::new_v4()));
    let mut cache = RowCache::create(&query.metric, path, Arc::clone(ctx.registry()))?
        .with_buffer_entries(ctx.config().write_buffer_entries);

    if let Err(e) = store.scan(query, &mut cache, ctx) {
        warn!(hash = %ctx.hash(), error = %e, "Store scan failed");
        return Err(e);
    }
    ctx.check_killed()?;

    let rows: Vec<Box<dyn DataPointGroup>> = cache
        .get_rows()?
        .into_iter()
        .map(|reader| Box::new(CachedRow::new(reader)) as Box<dyn DataPointGroup>)
        .collect();
    debug!(hash = %ctx.hash(), rows = rows.len(), "Scan complete");

    let groups = grouper.group(strategies, rows)?;
    ctx.check_killed()?;
    Ok((cache, groups))
}

/// Groups produced by one query
///
/// Owns the admission permit and the scan cache. Closing the output closes
/// every group, deletes the cache files and releases the permit.
pub struct QueryOutput {
    hash: QueryHash,
    order: Order,
    groups: Vec<Box<dyn DataPointGroup>>,
    cache: Option<RowCache>,
    slot: Option<QuerySlot>,
}

impl QueryOutput {
    pub fn hash(&self) -> &QueryHash {
        &self.hash
    }

    /// Timestamp order of every group's points
    pub fn order(&self) -> Order {
        self.order
    }

    pub fn groups(&self) -> &[Box<dyn DataPointGroup>] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [Box<dyn DataPointGroup>] {
        &mut self.groups
    }

    /// Take the groups; the caller becomes responsible for closing them
    pub fn take_groups(&mut self) -> Vec<Box<dyn DataPointGroup>> {
        std::mem::take(&mut self.groups)
    }

    /// Merge all groups into one row ordered like the query
    pub fn merged(&mut self) -> MergedRow {
        MergedRow::new(self.order, self.take_groups())
    }

    /// Whether an administrator killed this query
    pub fn is_killed(&self) -> bool {
        self.slot.as_ref().map_or(false, |s| s.is_killed())
    }

    /// Release everything the query holds. Safe to call more than once.
    pub fn close(&mut self) -> QueryResult<()> {
        for group in self.groups.iter_mut() {
            group.close();
        }
        self.groups.clear();

        let result = match self.cache.take() {
            Some(mut cache) => cache.close().map_err(QueryError::from),
            None => Ok(()),
        };

        if let Some(mut slot) = self.slot.take() {
            slot.release();
        }
        result
    }
}

impl std::fmt::Debug for QueryOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOutput")
            .field("hash", &self.hash)
            .field("order", &self.order)
            .field("groups", &self.groups.len())
            .field("cache", &self.cache)
            .field("slot", &self.slot.as_ref().map(|s| s.hash()))
            .finish()
    }
}

impl Drop for QueryOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(hash = %self.hash, error = %e, "Failed to close query output");
        }
    }
}

/// One series held by a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemorySeries {
    pub metric: String,
    pub tags: TagSet,
    pub points: Vec<DataPoint>,
}

/// In-memory [`StoreScan`]
///
/// Keeps each series sorted by timestamp. Selects series by metric name, tag
/// filter and time range, and writes at most `limit` points per series,
/// walking from the end of the series for descending queries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    series: Vec<MemorySeries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: impl Into<String>, tags: TagSet, mut points: Vec<DataPoint>) {
        points.sort_by_key(|p| p.timestamp());
        self.series.push(MemorySeries {
            metric: metric.into(),
            tags,
            points,
        });
    }

    pub fn series(&self) -> &[MemorySeries] {
        &self.series
    }
}

impl StoreScan for MemoryStore {
    fn scan(
        &self,
        query: &QueryDescriptor,
        sink: &mut RowCache,
        ctx: &QueryContext,
    ) -> QueryResult<()> {
        let limit = query.limit.unwrap_or(usize::MAX);

        for series in &self.series {
            ctx.check_killed()?;
            if series.metric != query.metric || !query.matches_tags(&series.tags) {
                continue;
            }

            let in_range = series
                .points
                .iter()
                .filter(|p| query.time_range.contains(p.timestamp()));
            let points: Vec<&DataPoint> = match query.order {
                Order::Asc => in_range.take(limit).collect(),
                Order::Desc => in_range.rev().take(limit).collect(),
            };
            let Some(first) = points.first() else {
                continue;
            };

            let mut writer = sink.start_row(first.data_store_type(), series.tags.clone())?;
            for (i, point) in points.into_iter().enumerate() {
                if i % KILL_CHECK_INTERVAL == 0 {
                    ctx.check_killed()?;
                }
                writer.append(point)?;
            }
            writer.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoints::{GroupByResult, TagContext};
    use crate::query::descriptor::TimeRange;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    struct EvenOdd;

    impl GroupByStrategy for EvenOdd {
        fn group_id(&self, point: &DataPoint, _tags: &TagContext) -> i32 {
            (point.timestamp() % 2) as i32
        }

        fn describe(&self, id: i32) -> GroupByResult {
            GroupByResult::new("parity", json!(id))
        }
    }

    struct FailingStore;

    impl StoreScan for FailingStore {
        fn scan(&self, _: &QueryDescriptor, _: &mut RowCache, _: &QueryContext) -> QueryResult<()> {
            Err(QueryError::Scan("backend unavailable".into()))
        }
    }

    /// Counts concurrent scans and records the peak
    struct SlowStore {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl StoreScan for SlowStore {
        fn scan(&self, _: &QueryDescriptor, _: &mut RowCache, _: &QueryContext) -> QueryResult<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Writes one row, then kills its own query
    struct SelfKillingStore;

    impl StoreScan for SelfKillingStore {
        fn scan(
            &self,
            _: &QueryDescriptor,
            sink: &mut RowCache,
            ctx: &QueryContext,
        ) -> QueryResult<()> {
            let mut writer = sink.start_row(crate::datapoints::LONG_TYPE, TagSet::new())?;
            writer.append(&DataPoint::long(1, 1))?;
            writer.close()?;
            ctx.kill_signal().kill();
            Ok(())
        }
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert(
            "cpu",
            TagSet::new().with("host", "a"),
            (0..6).map(|t| DataPoint::long(t * 10 + 1, t)).collect(),
        );
        store.insert(
            "cpu",
            TagSet::new().with("host", "b"),
            (0..6).map(|t| DataPoint::double(t * 10 + 2, t as f64)).collect(),
        );
        store.insert(
            "mem",
            TagSet::new().with("host", "a"),
            vec![DataPoint::long(5, 5)],
        );
        store
    }

    fn engine(dir: &Path, store: impl StoreScan + 'static) -> QueryEngine {
        let config = EngineConfig::new(dir).with_max_concurrent_queries(2);
        QueryEngine::new(config, Arc::new(store)).unwrap()
    }

    fn query() -> QueryDescriptor {
        QueryDescriptor::new("cpu", TimeRange::new(0, 1000).unwrap())
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_execute_returns_one_group_per_series() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), store());

        let mut output = engine.execute(query(), Vec::new()).await.unwrap();
        assert_eq!(output.groups().len(), 2);
        assert_eq!(output.groups()[0].tags().first("host"), Some("a"));
        assert_eq!(engine.admission().available_permits(), 1);
        assert_eq!(engine.admission().running_count(), 1);

        let merged: Vec<i64> = output.merged().map(|p| p.timestamp()).collect();
        assert_eq!(merged.len(), 12);
        assert!(merged.windows(2).all(|w| w[0] <= w[1]));

        output.close().unwrap();
        output.close().unwrap();
        assert_eq!(engine.admission().available_permits(), 2);
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_execute_with_strategies_partitions_rows() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), store());

        let strategies: Vec<Arc<dyn GroupByStrategy>> = vec![Arc::new(EvenOdd)];
        let mut output = engine.execute(query(), strategies).await.unwrap();

        // host a has odd timestamps only, host b even only
        assert_eq!(output.groups().len(), 2);
        assert_eq!(output.groups()[0].group_by_results()[0].body, json!(1));
        assert_eq!(output.groups()[1].group_by_results()[0].body, json!(0));
        let b_points: Vec<_> = output.groups_mut()[1].by_ref().collect();
        assert_eq!(b_points.len(), 6);
        assert!(b_points.iter().all(|p| p.is_double()));

        drop(output);
        assert_eq!(files_in(dir.path()), 0);
        assert_eq!(engine.admission().available_permits(), 2);
    }

    #[tokio::test]
    async fn test_tag_filter_time_range_and_limit() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), store());

        let q = QueryDescriptor::new("cpu", TimeRange::new(10, 1000).unwrap())
            .tag("host", "b")
            .limit(3);
        let mut output = engine.execute(q, Vec::new()).await.unwrap();
        assert_eq!(output.groups().len(), 1);
        let ts: Vec<_> = output.groups_mut()[0].by_ref().map(|p| p.timestamp()).collect();
        assert_eq!(ts, vec![12, 22, 32]);
    }

    #[tokio::test]
    async fn test_descending_query_merges_descending() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), store());

        let mut output = engine
            .execute(query().order(Order::Desc), Vec::new())
            .await
            .unwrap();
        assert_eq!(output.order(), Order::Desc);
        let a: Vec<_> = output.groups_mut()[0].by_ref().take(2).map(|p| p.timestamp()).collect();
        assert_eq!(a, vec![51, 41]);

        let mut output = engine
            .execute(query().order(Order::Desc), Vec::new())
            .await
            .unwrap();
        let ts: Vec<_> = output.merged().map(|p| p.timestamp()).collect();
        assert_eq!(ts, vec![52, 51, 42, 41, 32, 31, 22, 21, 12, 11, 2, 1]);
    }

    #[tokio::test]
    async fn test_descending_limit_keeps_latest_points() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), store());

        let q = query().tag("host", "a").order(Order::Desc).limit(2);
        let mut output = engine.execute(q, Vec::new()).await.unwrap();
        let ts: Vec<_> = output.merged().map(|p| p.timestamp()).collect();
        assert_eq!(ts, vec![51, 41]);
    }

    #[tokio::test]
    async fn test_dropped_execute_keeps_permit_until_scan_ends() {
        let dir = tempdir().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let store = SlowStore {
            active: Arc::clone(&active),
            peak: Arc::clone(&peak),
            delay: Duration::from_millis(300),
        };
        let config = EngineConfig::new(dir.path()).with_max_concurrent_queries(1);
        let engine = QueryEngine::new(config, Arc::new(store)).unwrap();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), engine.execute(query(), Vec::new()))
                .await;
        assert!(timed_out.is_err());
        assert_eq!(active.load(Ordering::SeqCst), 1);
        assert_eq!(engine.admission().available_permits(), 0);

        let output = engine.execute(query(), Vec::new()).await.unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(engine.admission().available_permits(), 0);

        drop(output);
        assert_eq!(engine.admission().available_permits(), 1);
        assert!(engine.admission().get_running_queries().is_empty());
        assert_eq!(files_in(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_scan_failure_cleans_up() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), FailingStore);

        let err = engine.execute(query(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, QueryError::Scan(_)));
        assert_eq!(files_in(dir.path()), 0);
        assert_eq!(engine.admission().available_permits(), 2);
        assert!(engine.admission().get_running_queries().is_empty());
    }

    #[tokio::test]
    async fn test_killed_query_is_cancelled() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), SelfKillingStore);

        let err = engine.execute(query(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, QueryError::Cancelled { .. }));
        assert_eq!(files_in(dir.path()), 0);
        assert_eq!(engine.admission().available_permits(), 2);
    }

    #[tokio::test]
    async fn test_invalid_query_and_config() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path(), store());
        let bad = QueryDescriptor::new("", TimeRange::new(0, 1).unwrap());
        assert!(matches!(
            engine.execute(bad, Vec::new()).await,
            Err(QueryError::InvalidQuery(_))
        ));

        let config = EngineConfig::new(dir.path()).with_max_concurrent_queries(0);
        assert!(matches!(
            QueryEngine::new(config, Arc::new(MemoryStore::new())),
            Err(QueryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_legacy_default_factories() {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::new(dir.path());
        config.default_long_type = crate::datapoints::LEGACY_TYPE.to_string();
        let engine = QueryEngine::new(config, Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(
            engine.registry().create_long(1, 2),
            DataPoint::legacy_long(1, 2)
        );
    }
}
