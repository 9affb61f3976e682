//! # Strata
//!
//! Query-execution core for a time-series database: typed data points,
//! disk-backed result caches, group-by partitioning, stable k-way merging
//! and admission control for concurrent scans.
//!
//! ## Modules
//!
//! - [`datapoints`]: Data point model, value codecs and the codec registry
//! - [`storage`]: Row cache spill files and their readers
//! - [`query`]: Admission, partitioning, merging and the query engine
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::{DataPoint, EngineConfig, MemoryStore, QueryDescriptor, QueryEngine, TagSet, TimeRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut store = MemoryStore::new();
//!     store.insert("cpu", TagSet::new().with("host", "a"), vec![DataPoint::long(1, 3)]);
//!     store.insert("cpu", TagSet::new().with("host", "b"), vec![DataPoint::double(2, 0.5)]);
//!
//!     let engine = QueryEngine::new(EngineConfig::default(), Arc::new(store))?;
//!     let query = QueryDescriptor::new("cpu", TimeRange::new(0, 10)?);
//!
//!     let mut output = engine.execute(query, Vec::new()).await?;
//!     let points: Vec<DataPoint> = output.merged().collect();
//!     println!("Found {} points", points.len());
//!
//!     output.close()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod datapoints;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use datapoints::{
    CodecError, CodecRegistry, DataPoint, DataPointGroup, DataPointValue, GroupByResult,
    MemoryRow, TagSet, ValueCodec, ValueError,
};

pub use storage::{CachedRow, RowCache, RowReader, RowWriter, StorageError, StorageResult};

pub use query::{
    AdmissionController, GroupByStrategy, Grouper, MemoryStore, MergedRow, Order, QueryContext,
    QueryDescriptor, QueryEngine, QueryError, QueryHash, QueryOutput, QueryResult, QuerySlot,
    StoreScan, TimeRange,
};

pub use config::{Config, ConfigError, EngineConfig, LoggingConfig};
