//! Strata Query Engine
//!
//! Everything between a query arriving and its result rows leaving:
//!
//! - **descriptor**: `QueryDescriptor`, `TimeRange`, and query hashing
//! - **admission**: bounded concurrent scans, collision counting, kill
//! - **grouper**: group-by partitioning through spill caches
//! - **merge**: stable k-way merge and the `MergedRow` group
//! - **executor**: `QueryEngine` tying the stages together
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::config::EngineConfig;
//! use strata::datapoints::{DataPoint, TagSet};
//! use strata::query::{MemoryStore, Order, QueryDescriptor, QueryEngine, TimeRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut store = MemoryStore::new();
//!     store.insert("cpu", TagSet::new().with("host", "a"), vec![DataPoint::long(1, 7)]);
//!
//!     let engine = QueryEngine::new(EngineConfig::default(), Arc::new(store))?;
//!     let query = QueryDescriptor::new("cpu", TimeRange::new(0, 100)?).order(Order::Desc);
//!
//!     let mut output = engine.execute(query, Vec::new()).await?;
//!     for point in output.merged() {
//!         println!("{}", point);
//!     }
//!     output.close()?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod grouper;
pub mod merge;

pub use admission::{AdmissionController, KillSignal, QuerySlot, RunningQuery, SlotState};
pub use descriptor::{QueryDescriptor, QueryHash, TimeRange};
pub use error::{QueryError, QueryResult};
pub use executor::{MemorySeries, MemoryStore, QueryContext, QueryEngine, QueryOutput, StoreScan};
pub use grouper::{GroupByStrategy, GroupKey, Grouper};
pub use merge::{merge, MergedRow, Order, SortedMerge};
