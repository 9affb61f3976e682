//! Strata spill storage
//!
//! Disk-backed row cache for query results:
//!
//! - **cache**: `RowCache` spill file, `RowWriter`, sidecar index
//! - **reader**: `RowReader` over the finished file, `CachedRow` group
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   DataPoint → varint(ts delta) + varint(type id) + payload → buffer → file
//!
//! Read Path:
//!   finalize → sidecar index + mmap → one RowReader per row
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::datapoints::{CodecRegistry, DataPoint, TagSet, LONG_TYPE};
//! use strata::storage::RowCache;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(CodecRegistry::with_defaults());
//!     let mut cache = RowCache::create("cpu", "/tmp/strata/q.cache", registry)?;
//!
//!     let mut row = cache.start_row(LONG_TYPE, TagSet::new().with("host", "a"))?;
//!     row.append(&DataPoint::long(1000, 7))?;
//!     row.close()?;
//!
//!     for reader in cache.get_rows()? {
//!         for point in reader {
//!             println!("{}", point);
//!         }
//!     }
//!     cache.close()?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod reader;

pub use cache::{RowCache, RowMeta, RowWriter, DEFAULT_WRITE_BUFFER_ENTRIES};
pub use error::{StorageError, StorageResult};
pub use reader::{CachedRow, RowReader};
