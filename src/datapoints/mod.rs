//! Strata data point model
//!
//! - **types**: `DataPoint`, its payload variants, `TagSet`, `GroupByResult`
//! - **varint**: 7-bit varint and zig-zag integer encoding
//! - **codec**: one binary/JSON codec per data-store type tag
//! - **registry**: process-wide type tag → codec map
//! - **group**: the `DataPointGroup` row contract
//! - **error**: error types
//!
//! # Example
//!
//! ```rust
//! use strata::datapoints::{CodecRegistry, DataPoint, LONG_TYPE};
//!
//! let registry = CodecRegistry::with_defaults();
//! let mut buf = Vec::new();
//! registry.encode(&DataPoint::long(1000, 42), &mut buf).unwrap();
//!
//! let mut source = buf.as_slice();
//! let point = registry.decode(LONG_TYPE, 1000, &mut source).unwrap();
//! assert_eq!(point.long_value(), Ok(42));
//! ```

pub mod codec;
pub mod error;
pub mod group;
pub mod registry;
pub mod types;
pub mod varint;

pub use codec::{
    ComplexCodec, DefaultValueFactory, DoubleCodec, FractionCodec, LegacyCodec, LongCodec,
    NullCodec, StringCodec, ValueCodec,
};
pub use error::{CodecError, CodecResult, ValueError, ValueResult};
pub use group::{DataPointGroup, MemoryRow};
pub use registry::CodecRegistry;
pub use types::{
    Complex, DataPoint, DataPointValue, Fraction, GroupByResult, LegacyValue, TagContext, TagSet,
    COMPLEX_TYPE, DOUBLE_TYPE, FRACTION_TYPE, LEGACY_TYPE, LONG_TYPE, NULL_TYPE, STRING_TYPE,
};
