//! Codec registry
//!
//! Process-wide map from data-store type tag to [`ValueCodec`]. The row
//! cache resolves its per-file type ids back to tags and looks the codec up
//! here on the read path.

use crate::datapoints::codec::{
    ComplexCodec, DefaultValueFactory, DoubleCodec, FractionCodec, LegacyCodec, LongCodec,
    NullCodec, StringCodec, ValueCodec,
};
use crate::datapoints::error::{CodecError, CodecResult};
use crate::datapoints::types::{DataPoint, DOUBLE_TYPE, LEGACY_TYPE, LONG_TYPE};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry of value codecs keyed by data-store type tag
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn ValueCodec>>,
    long_factory: Arc<dyn DefaultValueFactory<i64>>,
    double_factory: Arc<dyn DefaultValueFactory<f64>>,
}

impl CodecRegistry {
    /// Create an empty registry with the plain long/double factories
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
            long_factory: Arc::new(LongCodec),
            double_factory: Arc::new(DoubleCodec),
        }
    }

    /// Create a registry with every built-in codec registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let codecs: [Arc<dyn ValueCodec>; 7] = [
            Arc::new(LongCodec),
            Arc::new(DoubleCodec),
            Arc::new(StringCodec),
            Arc::new(LegacyCodec),
            Arc::new(NullCodec),
            Arc::new(ComplexCodec),
            Arc::new(FractionCodec),
        ];
        for codec in codecs {
            let tag = codec.data_store_type().to_string();
            registry.register(tag, codec);
        }
        registry
    }

    /// Register (or replace) the codec for `type_tag`
    pub fn register(&mut self, type_tag: impl Into<String>, codec: Arc<dyn ValueCodec>) {
        let type_tag = type_tag.into();
        if self.codecs.insert(type_tag.clone(), codec).is_some() {
            tracing::debug!(type_tag = %type_tag, "Replaced registered codec");
        }
    }

    /// Choose which factory builds long values from scratch
    ///
    /// Accepts `kairos_long` or `kairos_legacy`.
    pub fn set_default_long_type(&mut self, type_tag: &str) -> CodecResult<()> {
        self.long_factory = match type_tag {
            LONG_TYPE => Arc::new(LongCodec),
            LEGACY_TYPE => Arc::new(LegacyCodec),
            other => return Err(CodecError::UnknownTypeTag(other.to_string())),
        };
        Ok(())
    }

    /// Choose which factory builds double values from scratch
    ///
    /// Accepts `kairos_double` or `kairos_legacy`.
    pub fn set_default_double_type(&mut self, type_tag: &str) -> CodecResult<()> {
        self.double_factory = match type_tag {
            DOUBLE_TYPE => Arc::new(DoubleCodec),
            LEGACY_TYPE => Arc::new(LegacyCodec),
            other => return Err(CodecError::UnknownTypeTag(other.to_string())),
        };
        Ok(())
    }

    /// Look up the codec for a type tag
    pub fn get(&self, type_tag: &str) -> Option<&Arc<dyn ValueCodec>> {
        self.codecs.get(type_tag)
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.codecs.contains_key(type_tag)
    }

    /// All registered type tags, sorted
    pub fn type_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    fn codec(&self, type_tag: &str) -> CodecResult<&Arc<dyn ValueCodec>> {
        self.codecs
            .get(type_tag)
            .ok_or_else(|| CodecError::UnknownTypeTag(type_tag.to_string()))
    }

    /// Encode the payload of `point` with the codec for its own type tag
    pub fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()> {
        self.codec(point.data_store_type())?.encode(point, sink)
    }

    /// Decode one payload of kind `type_tag` from `source`
    pub fn decode(
        &self,
        type_tag: &str,
        timestamp: i64,
        source: &mut &[u8],
    ) -> CodecResult<DataPoint> {
        self.codec(type_tag)?.decode(timestamp, source)
    }

    /// Build a data point of kind `type_tag` from parsed JSON
    pub fn decode_json(&self, type_tag: &str, timestamp: i64, json: &Value) -> CodecResult<DataPoint> {
        self.codec(type_tag)?.decode_json(timestamp, json)
    }

    /// Create a long-valued point with the configured default factory
    pub fn create_long(&self, timestamp: i64, value: i64) -> DataPoint {
        self.long_factory.create(timestamp, value)
    }

    /// Create a double-valued point with the configured default factory
    pub fn create_double(&self, timestamp: i64, value: f64) -> DataPoint {
        self.double_factory.create(timestamp, value)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("type_tags", &self.type_tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoints::types::{NULL_TYPE, STRING_TYPE};
    use serde_json::json;

    #[test]
    fn test_defaults_registered() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(registry.type_tags().len(), 7);
        assert!(registry.contains(LONG_TYPE));
        assert!(registry.contains(NULL_TYPE));
        assert!(CodecRegistry::new().type_tags().is_empty());
    }

    #[test]
    fn test_registry_roundtrip() {
        let registry = CodecRegistry::with_defaults();
        let points = vec![
            DataPoint::long(1, -9),
            DataPoint::double(2, 9.5),
            DataPoint::string(3, "idle"),
            DataPoint::legacy_double(4, 0.1),
            DataPoint::null(5),
            DataPoint::complex(6, 0.0, 1.0),
            DataPoint::fraction(7, 2, 3).unwrap(),
        ];

        for point in points {
            let mut buf = Vec::new();
            registry.encode(&point, &mut buf).unwrap();
            let mut source = buf.as_slice();
            let decoded = registry
                .decode(point.data_store_type(), point.timestamp(), &mut source)
                .unwrap();
            assert_eq!(decoded, point);
        }
    }

    #[test]
    fn test_unknown_type_tag() {
        let registry = CodecRegistry::with_defaults();
        let mut source: &[u8] = &[1, 2, 3];
        let err = registry.decode("kairos_bogus", 0, &mut source).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTypeTag(tag) if tag == "kairos_bogus"));

        let empty = CodecRegistry::new();
        let mut buf = Vec::new();
        assert!(empty.encode(&DataPoint::long(0, 1), &mut buf).is_err());
    }

    #[test]
    fn test_decode_json_by_tag() {
        let registry = CodecRegistry::with_defaults();
        let point = registry.decode_json(STRING_TYPE, 10, &json!("busy")).unwrap();
        assert_eq!(point, DataPoint::string(10, "busy"));
        assert!(registry.decode_json("nope", 10, &json!(1)).is_err());
    }

    #[test]
    fn test_default_factories_configurable() {
        let mut registry = CodecRegistry::with_defaults();
        assert_eq!(registry.create_long(1, 2), DataPoint::long(1, 2));
        assert_eq!(registry.create_double(1, 2.0), DataPoint::double(1, 2.0));

        registry.set_default_long_type(LEGACY_TYPE).unwrap();
        registry.set_default_double_type(LEGACY_TYPE).unwrap();
        assert_eq!(registry.create_long(1, 2), DataPoint::legacy_long(1, 2));
        assert_eq!(registry.create_double(1, 2.0), DataPoint::legacy_double(1, 2.0));

        assert!(registry.set_default_long_type(STRING_TYPE).is_err());
    }
}
