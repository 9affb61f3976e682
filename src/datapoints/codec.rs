//! Value codecs
//!
//! One codec per data-store type tag. A codec turns a single typed payload
//! into bytes (and back) and parses the JSON form of the payload. Codecs hold
//! no state and are shared freely across query threads.
//!
//! Payload formats:
//! ```text
//! long      varint(zigzag(value))
//! double    8 bytes, big-endian IEEE-754
//! string    varint(byte length) + UTF-8 bytes
//! legacy    flag: u8 (0 = long, 1 = double) + long or double payload
//! null      (empty)
//! complex   real: f64 BE + imaginary: f64 BE
//! fraction  varint(zigzag(numerator)) + varint(zigzag(denominator))
//! ```

use crate::datapoints::error::{CodecError, CodecResult};
use crate::datapoints::types::{
    Complex, DataPoint, DataPointValue, Fraction, LegacyValue, COMPLEX_TYPE, DOUBLE_TYPE,
    FRACTION_TYPE, LEGACY_TYPE, LONG_TYPE, NULL_TYPE, STRING_TYPE,
};
use crate::datapoints::varint;
use serde_json::Value;

const LEGACY_LONG_FLAG: u8 = 0;
const LEGACY_DOUBLE_FLAG: u8 = 1;

/// Encodes and decodes one kind of data point payload
pub trait ValueCodec: Send + Sync {
    /// The data-store type tag this codec handles
    fn data_store_type(&self) -> &str;

    /// Append the payload of `point` to `sink`
    fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()>;

    /// Read one payload from `source`, advancing it
    fn decode(&self, timestamp: i64, source: &mut &[u8]) -> CodecResult<DataPoint>;

    /// Build a data point from the payload's JSON representation
    fn decode_json(&self, timestamp: i64, json: &Value) -> CodecResult<DataPoint>;
}

/// Builds data points from scratch on the write path
pub trait DefaultValueFactory<V>: Send + Sync {
    fn create(&self, timestamp: i64, value: V) -> DataPoint;
}

fn mismatch(expected: &'static str, point: &DataPoint) -> CodecError {
    CodecError::TypeMismatch {
        expected,
        found: point.data_store_type(),
    }
}

fn read_array<const N: usize>(source: &mut &[u8]) -> CodecResult<[u8; N]> {
    if source.len() < N {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = source.split_at(N);
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(head);
    *source = rest;
    Ok(bytes)
}

fn read_f64(source: &mut &[u8]) -> CodecResult<f64> {
    read_array::<8>(source).map(f64::from_be_bytes)
}

fn json_i64(json: &Value) -> Option<i64> {
    json.as_i64()
        .or_else(|| json.as_f64().map(|v| v as i64))
        .or_else(|| json.as_str().and_then(|s| s.trim().parse().ok()))
}

fn json_f64(json: &Value) -> Option<f64> {
    json.as_f64()
        .or_else(|| json.as_str().and_then(|s| s.trim().parse().ok()))
}

fn json_field<'a>(json: &'a Value, field: &str) -> CodecResult<&'a Value> {
    json.get(field)
        .ok_or_else(|| CodecError::Json(format!("missing field '{}' in {}", field, json)))
}

/// Codec for `kairos_long`
#[derive(Debug, Clone, Copy, Default)]
pub struct LongCodec;

impl ValueCodec for LongCodec {
    fn data_store_type(&self) -> &str {
        LONG_TYPE
    }

    fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()> {
        match point.value() {
            DataPointValue::Long(v) => {
                varint::write_signed(sink, *v);
                Ok(())
            }
            _ => Err(mismatch(LONG_TYPE, point)),
        }
    }

    fn decode(&self, timestamp: i64, source: &mut &[u8]) -> CodecResult<DataPoint> {
        Ok(DataPoint::long(timestamp, varint::read_signed(source)?))
    }

    fn decode_json(&self, timestamp: i64, json: &Value) -> CodecResult<DataPoint> {
        let value = json_i64(json)
            .ok_or_else(|| CodecError::Json(format!("expected an integer, got {}", json)))?;
        Ok(DataPoint::long(timestamp, value))
    }
}

impl DefaultValueFactory<i64> for LongCodec {
    fn create(&self, timestamp: i64, value: i64) -> DataPoint {
        DataPoint::long(timestamp, value)
    }
}

/// Codec for `kairos_double`
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleCodec;

impl ValueCodec for DoubleCodec {
    fn data_store_type(&self) -> &str {
        DOUBLE_TYPE
    }

    fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()> {
        match point.value() {
            DataPointValue::Double(v) => {
                sink.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            _ => Err(mismatch(DOUBLE_TYPE, point)),
        }
    }

    fn decode(&self, timestamp: i64, source: &mut &[u8]) -> CodecResult<DataPoint> {
        Ok(DataPoint::double(timestamp, read_f64(source)?))
    }

    fn decode_json(&self, timestamp: i64, json: &Value) -> CodecResult<DataPoint> {
        let value = json_f64(json)
            .ok_or_else(|| CodecError::Json(format!("expected a number, got {}", json)))?;
        Ok(DataPoint::double(timestamp, value))
    }
}

impl DefaultValueFactory<f64> for DoubleCodec {
    fn create(&self, timestamp: i64, value: f64) -> DataPoint {
        DataPoint::double(timestamp, value)
    }
}

/// Codec for `kairos_string`
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl ValueCodec for StringCodec {
    fn data_store_type(&self) -> &str {
        STRING_TYPE
    }

    fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()> {
        match point.value() {
            DataPointValue::String(s) => {
                varint::write_unsigned(sink, s.len() as u64);
                sink.extend_from_slice(s.as_bytes());
                Ok(())
            }
            _ => Err(mismatch(STRING_TYPE, point)),
        }
    }

    fn decode(&self, timestamp: i64, source: &mut &[u8]) -> CodecResult<DataPoint> {
        let len = varint::read_unsigned(source)?;
        let len = usize::try_from(len).map_err(|_| CodecError::Truncated)?;
        if source.len() < len {
            return Err(CodecError::Truncated);
        }
        let (bytes, rest) = source.split_at(len);
        let value = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        *source = rest;
        Ok(DataPoint::string(timestamp, value))
    }

    fn decode_json(&self, timestamp: i64, json: &Value) -> CodecResult<DataPoint> {
        let value = match json {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(DataPoint::string(timestamp, value))
    }
}

/// Codec for `kairos_legacy`
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyCodec;

impl ValueCodec for LegacyCodec {
    fn data_store_type(&self) -> &str {
        LEGACY_TYPE
    }

    fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()> {
        match point.value() {
            DataPointValue::Legacy(LegacyValue::Long(v)) => {
                sink.push(LEGACY_LONG_FLAG);
                varint::write_signed(sink, *v);
                Ok(())
            }
            DataPointValue::Legacy(LegacyValue::Double(v)) => {
                sink.push(LEGACY_DOUBLE_FLAG);
                sink.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            _ => Err(mismatch(LEGACY_TYPE, point)),
        }
    }

    fn decode(&self, timestamp: i64, source: &mut &[u8]) -> CodecResult<DataPoint> {
        let [flag] = read_array::<1>(source)?;
        match flag {
            LEGACY_LONG_FLAG => Ok(DataPoint::legacy_long(
                timestamp,
                varint::read_signed(source)?,
            )),
            LEGACY_DOUBLE_FLAG => Ok(DataPoint::legacy_double(timestamp, read_f64(source)?)),
            other => Err(CodecError::InvalidPayload(format!(
                "unknown legacy value flag {}",
                other
            ))),
        }
    }

    fn decode_json(&self, timestamp: i64, json: &Value) -> CodecResult<DataPoint> {
        if let Some(v) = json.as_i64() {
            return Ok(DataPoint::legacy_long(timestamp, v));
        }
        json_f64(json)
            .map(|v| DataPoint::legacy_double(timestamp, v))
            .ok_or_else(|| CodecError::Json(format!("expected a number, got {}", json)))
    }
}

impl DefaultValueFactory<i64> for LegacyCodec {
    fn create(&self, timestamp: i64, value: i64) -> DataPoint {
        DataPoint::legacy_long(timestamp, value)
    }
}

impl DefaultValueFactory<f64> for LegacyCodec {
    fn create(&self, timestamp: i64, value: f64) -> DataPoint {
        DataPoint::legacy_double(timestamp, value)
    }
}

/// Codec for `kairos_null`; the payload is empty
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCodec;

impl ValueCodec for NullCodec {
    fn data_store_type(&self) -> &str {
        NULL_TYPE
    }

    fn encode(&self, point: &DataPoint, _sink: &mut Vec<u8>) -> CodecResult<()> {
        if point.is_null() {
            Ok(())
        } else {
            Err(mismatch(NULL_TYPE, point))
        }
    }

    fn decode(&self, timestamp: i64, _source: &mut &[u8]) -> CodecResult<DataPoint> {
        Ok(DataPoint::null(timestamp))
    }

    fn decode_json(&self, timestamp: i64, _json: &Value) -> CodecResult<DataPoint> {
        Ok(DataPoint::null(timestamp))
    }
}

/// Codec for `kairos_complex`
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexCodec;

impl ValueCodec for ComplexCodec {
    fn data_store_type(&self) -> &str {
        COMPLEX_TYPE
    }

    fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()> {
        match point.value() {
            DataPointValue::Complex(Complex { real, imaginary }) => {
                sink.extend_from_slice(&real.to_be_bytes());
                sink.extend_from_slice(&imaginary.to_be_bytes());
                Ok(())
            }
            _ => Err(mismatch(COMPLEX_TYPE, point)),
        }
    }

    fn decode(&self, timestamp: i64, source: &mut &[u8]) -> CodecResult<DataPoint> {
        let real = read_f64(source)?;
        let imaginary = read_f64(source)?;
        Ok(DataPoint::complex(timestamp, real, imaginary))
    }

    fn decode_json(&self, timestamp: i64, json: &Value) -> CodecResult<DataPoint> {
        let real = json_f64(json_field(json, "real")?)
            .ok_or_else(|| CodecError::Json("'real' is not a number".to_string()))?;
        let imaginary = json_f64(json_field(json, "imaginary")?)
            .ok_or_else(|| CodecError::Json("'imaginary' is not a number".to_string()))?;
        Ok(DataPoint::complex(timestamp, real, imaginary))
    }
}

/// Codec for `kairos_fraction`
#[derive(Debug, Clone, Copy, Default)]
pub struct FractionCodec;

impl ValueCodec for FractionCodec {
    fn data_store_type(&self) -> &str {
        FRACTION_TYPE
    }

    fn encode(&self, point: &DataPoint, sink: &mut Vec<u8>) -> CodecResult<()> {
        match point.value() {
            DataPointValue::Fraction(f) => {
                varint::write_signed(sink, f.numerator());
                varint::write_signed(sink, f.denominator());
                Ok(())
            }
            _ => Err(mismatch(FRACTION_TYPE, point)),
        }
    }

    fn decode(&self, timestamp: i64, source: &mut &[u8]) -> CodecResult<DataPoint> {
        let numerator = varint::read_signed(source)?;
        let denominator = varint::read_signed(source)?;
        let fraction = Fraction::new(numerator, denominator)?;
        Ok(DataPoint::new(timestamp, DataPointValue::Fraction(fraction)))
    }

    fn decode_json(&self, timestamp: i64, json: &Value) -> CodecResult<DataPoint> {
        let numerator = json_i64(json_field(json, "numerator")?)
            .ok_or_else(|| CodecError::Json("'numerator' is not an integer".to_string()))?;
        let denominator = json_i64(json_field(json, "denominator")?)
            .ok_or_else(|| CodecError::Json("'denominator' is not an integer".to_string()))?;
        Ok(DataPoint::fraction(timestamp, numerator, denominator)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoints::error::ValueError;
    use serde_json::json;

    fn roundtrip(codec: &dyn ValueCodec, point: DataPoint) {
        let mut buf = Vec::new();
        codec.encode(&point, &mut buf).unwrap();
        let mut source = buf.as_slice();
        let decoded = codec.decode(point.timestamp(), &mut source).unwrap();
        assert_eq!(decoded, point);
        assert_eq!(decoded.data_store_type(), codec.data_store_type());
        assert!(source.is_empty(), "codec left {} bytes unread", source.len());
    }

    #[test]
    fn test_every_variant_roundtrips() {
        roundtrip(&LongCodec, DataPoint::long(1000, i64::MIN));
        roundtrip(&LongCodec, DataPoint::long(1000, 12345));
        roundtrip(&DoubleCodec, DataPoint::double(2000, -0.125));
        roundtrip(&StringCodec, DataPoint::string(3000, "héllo wörld"));
        roundtrip(&LegacyCodec, DataPoint::legacy_long(4000, -7));
        roundtrip(&LegacyCodec, DataPoint::legacy_double(4000, 3.5));
        roundtrip(&NullCodec, DataPoint::null(5000));
        roundtrip(&ComplexCodec, DataPoint::complex(6000, 1.5, -2.25));
        roundtrip(&FractionCodec, DataPoint::fraction(7000, -3, 8).unwrap());
    }

    #[test]
    fn test_double_is_big_endian() {
        let mut buf = Vec::new();
        DoubleCodec
            .encode(&DataPoint::double(0, 1.0), &mut buf)
            .unwrap();
        assert_eq!(buf, 1.0f64.to_be_bytes().to_vec());
    }

    #[test]
    fn test_type_mismatch() {
        let mut buf = Vec::new();
        let err = LongCodec
            .encode(&DataPoint::double(0, 1.0), &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::TypeMismatch {
                expected: LONG_TYPE,
                found: DOUBLE_TYPE
            }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_payloads() {
        let mut source: &[u8] = &[0, 1, 2];
        assert!(matches!(
            DoubleCodec.decode(0, &mut source),
            Err(CodecError::Truncated)
        ));

        let mut source: &[u8] = &[10, b'a'];
        assert!(matches!(
            StringCodec.decode(0, &mut source),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_fraction_decode_rejects_zero_denominator() {
        let mut buf = Vec::new();
        varint::write_signed(&mut buf, 1);
        varint::write_signed(&mut buf, 0);
        let mut source = buf.as_slice();
        assert!(matches!(
            FractionCodec.decode(0, &mut source),
            Err(CodecError::Value(ValueError::ZeroDenominator))
        ));
    }

    #[test]
    fn test_decode_json() {
        assert_eq!(
            LongCodec.decode_json(1, &json!(42)).unwrap(),
            DataPoint::long(1, 42)
        );
        assert_eq!(
            LongCodec.decode_json(1, &json!("17")).unwrap(),
            DataPoint::long(1, 17)
        );
        assert_eq!(
            DoubleCodec.decode_json(1, &json!(2.5)).unwrap(),
            DataPoint::double(1, 2.5)
        );
        assert_eq!(
            LegacyCodec.decode_json(1, &json!(3)).unwrap(),
            DataPoint::legacy_long(1, 3)
        );
        assert_eq!(
            LegacyCodec.decode_json(1, &json!(3.25)).unwrap(),
            DataPoint::legacy_double(1, 3.25)
        );
        assert_eq!(
            StringCodec.decode_json(1, &json!("on")).unwrap(),
            DataPoint::string(1, "on")
        );
        assert_eq!(
            ComplexCodec
                .decode_json(1, &json!({ "real": 1.0, "imaginary": 2.0 }))
                .unwrap(),
            DataPoint::complex(1, 1.0, 2.0)
        );
        assert!(FractionCodec
            .decode_json(1, &json!({ "numerator": 1, "denominator": 0 }))
            .is_err());
        assert!(ComplexCodec.decode_json(1, &json!({ "real": 1.0 })).is_err());
        assert!(LongCodec.decode_json(1, &json!({ "x": 1 })).is_err());
    }

    #[test]
    fn test_default_factories() {
        assert_eq!(LongCodec.create(5, 9), DataPoint::long(5, 9));
        assert_eq!(DoubleCodec.create(5, 0.5), DataPoint::double(5, 0.5));
        assert_eq!(
            DefaultValueFactory::<i64>::create(&LegacyCodec, 5, 9),
            DataPoint::legacy_long(5, 9)
        );
    }
}
