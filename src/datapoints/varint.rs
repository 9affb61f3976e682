//! Variable-length integer encoding
//!
//! Unsigned values are written 7 bits at a time, least-significant group
//! first, with the top bit of each byte set while more bytes follow.
//! Signed values are zig-zag transformed first so that small negative
//! numbers (timestamp deltas under unordered ingestion) stay short.

use crate::datapoints::error::{CodecError, CodecResult};

/// Maximum encoded length of a 64-bit value
pub const MAX_VARINT_LEN: usize = 10;

/// Map a signed value onto the unsigned range: 0, -1, 1, -2, 2, ...
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Reverse of [`zigzag_encode`]
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append an unsigned varint to `buf`
pub fn write_unsigned(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append a zig-zag encoded signed varint to `buf`
pub fn write_signed(buf: &mut Vec<u8>, value: i64) {
    write_unsigned(buf, zigzag_encode(value));
}

/// Read an unsigned varint, advancing `source` past it
pub fn read_unsigned(source: &mut &[u8]) -> CodecResult<u64> {
    let mut result = 0u64;
    let mut shift = 0u32;

    loop {
        let (&byte, rest) = source.split_first().ok_or(CodecError::Truncated)?;
        *source = rest;

        // The tenth byte may only carry the final bit
        if shift == 63 && byte > 1 {
            return Err(CodecError::InvalidPayload(
                "varint overflows 64 bits".to_string(),
            ));
        }

        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Read a zig-zag encoded signed varint, advancing `source` past it
pub fn read_signed(source: &mut &[u8]) -> CodecResult<i64> {
    read_unsigned(source).map(zigzag_decode)
}

/// Number of bytes `value` occupies when varint encoded
pub fn encoded_len(value: u64) -> usize {
    let significant_bits = 64 - value.leading_zeros() as usize;
    significant_bits.div_ceil(7).max(1)
}
