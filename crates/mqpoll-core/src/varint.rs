//! Variable Byte Integer encoding/decoding for MQTT.
//!
//! The fixed header's remaining length uses 7 bits per byte for the value,
//! with the high bit indicating whether more bytes follow. At most four
//! bytes are allowed, capping the value at 268,435,455.

use crate::error::{ProtocolError, Result};

/// Largest value a variable byte integer can carry.
pub const MAX_VALUE: usize = 268_435_455;

/// Decode a variable byte integer from the start of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))` if successful,
/// `Ok(None)` if more data is needed, or `Err` if the encoding is invalid.
///
/// # Example
/// ```
/// use mqpoll_core::varint::decode;
/// let (value, consumed) = decode(&[0x80, 0x01]).unwrap().unwrap();
/// assert_eq!((value, consumed), (128, 2));
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;

    for (i, &byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(ProtocolError::InvalidRemainingLength.into());
        }
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if buf.len() >= 4 {
        return Err(ProtocolError::InvalidRemainingLength.into());
    }
    Ok(None)
}

/// Append `value` as a variable byte integer. Returns the bytes written.
///
/// Values above [`MAX_VALUE`] are a caller bug; they are truncated to the
/// low 28 bits.
pub fn encode(value: usize, buf: &mut Vec<u8>) -> usize {
    let mut value = value & MAX_VALUE;
    let start = buf.len();
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    buf.len() - start
}

/// Number of bytes needed to encode `value`.
pub fn encoded_len(value: usize) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}
