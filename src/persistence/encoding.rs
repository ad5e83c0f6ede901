//! Binary Encoding Primitives
//!
//! Building blocks shared by item serialization and the snapshot format.
//!
//! ## Length encoding
//!
//! The top two bits of the first byte select the width:
//!
//! ```text
//! 00xxxxxx                      6-bit length, 1 byte
//! 01xxxxxx xxxxxxxx             14-bit length, 2 bytes
//! 10000000 [4 bytes big-endian] 32-bit length, 5 bytes
//! ```
//!
//! ## Integer encoding
//!
//! ```text
//! 11sxxxww [1|2|4|8 bytes big-endian magnitude]
//!    s  = sign (1 = negative)
//!    ww = width tier: 0 => 8-bit, 1 => 16-bit, 2 => 32-bit, 3 => 64-bit
//! ```
//!
//! Strings are a length followed by the raw UTF-8 bytes. Decoders take a
//! `&mut &[u8]` cursor and advance it past what they consumed.

use bytes::{Buf, BufMut};
use crc::{Crc, CRC_64_ECMA_182};
use thiserror::Error;

const TIER_MASK: u8 = 0b1100_0000;
const LEN_6BIT: u8 = 0b0000_0000;
const LEN_14BIT: u8 = 0b0100_0000;
const LEN_32BIT: u8 = 0b1000_0000;
const INT_TAG: u8 = 0b1100_0000;
const INT_NEGATIVE: u8 = 0b0010_0000;
const INT_WIDTH_MASK: u8 = 0b0001_1111;

const MAX_6BIT: usize = (1 << 6) - 1;
const MAX_14BIT: usize = (1 << 14) - 1;

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// Stable one-byte discriminator written before every item payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    String = 0x00,
    List = 0x01,
}

impl ValueType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ValueType {
    type Error = EncodingError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(ValueType::String),
            0x01 => Ok(ValueType::List),
            other => Err(EncodingError::UnknownValueType(other)),
        }
    }
}

/// Errors produced by the binary primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("byte {0:#04x} does not start a length")]
    NotALength(u8),

    #[error("byte {0:#04x} does not start an integer")]
    NotAnInteger(u8),

    #[error("integer width tier {0} is not supported")]
    InvalidIntegerWidth(u8),

    #[error("integer magnitude {0} does not fit in 64 bits")]
    IntegerOverflow(u64),

    #[error("length {0} cannot be encoded")]
    LengthTooLarge(usize),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown value type {0:#04x}")]
    UnknownValueType(u8),
}

pub type EncodingResult<T> = Result<T, EncodingError>;

fn ensure(buf: &[u8], needed: usize) -> EncodingResult<()> {
    if buf.len() < needed {
        return Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Peeks at the next byte without consuming it.
pub fn peek_byte(buf: &[u8]) -> EncodingResult<u8> {
    ensure(buf, 1)?;
    Ok(buf[0])
}

/// True if the next value in `buf` is integer-encoded rather than a length.
pub fn is_integer_encoded(buf: &[u8]) -> bool {
    buf.first().is_some_and(|b| b & TIER_MASK == INT_TAG)
}

pub fn encode_length(length: usize, out: &mut Vec<u8>) -> EncodingResult<()> {
    if length <= MAX_6BIT {
        out.put_u8(LEN_6BIT | length as u8);
    } else if length <= MAX_14BIT {
        out.put_u8(LEN_14BIT | (length >> 8) as u8);
        out.put_u8((length & 0xFF) as u8);
    } else {
        let length = u32::try_from(length).map_err(|_| EncodingError::LengthTooLarge(length))?;
        out.put_u8(LEN_32BIT);
        out.put_u32(length);
    }
    Ok(())
}

pub fn decode_length(buf: &mut &[u8]) -> EncodingResult<usize> {
    let first = peek_byte(buf)?;
    match first & TIER_MASK {
        LEN_6BIT => {
            buf.advance(1);
            Ok(usize::from(first))
        }
        LEN_14BIT => {
            ensure(buf, 2)?;
            let value = buf.get_u16() & 0x3FFF;
            Ok(usize::from(value))
        }
        LEN_32BIT => {
            ensure(buf, 5)?;
            buf.advance(1);
            Ok(buf.get_u32() as usize)
        }
        _ => Err(EncodingError::NotALength(first)),
    }
}

pub fn encode_string(s: &str, out: &mut Vec<u8>) -> EncodingResult<()> {
    encode_length(s.len(), out)?;
    out.put_slice(s.as_bytes());
    Ok(())
}

pub fn decode_string(buf: &mut &[u8]) -> EncodingResult<String> {
    let length = decode_length(buf)?;
    ensure(buf, length)?;
    let text = std::str::from_utf8(&buf[..length])
        .map_err(|_| EncodingError::InvalidUtf8)?
        .to_string();
    buf.advance(length);
    Ok(text)
}

pub fn encode_integer(value: i64, out: &mut Vec<u8>) {
    let mut tag = INT_TAG;
    if value < 0 {
        tag |= INT_NEGATIVE;
    }
    let magnitude = value.unsigned_abs();

    if magnitude < 1 << 8 {
        out.put_u8(tag);
        out.put_u8(magnitude as u8);
    } else if magnitude < 1 << 16 {
        out.put_u8(tag | 1);
        out.put_u16(magnitude as u16);
    } else if magnitude < 1 << 32 {
        out.put_u8(tag | 2);
        out.put_u32(magnitude as u32);
    } else {
        out.put_u8(tag | 3);
        out.put_u64(magnitude);
    }
}

pub fn decode_integer(buf: &mut &[u8]) -> EncodingResult<i64> {
    let tag = peek_byte(buf)?;
    if tag & TIER_MASK != INT_TAG {
        return Err(EncodingError::NotAnInteger(tag));
    }
    let negative = tag & INT_NEGATIVE != 0;

    let width = match tag & INT_WIDTH_MASK {
        0 => 1,
        1 => 2,
        2 => 4,
        3 => 8,
        other => return Err(EncodingError::InvalidIntegerWidth(other)),
    };
    ensure(buf, 1 + width)?;
    buf.advance(1);
    let magnitude = buf.get_uint(width);

    if negative {
        0i64.checked_sub_unsigned(magnitude)
            .ok_or(EncodingError::IntegerOverflow(magnitude))
    } else {
        i64::try_from(magnitude).map_err(|_| EncodingError::IntegerOverflow(magnitude))
    }
}

/// CRC-64/ECMA-182 over `data`.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Appends the integer-encoded checksum of `data` to `out`.
pub fn encode_checksum(data: &[u8], out: &mut Vec<u8>) {
    encode_integer(checksum(data) as i64, out);
}

/// Reads an encoded checksum and compares it against `data`.
///
/// Returns the stored and computed values on mismatch.
pub fn verify_checksum(data: &[u8], buf: &mut &[u8]) -> EncodingResult<Result<(), (u64, u64)>> {
    let stored = decode_integer(buf)? as u64;
    let computed = checksum(data);
    if stored == computed {
        Ok(Ok(()))
    } else {
        Ok(Err((stored, computed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_bytes(length: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encode_length(length, &mut out).unwrap();
        out
    }

    fn integer_bytes(value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_integer(value, &mut out);
        out
    }

    #[test]
    fn test_length_tiers() {
        assert_eq!(length_bytes(0), vec![0x00]);
        assert_eq!(length_bytes(63), vec![0x3F]);
        assert_eq!(length_bytes(64), vec![0x40, 0x40]);
        assert_eq!(length_bytes(16383), vec![0x7F, 0xFF]);
        assert_eq!(length_bytes(16384), vec![0x80, 0x00, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn test_length_decode_advances_cursor() {
        for length in [0usize, 1, 63, 64, 300, 16383, 16384, 1 << 20] {
            let mut bytes = length_bytes(length);
            bytes.push(0xAA);
            let mut cursor = &bytes[..];
            assert_eq!(decode_length(&mut cursor).unwrap(), length);
            assert_eq!(cursor, &[0xAA]);
        }
    }

    #[test]
    fn test_length_decode_truncated() {
        let mut cursor: &[u8] = &[0x40];
        assert!(matches!(
            decode_length(&mut cursor),
            Err(EncodingError::UnexpectedEof { needed: 2, .. })
        ));
        let mut cursor: &[u8] = &[0x80, 0x00, 0x01];
        assert!(decode_length(&mut cursor).is_err());
        let mut cursor: &[u8] = &[];
        assert!(decode_length(&mut cursor).is_err());
    }

    #[test]
    fn test_length_rejects_integer_tag() {
        let mut cursor: &[u8] = &[0xC0, 0x01];
        assert_eq!(decode_length(&mut cursor), Err(EncodingError::NotALength(0xC0)));
    }

    #[test]
    fn test_string_encoding() {
        let mut out = Vec::new();
        encode_string("hello", &mut out).unwrap();
        assert_eq!(out, b"\x05hello");

        let mut cursor = &out[..];
        assert_eq!(decode_string(&mut cursor).unwrap(), "hello");
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_string_decode_short_payload() {
        let mut cursor: &[u8] = b"\x05hel";
        assert!(matches!(
            decode_string(&mut cursor),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_integer_tiers() {
        assert_eq!(integer_bytes(0), vec![0xC0, 0x00]);
        assert_eq!(integer_bytes(255), vec![0xC0, 0xFF]);
        assert_eq!(integer_bytes(-1), vec![0xE0, 0x01]);
        assert_eq!(integer_bytes(256), vec![0xC1, 0x01, 0x00]);
        assert_eq!(integer_bytes(-65536), vec![0xE2, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(integer_bytes(1 << 32).len(), 9);
    }

    #[test]
    fn test_integer_extremes() {
        for value in [i64::MIN, i64::MIN + 1, -1, 0, 1, i64::MAX] {
            let bytes = integer_bytes(value);
            let mut cursor = &bytes[..];
            assert_eq!(decode_integer(&mut cursor).unwrap(), value);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_integer_decode_errors() {
        let mut cursor: &[u8] = &[0xC3, 0x00, 0x00];
        assert!(matches!(
            decode_integer(&mut cursor),
            Err(EncodingError::UnexpectedEof { needed: 9, .. })
        ));
        let mut cursor: &[u8] = &[0x05];
        assert_eq!(decode_integer(&mut cursor), Err(EncodingError::NotAnInteger(0x05)));
        let mut cursor: &[u8] = &[0xC4, 0x00];
        assert_eq!(
            decode_integer(&mut cursor),
            Err(EncodingError::InvalidIntegerWidth(4))
        );
        // positive magnitude above i64::MAX
        let mut cursor: &[u8] = &[0xC3, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode_integer(&mut cursor),
            Err(EncodingError::IntegerOverflow(_))
        ));
    }

    #[test]
    fn test_checksum_known_value() {
        // CRC-64/ECMA-182 check value
        assert_eq!(checksum(b"123456789"), 0x6C40_DF5F_0B49_7347);
    }

    #[test]
    fn test_checksum_verify() {
        let data = b"REDISLITE payload";
        let mut encoded = Vec::new();
        encode_checksum(data, &mut encoded);

        let mut cursor = &encoded[..];
        assert_eq!(verify_checksum(data, &mut cursor), Ok(Ok(())));

        let mut cursor = &encoded[..];
        assert!(matches!(
            verify_checksum(b"tampered payload", &mut cursor),
            Ok(Err(_))
        ));
    }

    #[test]
    fn test_value_type_bytes() {
        assert_eq!(ValueType::try_from(0x00), Ok(ValueType::String));
        assert_eq!(ValueType::try_from(ValueType::List.as_byte()), Ok(ValueType::List));
        assert_eq!(
            ValueType::try_from(0x07),
            Err(EncodingError::UnknownValueType(0x07))
        );
    }
}
