//! Whole-store snapshot encoding.
//!
//! `save` turns the store's entries into one byte blob; `load` decodes a blob
//! into a fresh map. Loading is all-or-nothing: any decode error, an unknown
//! type byte, a checksum mismatch or bytes after the checksum fail the whole
//! load and nothing is returned.

use super::encoding::{
    decode_integer, decode_string, encode_checksum, encode_integer, encode_string, peek_byte,
    verify_checksum, EncodingError, EncodingResult, ValueType,
};
use crate::storage::item::{Item, ListItem, StringItem};
use crate::storage::Value;
use bytes::{Buf, BufMut};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Header written at the start of every snapshot
pub const MAGIC: &[u8] = b"REDISLITE";

/// Precedes the expiry timestamp of the record that follows
pub const EXPIRY_MARKER: u8 = 0xFC;

/// Ends the record section; the checksum follows
pub const EOF_MARKER: u8 = 0xFF;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot does not start with the expected header")]
    BadMagic,

    #[error("snapshot ended before the footer")]
    Truncated,

    #[error("snapshot checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { stored: u64, computed: u64 },

    #[error("{0} unexpected bytes after the snapshot checksum")]
    TrailingBytes(usize),

    #[error("corrupt snapshot: {0}")]
    Encoding(#[from] EncodingError),
}

type Decoder = fn(&mut &[u8]) -> EncodingResult<Item>;

fn decode_string_item(buf: &mut &[u8]) -> EncodingResult<Item> {
    StringItem::deserialise(buf).map(Item::String)
}

fn decode_list_item(buf: &mut &[u8]) -> EncodingResult<Item> {
    ListItem::deserialise(buf).map(Item::List)
}

/// Payload decoder for each value type.
fn decoder_for(value_type: ValueType) -> Decoder {
    match value_type {
        ValueType::String => decode_string_item,
        ValueType::List => decode_list_item,
    }
}

fn to_micros(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

fn from_micros(micros: i64) -> SystemTime {
    // pre-epoch timestamps are long expired either way
    UNIX_EPOCH + Duration::from_micros(micros.max(0) as u64)
}

/// Encodes every live entry into a snapshot blob.
///
/// Entries that are already expired are skipped.
pub fn save<'a, I>(entries: I) -> EncodingResult<Vec<u8>>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let now = SystemTime::now();
    let mut out = Vec::with_capacity(256);
    out.put_slice(MAGIC);

    let mut written = 0usize;
    for (key, value) in entries {
        let Some(item) = value.item_at(now) else {
            continue;
        };

        if let Some(expires_at) = value.expires_at() {
            out.put_u8(EXPIRY_MARKER);
            encode_integer(to_micros(expires_at), &mut out);
        }
        out.put_u8(item.value_type().as_byte());
        encode_string(key, &mut out)?;
        item.serialise_into(&mut out)?;
        written += 1;
    }

    out.put_u8(EOF_MARKER);
    let mut footer = Vec::with_capacity(9);
    encode_checksum(&out, &mut footer);
    out.extend_from_slice(&footer);

    debug!(keys = written, bytes = out.len(), "Encoded snapshot");
    Ok(out)
}

/// Decodes a snapshot blob into a new map, dropping records that have expired.
pub fn load(data: &[u8]) -> Result<HashMap<String, Value>, SnapshotError> {
    let mut cursor = data.strip_prefix(MAGIC).ok_or(SnapshotError::BadMagic)?;
    let now = SystemTime::now();
    let mut values = HashMap::new();
    let mut dropped = 0usize;

    loop {
        let marker = peek_byte(cursor).map_err(|_| SnapshotError::Truncated)?;

        if marker == EOF_MARKER {
            cursor.advance(1);
            let covered = data.len() - cursor.len();
            if let Err((stored, computed)) = verify_checksum(&data[..covered], &mut cursor)? {
                warn!(stored, computed, "Snapshot checksum mismatch");
                return Err(SnapshotError::ChecksumMismatch { stored, computed });
            }
            if !cursor.is_empty() {
                return Err(SnapshotError::TrailingBytes(cursor.len()));
            }
            break;
        }

        let expires_at = if marker == EXPIRY_MARKER {
            cursor.advance(1);
            Some(from_micros(decode_integer(&mut cursor)?))
        } else {
            None
        };

        let value_type = ValueType::try_from(peek_byte(cursor)?)?;
        cursor.advance(1);
        let key = decode_string(&mut cursor)?;
        let item = decoder_for(value_type)(&mut cursor)?;

        let value = match expires_at {
            Some(at) => Value::with_expiry(item, at),
            None => Value::new(item),
        };
        if value.is_expired_at(now) {
            dropped += 1;
            continue;
        }
        values.insert(key, value);
    }

    debug!(keys = values.len(), expired = dropped, "Decoded snapshot");
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: Vec<(&str, Value)>) -> HashMap<String, Value> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn list(values: &[&str]) -> Item {
        Item::List(values.iter().copied().collect())
    }

    #[test]
    fn test_empty_snapshot_layout() {
        let bytes = save(&HashMap::new()).unwrap();
        assert!(bytes.starts_with(MAGIC));
        assert_eq!(bytes[MAGIC.len()], EOF_MARKER);
        assert!(load(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_mixed_items() {
        let future = UNIX_EPOCH + Duration::from_micros(to_micros(SystemTime::now()) as u64)
            + Duration::from_secs(3600);
        let original = entries(vec![
            ("text", Value::new(Item::string("hello world"))),
            ("number", Value::new(Item::string("-1234567"))),
            ("queue", Value::new(list(&["a", "b", "c"]))),
            ("empty", Value::new(list(&[]))),
            ("session", Value::with_expiry(Item::string("token"), future)),
        ]);

        let bytes = save(&original).unwrap();
        let loaded = load(&bytes).unwrap();

        assert_eq!(loaded.len(), original.len());
        for (key, value) in &original {
            let restored = &loaded[key];
            assert_eq!(restored.item(), value.item(), "item mismatch for {key}");
            assert_eq!(restored.expires_at(), value.expires_at());
        }
    }

    #[test]
    fn test_integer_form_survives_reload() {
        let original = entries(vec![("counter", Value::new(Item::string("41")))]);
        let loaded = load(&save(&original).unwrap()).unwrap();

        let item = loaded["counter"].item().unwrap();
        assert_eq!(item.incr(), Ok(42));
    }

    #[test]
    fn test_expired_entries_are_not_saved() {
        let past = SystemTime::now() - Duration::from_secs(1);
        let original = entries(vec![
            ("gone", Value::with_expiry(Item::string("x"), past)),
            ("kept", Value::new(Item::string("y"))),
        ]);

        let bytes = save(&original).unwrap();
        assert!(!bytes.windows(4).any(|w| w == b"gone"));

        let loaded = load(&bytes).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("kept"));
    }

    #[test]
    fn test_expired_records_dropped_on_load() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(EXPIRY_MARKER);
        encode_integer(1_000, &mut bytes);
        bytes.push(ValueType::String.as_byte());
        encode_string("old", &mut bytes).unwrap();
        encode_string("value", &mut bytes).unwrap();
        bytes.push(EOF_MARKER);
        let covered = bytes.clone();
        encode_checksum(&covered, &mut bytes);

        assert!(load(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(load(b"REDISLIT"), Err(SnapshotError::BadMagic));
        assert_eq!(load(b"NOTASNAPSHOT"), Err(SnapshotError::BadMagic));
    }

    #[test]
    fn test_checksum_mismatch() {
        let original = entries(vec![("key", Value::new(Item::string("abc")))]);
        let mut bytes = save(&original).unwrap();

        let pos = bytes.windows(3).position(|w| w == b"abc").unwrap();
        bytes[pos] = b'x';

        assert!(matches!(
            load(&bytes),
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_snapshot() {
        let original = entries(vec![("key", Value::new(list(&["a", "b"])))]);
        let bytes = save(&original).unwrap();

        // header, type byte, "key", then [len, "a", "b"] as 0x02 0x01 a 0x01 b
        let footer = MAGIC.len() + 1 + 4 + 5;
        assert_eq!(bytes[footer], EOF_MARKER);
        assert_eq!(load(&bytes[..footer]), Err(SnapshotError::Truncated));
        assert_eq!(load(MAGIC), Err(SnapshotError::Truncated));

        // cut inside the list payload
        let cut = bytes.windows(1).position(|w| w == b"b").unwrap();
        assert!(matches!(
            load(&bytes[..cut]),
            Err(SnapshotError::Encoding(EncodingError::UnexpectedEof { .. }))
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = save(&HashMap::new()).unwrap();
        bytes.push(0x00);
        assert_eq!(load(&bytes), Err(SnapshotError::TrailingBytes(1)));
    }

    #[test]
    fn test_unknown_type_byte() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(0x07);
        encode_string("key", &mut bytes).unwrap();
        assert_eq!(
            load(&bytes),
            Err(SnapshotError::Encoding(EncodingError::UnknownValueType(0x07)))
        );
    }
}
