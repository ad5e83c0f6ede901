//! Stored Item Types
//!
//! An [`Item`] is the data stored under a key together with the operations
//! its type supports. There are two kinds:
//!
//! - **String**: holds either text or a 64-bit integer. The representation is
//!   chosen once, at construction, by trying to parse the input as an
//!   integer. Only the integer form supports INCR/DECR.
//! - **List**: a double-ended sequence of strings.
//!
//! Every capability is exposed on `Item` itself. Calling one the variant does
//! not support returns [`ItemError::WrongType`] instead of panicking, and the
//! command layer turns that into a wrong-type reply.
//!
//! Each item carries its own lock, separate from the store's map lock, so
//! mutating one key never blocks readers of another.

use crate::persistence::encoding::{
    decode_integer, decode_length, decode_string, encode_integer, encode_length, encode_string,
    is_integer_encoded, EncodingResult, ValueType,
};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Result of applying a capability to an item.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ItemError {
    /// The item's type does not support this operation
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// INCR/DECR on a string that is not in integer form
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    /// INCR/DECR would leave the i64 range
    #[error("ERR increment or decrement would overflow")]
    Overflow,
}

pub type ItemResult<T> = Result<T, ItemError>;

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StringRepr {
    Text(String),
    Integer(i64),
}

/// A string value, stored as an integer when it parses as one.
#[derive(Debug)]
pub struct StringItem {
    repr: RwLock<StringRepr>,
}

impl StringItem {
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into();
        let repr = match s.parse::<i64>() {
            Ok(n) => StringRepr::Integer(n),
            Err(_) => StringRepr::Text(s),
        };
        Self {
            repr: RwLock::new(repr),
        }
    }

    pub fn from_integer(n: i64) -> Self {
        Self {
            repr: RwLock::new(StringRepr::Integer(n)),
        }
    }

    /// True if the value is held in integer form.
    pub fn is_integer(&self) -> bool {
        matches!(*read_lock(&self.repr), StringRepr::Integer(_))
    }

    pub fn get(&self) -> String {
        match &*read_lock(&self.repr) {
            StringRepr::Text(s) => s.clone(),
            StringRepr::Integer(n) => n.to_string(),
        }
    }

    /// Adds `delta` in place and returns the new value.
    pub fn incr_by(&self, delta: i64) -> ItemResult<i64> {
        let mut repr = write_lock(&self.repr);
        match &mut *repr {
            StringRepr::Integer(n) => {
                *n = n.checked_add(delta).ok_or(ItemError::Overflow)?;
                Ok(*n)
            }
            StringRepr::Text(_) => Err(ItemError::NotAnInteger),
        }
    }

    fn serialise_into(&self, out: &mut Vec<u8>) -> EncodingResult<()> {
        match &*read_lock(&self.repr) {
            StringRepr::Text(s) => encode_string(s, out),
            StringRepr::Integer(n) => {
                encode_integer(*n, out);
                Ok(())
            }
        }
    }

    /// Decodes a string payload, integer-encoded or length-prefixed.
    pub fn deserialise(buf: &mut &[u8]) -> EncodingResult<Self> {
        if is_integer_encoded(buf) {
            Ok(Self::from_integer(decode_integer(buf)?))
        } else {
            Ok(Self::new(decode_string(buf)?))
        }
    }
}

/// A list of strings with O(1) push at both ends.
#[derive(Debug, Default)]
pub struct ListItem {
    data: RwLock<VecDeque<String>>,
}

impl ListItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes each value to the head in order, so `a b c` ends up `c b a`.
    pub fn lpush(&self, values: &[String]) -> usize {
        let mut data = write_lock(&self.data);
        for value in values {
            data.push_front(value.clone());
        }
        data.len()
    }

    /// Pushes each value to the tail in order.
    pub fn rpush(&self, values: &[String]) -> usize {
        let mut data = write_lock(&self.data);
        data.extend(values.iter().cloned());
        data.len()
    }

    /// Returns the inclusive range `[start, stop]`.
    ///
    /// Negative indices count from the end (`-1` is the last element). After
    /// resolving, `start` is clamped to 0 and `stop` to the last index; an
    /// empty list or `start > stop` yields an empty result.
    pub fn lrange(&self, start: i64, stop: i64) -> Vec<String> {
        let data = read_lock(&self.data);
        let len = data.len() as i64;

        let start = if start < 0 { len + start } else { start }.max(0);
        let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);

        if start > stop {
            return Vec::new();
        }

        data.range(start as usize..=stop as usize).cloned().collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn serialise_into(&self, out: &mut Vec<u8>) -> EncodingResult<()> {
        let data = read_lock(&self.data);
        encode_length(data.len(), out)?;
        for value in data.iter() {
            encode_string(value, out)?;
        }
        Ok(())
    }

    pub fn deserialise(buf: &mut &[u8]) -> EncodingResult<Self> {
        let count = decode_length(buf)?;
        // every element takes at least one byte
        let mut data = VecDeque::with_capacity(count.min(buf.len()));
        for _ in 0..count {
            data.push_back(decode_string(buf)?);
        }
        Ok(Self {
            data: RwLock::new(data),
        })
    }
}

impl<S: Into<String>> FromIterator<S> for ListItem {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            data: RwLock::new(iter.into_iter().map(Into::into).collect()),
        }
    }
}

/// A value stored under a key.
#[derive(Debug)]
pub enum Item {
    String(StringItem),
    List(ListItem),
}

impl Item {
    /// Creates a string item, in integer form if `s` parses as an i64.
    pub fn string(s: impl Into<String>) -> Self {
        Item::String(StringItem::new(s))
    }

    pub fn list() -> Self {
        Item::List(ListItem::new())
    }

    /// Name reported for the item's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Item::String(_) => "string",
            Item::List(_) => "list",
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Item::String(_) => ValueType::String,
            Item::List(_) => ValueType::List,
        }
    }

    pub fn get(&self) -> ItemResult<String> {
        match self {
            Item::String(s) => Ok(s.get()),
            Item::List(_) => Err(ItemError::WrongType),
        }
    }

    pub fn incr(&self) -> ItemResult<i64> {
        self.incr_by(1)
    }

    pub fn decr(&self) -> ItemResult<i64> {
        self.incr_by(-1)
    }

    fn incr_by(&self, delta: i64) -> ItemResult<i64> {
        match self {
            Item::String(s) => s.incr_by(delta),
            Item::List(_) => Err(ItemError::WrongType),
        }
    }

    pub fn lpush(&self, values: &[String]) -> ItemResult<usize> {
        match self {
            Item::List(l) => Ok(l.lpush(values)),
            Item::String(_) => Err(ItemError::WrongType),
        }
    }

    pub fn rpush(&self, values: &[String]) -> ItemResult<usize> {
        match self {
            Item::List(l) => Ok(l.rpush(values)),
            Item::String(_) => Err(ItemError::WrongType),
        }
    }

    pub fn lrange(&self, start: i64, stop: i64) -> ItemResult<Vec<String>> {
        match self {
            Item::List(l) => Ok(l.lrange(start, stop)),
            Item::String(_) => Err(ItemError::WrongType),
        }
    }

    pub fn llen(&self) -> ItemResult<usize> {
        match self {
            Item::List(l) => Ok(l.len()),
            Item::String(_) => Err(ItemError::WrongType),
        }
    }

    /// Encodes the payload (without the type byte).
    pub fn serialise(&self) -> EncodingResult<Vec<u8>> {
        let mut out = Vec::new();
        self.serialise_into(&mut out)?;
        Ok(out)
    }

    pub fn serialise_into(&self, out: &mut Vec<u8>) -> EncodingResult<()> {
        match self {
            Item::String(s) => s.serialise_into(out),
            Item::List(l) => l.serialise_into(out),
        }
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Item::String(a), Item::String(b)) => *read_lock(&a.repr) == *read_lock(&b.repr),
            (Item::List(a), Item::List(b)) => *read_lock(&a.data) == *read_lock(&b.data),
            _ => false,
        }
    }
}

impl From<StringItem> for Item {
    fn from(item: StringItem) -> Self {
        Item::String(item)
    }
}

impl From<ListItem> for Item {
    fn from(item: ListItem) -> Self {
        Item::List(item)
    }
}
