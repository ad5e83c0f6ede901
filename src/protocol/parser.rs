//! Wire Message Parser
//!
//! The parser reads one message from the front of a buffer and reports how
//! many bytes it consumed. It is strict about framing: every header line must
//! end in CRLF, simple strings and errors may not contain a bare CR or LF,
//! integers are an optional sign followed by decimal digits, and a bulk
//! string payload must be followed by CRLF exactly at its declared length.
//!
//! ## Entry points
//!
//! - [`parse_message`] is incremental: `Ok(None)` means "need more bytes".
//!   The connection loop uses it while bytes trickle in.
//! - [`deserialise_one`] decodes one message and returns the unconsumed tail.
//!   A short buffer is a [`ParseError::Incomplete`] error.
//! - [`deserialise`] decodes exactly one message; leftover bytes are an error.

use crate::protocol::types::{prefix, Message, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding wire messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The buffer ends before the message does
    #[error("incomplete message")]
    Incomplete,

    /// Unknown type sigil
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Integer line with a non-digit, no digits, or out of range
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length below -1
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Negative array length
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Framing violation (stray CR/LF, missing terminator, ...)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Bytes left over after a complete message
    #[error("{0} unexpected trailing bytes after message")]
    TrailingBytes(usize),

    /// The message exceeds the maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Stateful parser tracking array nesting depth.
#[derive(Debug, Default)]
pub struct MessageParser {
    depth: usize,
}

impl MessageParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one message from the front of `buf`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((message, consumed)))` - a full message was decoded
    /// - `Ok(None)` - `buf` holds only a prefix of a message
    /// - `Err(e)` - `buf` can never become a valid message
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => Ok(parse_text(buf)?.map(|(s, n)| (Message::SimpleString(s), n))),
            prefix::ERROR => Ok(parse_text(buf)?.map(|(s, n)| (Message::Error(s), n))),
            prefix::INTEGER => parse_integer_message(buf),
            prefix::BULK_STRING => parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
        let (line, mut consumed) = match read_line(buf, 1)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let count = parse_integer(line)?;
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        // each element takes at least 3 bytes; bound the allocation
        let mut elements = Vec::with_capacity(count.min(buf.len() / 3 + 1));

        self.depth += 1;
        for _ in 0..count {
            match self.parse_value(&buf[consumed..])? {
                Some((value, element_consumed)) => {
                    elements.push(value);
                    consumed += element_consumed;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((Message::Array(elements), consumed)))
    }
}

/// Parses `+<text>\r\n` or `-<text>\r\n`.
fn parse_text(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    match read_line(buf, 1)? {
        Some((line, consumed)) => {
            let s = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((s.to_string(), consumed)))
        }
        None => Ok(None),
    }
}

/// Parses `:[+|-]<digits>\r\n`.
fn parse_integer_message(buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
    match read_line(buf, 1)? {
        Some((line, consumed)) => Ok(Some((Message::Integer(parse_integer(line)?), consumed))),
        None => Ok(None),
    }
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
    let (line, data_start) = match read_line(buf, 1)? {
        Some(found) => found,
        None => return Ok(None),
    };

    let length = parse_integer(line)?;
    if length == -1 {
        return Ok(Some((Message::Null, data_start)));
    }
    if length < -1 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let data_end = data_start + length;
    // the terminator must sit exactly at `length` bytes; reject early when
    // the byte that should be CR has already arrived
    if buf.len() > data_end && buf[data_end] != b'\r' {
        return Err(ParseError::ProtocolError(
            "bulk string payload longer than declared length".to_string(),
        ));
    }
    let total_needed = data_end + CRLF.len();
    if buf.len() < total_needed {
        return Ok(None);
    }
    if &buf[data_end..total_needed] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((Message::BulkString(data), total_needed)))
}

/// Reads a CRLF-terminated line starting at `start`.
///
/// Returns the line contents and the offset just past its CRLF. A bare CR or
/// LF inside the line is a protocol error.
fn read_line(buf: &[u8], start: usize) -> ParseResult<Option<(&[u8], usize)>> {
    let rest = &buf[start..];
    let pos = match rest.iter().position(|&b| b == b'\r' || b == b'\n') {
        Some(pos) => pos,
        None => return Ok(None),
    };

    if rest[pos] == b'\n' {
        return Err(ParseError::ProtocolError("unexpected LF before CR".to_string()));
    }
    match rest.get(pos + 1) {
        None => Ok(None),
        Some(b'\n') => Ok(Some((&rest[..pos], start + pos + 2))),
        Some(_) => Err(ParseError::ProtocolError("CR not followed by LF".to_string())),
    }
}

/// Parses an optionally signed run of ASCII digits into an i64.
fn parse_integer(line: &[u8]) -> ParseResult<i64> {
    let invalid = || ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned());

    let (negative, digits) = match line.first() {
        Some(b'-') => (true, &line[1..]),
        Some(b'+') => (false, &line[1..]),
        _ => (false, line),
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    // accumulate as a negative number so i64::MIN fits
    let mut acc: i64 = 0;
    for &byte in digits {
        if !byte.is_ascii_digit() {
            return Err(invalid());
        }
        acc = acc
            .checked_mul(10)
            .and_then(|v| v.checked_sub(i64::from(byte - b'0')))
            .ok_or_else(invalid)?;
    }

    if negative {
        Ok(acc)
    } else {
        acc.checked_neg().ok_or_else(invalid)
    }
}

/// Parses a single message from the front of `buf` (incremental).
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(Message, usize)>> {
    MessageParser::new().parse(buf)
}

/// Decodes one message and returns it with the unconsumed remainder.
pub fn deserialise_one(buf: &[u8]) -> ParseResult<(Message, &[u8])> {
    match parse_message(buf)? {
        Some((message, consumed)) => Ok((message, &buf[consumed..])),
        None => Err(ParseError::Incomplete),
    }
}

/// Decodes a buffer that must hold exactly one message.
pub fn deserialise(buf: &[u8]) -> ParseResult<Message> {
    let (message, rest) = deserialise_one(buf)?;
    if !rest.is_empty() {
        return Err(ParseError::TrailingBytes(rest.len()));
    }
    Ok(message)
}
