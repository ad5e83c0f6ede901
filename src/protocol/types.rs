//! Wire Message Types
//!
//! This module defines the five message variants that travel over the wire
//! between clients and the server, plus their textual serialization.
//!
//! ## Protocol Format
//!
//! Each message starts with a one-byte sigil:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array
//!
//! Every header line is terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Simple String: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Null Bulk String: `$-1\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used by every header line.
pub const CRLF: &[u8] = b"\r\n";

/// Replaces CR and LF with spaces so the text fits on one header line.
fn single_line(s: String) -> String {
    if s.contains(['\r', '\n']) {
        s.replace(['\r', '\n'], " ")
    } else {
        s
    }
}

/// Writes one line of status or error text, never letting it end the line early.
fn put_line_text(buf: &mut Vec<u8>, text: &str) {
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
}

/// Message type sigils
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One unit of the request/response protocol.
///
/// Requests are always arrays of bulk strings; replies may be any variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Short status text. Must not contain CR or LF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error text, conventionally starting with an error kind such as `ERR`.
    /// Must not contain CR or LF.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Length-prefixed binary-safe payload.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// The null bulk string, used for "missing".
    /// Format: `$-1\r\n`
    Null,

    /// Ordered sequence of nested messages.
    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<Message>),
}

impl Message {
    /// Creates a simple string reply. CR and LF become spaces.
    ///
    /// # Example
    /// ```
    /// use litekv::protocol::Message;
    /// let ok = Message::simple_string("OK");
    /// assert_eq!(ok.serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        Message::SimpleString(single_line(s.into()))
    }

    /// Creates an error reply. CR and LF become spaces.
    pub fn error(s: impl Into<String>) -> Self {
        Message::Error(single_line(s.into()))
    }

    pub fn integer(n: i64) -> Self {
        Message::Integer(n)
    }

    /// Creates a bulk string reply.
    ///
    /// # Example
    /// ```
    /// use litekv::protocol::Message;
    /// let bulk = Message::bulk_string("hello");
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        Message::BulkString(data.into())
    }

    pub fn null() -> Self {
        Message::Null
    }

    pub fn array(values: Vec<Message>) -> Self {
        Message::Array(values)
    }

    /// Builds an array of bulk strings, the shape of every request.
    pub fn bulk_array<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        Message::Array(parts.into_iter().map(Message::bulk_string).collect())
    }

    pub fn ok() -> Self {
        Message::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        Message::SimpleString("PONG".to_string())
    }

    /// Serializes the message to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the message into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Message::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                put_line_text(buf, s);
                buf.extend_from_slice(CRLF);
            }
            Message::Error(s) => {
                buf.push(prefix::ERROR);
                put_line_text(buf, s);
                buf.extend_from_slice(CRLF);
            }
            Message::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Message::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Message::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Message::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Message::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Message::Error(_))
    }

    /// Attempts to view the payload of a SimpleString or BulkString as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Message::SimpleString(s) => Some(s),
            Message::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Message::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes self and returns the inner elements if this is an Array.
    pub fn into_array(self) -> Option<Vec<Message>> {
        match self {
            Message::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::SimpleString(s) => write!(f, "{}", s),
            Message::Error(s) => write!(f, "(error) {}", s),
            Message::Integer(n) => write!(f, "(integer) {}", n),
            Message::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Message::Null => write!(f, "(nil)"),
            Message::Array(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
