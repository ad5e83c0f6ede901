//! Wire Protocol Implementation
//!
//! A textual, CRLF-framed request/response protocol. Clients send an array of
//! bulk strings (command name first, then arguments) and receive exactly one
//! message per request.
//!
//! ## Modules
//!
//! - `types`: Defines the `Message` enum and serialization
//! - `parser`: Strict decoder for incoming messages
//!
//! ## Example
//!
//! ```
//! use litekv::protocol::{deserialise, Message};
//!
//! let request = deserialise(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(request, Message::bulk_array(["GET", "name"]));
//!
//! let reply = Message::bulk_string("value");
//! assert_eq!(reply.serialize(), b"$5\r\nvalue\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{
    deserialise, deserialise_one, parse_message, MessageParser, ParseError, ParseResult,
    MAX_BULK_SIZE,
};
pub use types::Message;
