//! Persistence Module
//!
//! Binary snapshot support for the store:
//!
//! - `encoding`: length, string and integer primitives plus the CRC-64 checksum
//! - `snapshot`: whole-store save/load with header, records, footer and checksum
//! - `disk`: reading and writing the snapshot file
//!
//! ## Snapshot layout
//!
//! ```text
//! "REDISLITE"
//! ( [0xFC <integer: expiry, microseconds since epoch>]
//!   <type byte> <string: key> <item payload> )*
//! 0xFF <integer: CRC-64 of every preceding byte>
//! ```

pub mod disk;
pub mod encoding;
pub mod snapshot;

pub use encoding::{EncodingError, ValueType};
pub use snapshot::SnapshotError;
