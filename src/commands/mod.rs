//! Command Module
//!
//! This module implements the command processing layer.
//! It receives decoded requests, executes them against the store,
//! and returns the reply message.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Parser         │  (protocol module)
//! └────────┬────────┘
//!          │ Message::Array
//!          ▼
//! ┌─────────────────┐
//! │ Router          │  lower-case name -> handler
//! └────────┬────────┘
//!          │ &[String]
//!          ▼
//! ┌─────────────────┐
//! │ handler::*      │  one function per command
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Store           │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;
pub mod router;

pub use handler::{Handler, COMMANDS};
pub use router::Router;
