//! Client Connections
//!
//! Every accepted socket is served by its own task running a
//! [`ConnectionHandler`]. Tasks share the router (and through it the store)
//! behind an `Arc`, so requests from different clients run in parallel.
//!
//! ```text
//!   Server::serve ── accept ──► spawn(handle_connection)
//!                                      │
//!             ┌────────────────────────┴────────────────────────┐
//!             │ read_buf ─► MessageParser ─► Router ─► write_all │
//!             │     ▲                                     │      │
//!             │     └─────────────────────────────────────┘      │
//!             └──────────────────────────────────────────────────┘
//!                 ends on EOF, I/O error or shutdown while idle
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
