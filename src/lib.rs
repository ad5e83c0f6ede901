//! # LiteKV - A Small In-Memory Key-Value Server
//!
//! LiteKV speaks a Redis-like request/response protocol over TCP and stores
//! strings, integers and lists with optional per-key expiry. The whole store
//! can be written to, and recovered from, a checksummed binary snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                               LiteKV                                │
//! │                                                                     │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐              │
//! │  │   Server    │───>│ Connection  │───>│   Router    │              │
//! │  │ (Listener)  │    │  Handler    │    │ + handlers  │              │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘              │
//! │                            │                  │                     │
//! │                            ▼                  ▼                     │
//! │                     ┌─────────────┐    ┌──────────────────────┐     │
//! │                     │  Protocol   │    │        Store         │     │
//! │                     │   Parser    │    │  RwLock<key -> Value>│     │
//! │                     └─────────────┘    │  + expiring key set  │     │
//! │                                        └───┬──────────────▲───┘     │
//! │                                            │              │         │
//! │                      ┌─────────────────────▼──┐   ┌───────┴───────┐ │
//! │                      │ Persistence (snapshot) │   │ ExpirySweeper │ │
//! │                      │   data/data.rdb        │   │ (tokio task)  │ │
//! │                      └────────────────────────┘   └───────────────┘ │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use litekv::commands::Router;
//! use litekv::server::Server;
//! use litekv::storage::{start_expiry_sweeper, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let store = Arc::new(Store::new());
//!     let sweeper = start_expiry_sweeper(Arc::clone(&store));
//!
//!     let server = Server::bind("127.0.0.1:6379", Router::new(store)).await?;
//!     server
//!         .serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!
//!     sweeper.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `ECHO message`
//! - `GET key`
//! - `SET key value [NX|XX] [GET] [EX seconds|PX milliseconds|EXAT unix-seconds|PXAT unix-milliseconds|KEEPTTL]`
//! - `INCR key`, `DECR key`
//! - `EXISTS key [key ...]`, `DEL key [key ...]`
//! - `LPUSH key value [value ...]`, `RPUSH key value [value ...]`
//! - `LRANGE key start stop`, `LLEN key`
//! - `SAVE`
//!
//! ## Module Overview
//!
//! - [`protocol`]: wire message type and incremental parser
//! - [`persistence`]: binary encoding primitives and the snapshot format
//! - [`storage`]: items, the expiring store and the active-expiry sweeper
//! - [`commands`]: command handlers and the router
//! - [`connection`]: per-client read/dispatch/write loop
//! - [`server`]: accept loop and graceful shutdown
//!
//! ## Expiry
//!
//! Keys with an expiry are removed in two ways:
//! 1. **Lazy**: a read that finds an expired key deletes it
//! 2. **Active**: a background task samples expiring keys ten times a second
//!    and keeps sweeping while more than a quarter of each sample was dead

pub mod commands;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::Router;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Message, MessageParser, ParseError};
pub use server::Server;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, Item, Store};

/// The default port LiteKV listens on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host LiteKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of LiteKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
