//! Storage Module
//!
//! The typed item model, the concurrent expiring store and the background
//! expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                   Store                     │
//! │   RwLock<values + expiry set>               │
//! │   Value = Arc<Item> + Option<SystemTime>    │
//! └─────────────────────────────────────────────┘
//!            ▲                        ▲
//!            │ get / set / delete     │ sweep_expired
//!   ┌────────┴────────┐     ┌─────────┴─────────┐
//!   │  Command layer  │     │   ExpirySweeper   │
//!   │ (per connection)│     │ (background task) │
//!   └─────────────────┘     └───────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Items**: strings (text or integer form) and lists, each with its own lock
//! - **Lazy Expiry**: expired keys are removed when read
//! - **Active Expiry**: the sweeper samples keys that carry an expiry
//! - **Snapshots**: whole-store save/load through [`crate::persistence`]
//!
//! ## Example
//!
//! ```
//! use litekv::storage::{Item, Store};
//!
//! let store = Store::new();
//! let list = store.get_or_insert_with("queue", Item::list);
//! list.rpush(&["a".to_string(), "b".to_string()]).unwrap();
//!
//! assert_eq!(store.get("queue").unwrap().llen(), Ok(2));
//! ```

pub mod engine;
pub mod expiry;
pub mod item;

pub use engine::{
    ExpiryPolicy, SetCondition, SetOptions, SetOutcome, Store, StoreError, StoreStats, Value,
};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use item::{Item, ItemError, ItemResult, ListItem, StringItem};
