//! Concurrent Expiring Store
//!
//! The store maps keys to [`Value`]s (an item plus an optional absolute
//! expiry) and keeps a secondary set of the keys that carry an expiry, so the
//! active sweep only ever samples keys that can actually expire.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Store                     │
//! │  RwLock ─┬─ values:   HashMap<String, Value> │
//! │          └─ expiring: ExpiringKeys           │
//! └──────────────────────────────────────────────┘
//!                     │ Arc<Item>
//!                     ▼
//!        ┌─────────────────────────┐
//!        │ Item (own RwLock inside) │
//!        └─────────────────────────┘
//! ```
//!
//! Lookups take the shared lock, clone the `Value` (an `Arc` bump) and check
//! the expiry after releasing it. Only when the value turned out expired is
//! the exclusive lock taken, and the expiry is checked again under it before
//! deleting, so a concurrent overwrite is never lost.
//!
//! Items are mutated in place through their own lock, which means INCR on one
//! key and LPUSH on another never contend on the map lock beyond the lookup.

use super::item::{Item, ItemResult};
use crate::persistence::{disk, snapshot, SnapshotError};
use rand::seq::index;
use rand::Rng;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

/// The store's unit of storage: one item and an optional absolute expiry.
#[derive(Debug, Clone)]
pub struct Value {
    item: Arc<Item>,
    expires_at: Option<SystemTime>,
}

impl Value {
    pub fn new(item: Item) -> Self {
        Self {
            item: Arc::new(item),
            expires_at: None,
        }
    }

    pub fn with_expiry(item: Item, expires_at: SystemTime) -> Self {
        Self {
            item: Arc::new(item),
            expires_at: Some(expires_at),
        }
    }

    /// The item, or `None` once the expiry has passed.
    ///
    /// Never removes anything; deletion is the store's job.
    pub fn item(&self) -> Option<&Arc<Item>> {
        self.item_at(SystemTime::now())
    }

    pub fn item_at(&self, now: SystemTime) -> Option<&Arc<Item>> {
        (!self.is_expired_at(now)).then_some(&self.item)
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    #[inline]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.expires_at == other.expires_at && *self.item == *other.item
    }
}

/// Precondition for a conditional SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    #[default]
    Always,
    /// NX: only when the key is absent
    IfAbsent,
    /// XX: only when the key is present
    IfPresent,
}

/// What happens to the key's expiry on SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Drop any previous expiry
    #[default]
    Clear,
    /// Expire at the given instant
    At(SystemTime),
    /// KEEPTTL: carry over the previous live expiry
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    pub condition: SetCondition,
    pub expiry: ExpiryPolicy,
    /// Report the previous string value; a non-string previous value fails
    /// the whole SET with `WrongType`.
    pub return_previous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// Whether the precondition held and the value was written
    pub applied: bool,
    /// Previous value, filled only when `return_previous` was requested
    pub previous: Option<String>,
}

/// Errors from snapshot save/load.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Keys in the map, including expired ones not yet removed
    pub keys: usize,
    /// Keys tracked in the expiry set
    pub expiring: usize,
    /// Keys removed because they expired, since startup
    pub expired_total: u64,
}

/// Keys that carry an expiry, stored densely so a random sample costs
/// O(sample) rather than O(keys).
///
/// `index` maps each key to its slot in `keys`; removal swaps the last key
/// into the freed slot.
#[derive(Debug, Default)]
struct ExpiringKeys {
    keys: Vec<String>,
    index: HashMap<String, usize>,
}

impl ExpiringKeys {
    fn insert(&mut self, key: String) {
        if self.index.contains_key(&key) {
            return;
        }
        self.index.insert(key.clone(), self.keys.len());
        self.keys.push(key);
    }

    fn remove(&mut self, key: &str) -> bool {
        let Some(slot) = self.index.remove(key) else {
            return false;
        };
        self.keys.swap_remove(slot);
        if let Some(moved) = self.keys.get(slot) {
            self.index.insert(moved.clone(), slot);
        }
        true
    }

    fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    /// Up to `amount` distinct keys chosen uniformly at random.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, amount: usize) -> Vec<String> {
        let amount = amount.min(self.keys.len());
        index::sample(rng, self.keys.len(), amount)
            .into_iter()
            .map(|slot| self.keys[slot].clone())
            .collect()
    }
}

impl FromIterator<String> for ExpiringKeys {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut keys = ExpiringKeys::default();
        for key in iter {
            keys.insert(key);
        }
        keys
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    values: HashMap<String, Value>,
    expiring: ExpiringKeys,
}

impl StoreInner {
    fn live(&self, key: &str, now: SystemTime) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_expired_at(now))
    }

    fn insert(&mut self, key: String, value: Value) {
        if value.expires_at.is_some() {
            self.expiring.insert(key.clone());
        } else {
            self.expiring.remove(&key);
        }
        self.values.insert(key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.expiring.remove(key);
        self.values.remove(key)
    }
}

/// Thread-safe key-value store with lazy and active expiry.
///
/// Meant to be wrapped in an `Arc` and shared by every connection and by the
/// expiry sweeper.
///
/// # Example
///
/// ```
/// use litekv::storage::{Item, Store};
/// use std::time::{Duration, SystemTime};
///
/// let store = Store::new();
/// store.set("name", Item::string("litekv"));
/// assert_eq!(store.get("name").unwrap().get().unwrap(), "litekv");
///
/// let past = SystemTime::now() - Duration::from_secs(1);
/// store.set_with_expiry("session", Item::string("abc"), past);
/// assert!(store.get("session").is_none());
/// ```
#[derive(Debug)]
pub struct Store {
    inner: RwLock<StoreInner>,
    snapshot_path: PathBuf,
    expired_count: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates an empty store that snapshots to `data/data.rdb`.
    pub fn new() -> Self {
        Self::with_snapshot_path(disk::snapshot_path(disk::DEFAULT_DIR))
    }

    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            snapshot_path: path.into(),
            expired_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a live item.
    ///
    /// An expired value is deleted from the map and the expiry set before
    /// returning `None`.
    pub fn get(&self, key: &str) -> Option<Arc<Item>> {
        let value = self.read().values.get(key).cloned()?;

        if !value.is_expired() {
            return Some(value.item);
        }

        self.remove_if_expired(key);
        None
    }

    fn remove_if_expired(&self, key: &str) {
        let mut inner = self.write();
        // the key may have been overwritten since the read
        if inner.values.get(key).is_some_and(Value::is_expired) {
            inner.remove(key);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Lazily removed expired key");
        }
    }

    /// Stores `item` under `key`, replacing any previous value and expiry.
    pub fn set(&self, key: impl Into<String>, item: Item) {
        self.write().insert(key.into(), Value::new(item));
    }

    /// Stores `item` under `key`, expiring at `expires_at`.
    pub fn set_with_expiry(&self, key: impl Into<String>, item: Item, expires_at: SystemTime) {
        self.write()
            .insert(key.into(), Value::with_expiry(item, expires_at));
    }

    /// Conditional SET. The precondition check and the write happen under one
    /// write lock.
    pub fn set_with_options(
        &self,
        key: impl Into<String>,
        item: Item,
        options: SetOptions,
    ) -> ItemResult<SetOutcome> {
        let key = key.into();
        let now = SystemTime::now();
        let mut inner = self.write();

        let previous = inner.live(&key, now);
        let previous_expiry = previous.and_then(Value::expires_at);
        let previous_text = match previous {
            Some(value) if options.return_previous => Some(value.item.get()?),
            _ => None,
        };

        let proceed = match options.condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => previous.is_none(),
            SetCondition::IfPresent => previous.is_some(),
        };
        if !proceed {
            return Ok(SetOutcome {
                applied: false,
                previous: previous_text,
            });
        }

        let expires_at = match options.expiry {
            ExpiryPolicy::Clear => None,
            ExpiryPolicy::At(at) => Some(at),
            ExpiryPolicy::Keep => previous_expiry,
        };
        let value = Value {
            item: Arc::new(item),
            expires_at,
        };
        inner.insert(key, value);

        Ok(SetOutcome {
            applied: true,
            previous: previous_text,
        })
    }

    /// Returns the live item under `key`, creating it with `make` if absent.
    ///
    /// Creation happens under the write lock, so racing callers all receive
    /// the same item. A created item has no expiry.
    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> Item) -> Arc<Item> {
        if let Some(item) = self.get(key) {
            return item;
        }

        let now = SystemTime::now();
        let mut inner = self.write();
        if let Some(value) = inner.live(key, now) {
            return Arc::clone(&value.item);
        }

        let value = Value::new(make());
        let item = Arc::clone(&value.item);
        inner.insert(key.to_string(), value);
        item
    }

    /// Removes `key`. Returns `true` only if it held a live value.
    pub fn delete(&self, key: &str) -> bool {
        self.delete_many([key]) == 1
    }

    /// Removes every given key under one lock and counts the live ones.
    pub fn delete_many<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> usize {
        let now = SystemTime::now();
        let mut inner = self.write();
        keys.into_iter()
            .filter_map(|key| inner.remove(key))
            .filter(|value| !value.is_expired_at(now))
            .count()
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of keys in the map, including expired keys not yet removed.
    pub fn len(&self) -> usize {
        self.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is currently in the expiry set.
    pub fn is_tracking_expiry(&self, key: &str) -> bool {
        self.read().expiring.contains(key)
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.read();
        StoreStats {
            keys: inner.values.len(),
            expiring: inner.expiring.len(),
            expired_total: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Drops every key, leaving a fresh empty store behind.
    ///
    /// Intended for test isolation.
    pub fn reset(&self) {
        *self.write() = StoreInner::default();
        self.expired_count.store(0, Ordering::Relaxed);
    }

    /// One active-expiry cycle.
    ///
    /// Samples up to `sample_size` random keys from the expiry set and
    /// deletes the expired ones. While more than `repeat_threshold` of a
    /// sample was expired, samples again. Keys in the set whose value no
    /// longer has an expiry are dropped from the set.
    ///
    /// Returns the number of keys removed.
    pub fn sweep_expired(&self, sample_size: usize, repeat_threshold: f64) -> usize {
        let mut rng = rand::thread_rng();
        let mut removed = 0;

        loop {
            let now = SystemTime::now();
            let mut inner = self.write();

            let sample = inner.expiring.sample(&mut rng, sample_size);
            if sample.is_empty() {
                break;
            }

            let mut expired = 0;
            for key in &sample {
                let state = inner
                    .values
                    .get(key.as_str())
                    .map(|value| (value.is_expired_at(now), value.expires_at.is_some()));
                match state {
                    Some((true, _)) => {
                        inner.remove(key);
                        expired += 1;
                    }
                    Some((false, true)) => {}
                    // stale entry: key gone or no longer expiring
                    _ => {
                        inner.expiring.remove(key);
                    }
                }
            }
            drop(inner);

            removed += expired;
            if expired as f64 <= sample.len() as f64 * repeat_threshold {
                break;
            }
        }

        if removed > 0 {
            self.expired_count
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Replaces the whole map with the snapshot on disk.
    ///
    /// Only valid at startup: the map is swapped wholesale. A missing file
    /// leaves an empty store. On any error the current contents are kept.
    pub fn load_from_disk(&self) -> Result<usize, StoreError> {
        let values = match disk::read(&self.snapshot_path)? {
            Some(data) => snapshot::load(&data)?,
            None => HashMap::new(),
        };

        let expiring = values
            .iter()
            .filter(|(_, value)| value.expires_at.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        let count = values.len();

        *self.write() = StoreInner { values, expiring };
        info!(keys = count, path = %self.snapshot_path.display(), "Snapshot loaded");
        Ok(count)
    }

    /// Writes a consistent snapshot of the store to disk.
    ///
    /// The map is encoded under the read lock; the file is written after it
    /// is released.
    pub fn save_to_disk(&self) -> Result<(), StoreError> {
        let data = {
            let inner = self.read();
            snapshot::save(&inner.values).map_err(SnapshotError::from)?
        };

        disk::write(&self.snapshot_path, &data)?;
        info!(bytes = data.len(), path = %self.snapshot_path.display(), "Snapshot saved");
        Ok(())
    }
}
