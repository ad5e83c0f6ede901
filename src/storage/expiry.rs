//! Background Expiry Sweeper
//!
//! Lazy expiry only removes a key when somebody reads it. A key that expires
//! and is never touched again would stay in memory forever, so a background
//! task samples the store's expiry set on a fixed timer and deletes what has
//! expired ("active expiry").
//!
//! ## Cycle
//!
//! Every `interval` (default 100ms) the sweeper:
//! 1. Samples up to `sample_size` (default 20) random keys that carry an expiry
//! 2. Deletes the expired ones
//! 3. Samples again straight away while more than `repeat_threshold`
//!    (default 25%) of the sample was expired
//!
//! The repeat bounds memory held by dead keys when most of the keyspace is
//! expiring, at the cost of extra CPU in that case.

use crate::storage::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Time between cycles (default: 100ms)
    pub interval: Duration,

    /// Keys sampled per round (default: 20)
    pub sample_size: usize,

    /// Repeat within the same cycle while more than this fraction of a
    /// sample was expired (default: 0.25)
    pub repeat_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            sample_size: 20,
            repeat_threshold: 0.25,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use litekv::storage::{ExpiryConfig, ExpirySweeper, Store};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let store = Arc::new(Store::new());
    /// let sweeper = ExpirySweeper::start(Arc::clone(&store), ExpiryConfig::default());
    ///
    /// // Sweeper runs in the background...
    ///
    /// sweeper.stop();
    /// sweeper.stop(); // no-op
    /// # });
    /// ```
    pub fn start(store: Arc<Store>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(store, config, shutdown_rx));

        info!("Background expiry sweeper started");

        Self {
            shutdown_tx,
            stopped: AtomicBool::new(false),
        }
    }

    /// Stops the expiry sweeper. Only the first call has any effect.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        info!("Background expiry sweeper stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    store: Arc<Store>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = store.sweep_expired(config.sample_size, config.repeat_threshold);

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = store.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(store: Arc<Store>) -> ExpirySweeper {
    ExpirySweeper::start(store, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Item;
    use std::time::SystemTime;

    fn fast() -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let store = Arc::new(Store::new());
        let soon = SystemTime::now() + Duration::from_millis(50);

        for i in 0..10 {
            store.set_with_expiry(format!("key{i}"), Item::string("value"), soon);
        }
        store.set("persistent", Item::string("value"));
        assert_eq!(store.len(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast());

        tokio::time::sleep(Duration::from_millis(250)).await;

        // removed without ever being read
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().expiring, 0);
        assert!(store.exists("persistent"));
    }

    #[tokio::test]
    async fn test_sweeper_drains_mostly_expired_store() {
        let store = Arc::new(Store::new());
        let past = SystemTime::now() - Duration::from_secs(1);
        for i in 0..1000 {
            store.set_with_expiry(format!("key{i}"), Item::string("v"), past);
        }

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let store = Arc::new(Store::new());

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let soon = SystemTime::now() + Duration::from_millis(10);
        store.set_with_expiry("key", Item::string("value"), soon);

        tokio::time::sleep(Duration::from_millis(100)).await;

        // nothing swept it, so it is still in the map until read
        assert_eq!(store.len(), 1);
        assert!(store.get("key").is_none());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let store = Arc::new(Store::new());
        let sweeper = start_expiry_sweeper(store);

        assert!(!sweeper.is_stopped());
        sweeper.stop();
        sweeper.stop();
        assert!(sweeper.is_stopped());
    }
}
