//! Keyed single-flight coordination (spec.md §4.7, §5, §9 "single-flight
//! via keyed mutexes").
//!
//! The classical map-of-key-to-mutex pattern: concurrent callers for the
//! same key serialize on a per-key lock rather than a single global one, so
//! unrelated keys never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct SingleFlight {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access for `key`. Concurrent callers for the
    /// same key queue on the same lock; unrelated keys never block each
    /// other. The caller is expected to re-check its cache inside `f` —
    /// this only guarantees mutual exclusion, not that `f` runs at most
    /// once ever.
    pub async fn run<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;
        f().await
    }
}
