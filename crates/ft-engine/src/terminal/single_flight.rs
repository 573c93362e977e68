//! Keyed single-flight creation
//!
//! At most one creation per key is in flight; concurrent callers for the
//! same key await the same shared outcome. A creation that does not
//! resolve within the pending window is cancelled and its marker dropped,
//! so a stuck attempt cannot wedge later ones.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};

use ft_core::{FtError, FtResult};

type SharedOutcome<V> = Shared<BoxFuture<'static, FtResult<V>>>;

struct Pending<V: Clone> {
    id: u64,
    started: Instant,
    outcome: SharedOutcome<V>,
}

/// Deduplicates concurrent creations by key
pub struct SingleFlight<K, V: Clone> {
    pending: Mutex<HashMap<K, Pending<V>>>,
    next_id: AtomicU64,
    window: Duration,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create with the given pending window
    pub fn new(window: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            window,
        }
    }

    /// Return `existing()` if it yields a value, join an in-flight creation
    /// for `key`, or start `create` as the new one
    ///
    /// `existing` runs under the pending lock. A successful `create` must
    /// make its value visible to `existing` before resolving.
    pub async fn run<E, F, Fut>(&self, key: K, existing: E, create: F) -> FtResult<V>
    where
        E: FnOnce() -> Option<V>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = FtResult<V>> + Send + 'static,
    {
        let (id, outcome) = {
            let Ok(mut pending) = self.pending.lock() else {
                return Err(FtError::InvalidRequest("creation state poisoned".into()));
            };

            match pending.get(&key) {
                Some(entry) if entry.started.elapsed() < self.window => {
                    tracing::debug!("Joining in-flight creation for {}", key);
                    (entry.id, entry.outcome.clone())
                }
                stale => {
                    if stale.is_some() {
                        tracing::warn!("Discarding stale pending creation for {}", key);
                        pending.remove(&key);
                    }
                    if let Some(value) = existing() {
                        return Ok(value);
                    }

                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.spawn(create());
                    pending.insert(
                        key.clone(),
                        Pending {
                            id,
                            started: Instant::now(),
                            outcome: outcome.clone(),
                        },
                    );
                    (id, outcome)
                }
            }
        };

        let result = outcome.await;
        self.finish(&key, id);
        result
    }

    /// Number of creations in flight
    pub fn in_flight(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn spawn<Fut>(&self, create: Fut) -> SharedOutcome<V>
    where
        Fut: Future<Output = FtResult<V>> + Send + 'static,
    {
        let window = self.window;
        let task = tokio::spawn(async move {
            tokio::time::timeout(window, create)
                .await
                .unwrap_or(Err(FtError::Timeout(window)))
        });
        async move {
            task.await
                .unwrap_or_else(|e| Err(FtError::Transport(format!("creation task failed: {}", e))))
        }
        .boxed()
        .shared()
    }

    fn finish(&self, key: &K, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            if pending.get(key).is_some_and(|entry| entry.id == id) {
                pending.remove(key);
            }
        }
    }
}
