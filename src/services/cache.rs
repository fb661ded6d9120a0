//! Keyed TTL cache with single-flight fills.
//!
//! Each key maps to a shared cell. The first caller for a missing or expired
//! key runs the fill; concurrent callers for the same key wait on that cell
//! instead of issuing their own fetch. Failed fills are not cached.
//!
//! `invalidate_all` detaches every cell. A fill already in flight still
//! completes for the callers waiting on it, but its result is never visible
//! to later callers.
//!
//! Keys come from clients, so every miss also sweeps dead cells: expired
//! entries, and empty cells left by a failed fill that nobody is waiting on.
//! The map therefore holds at most the keys requested within one TTL.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

type Cell<V> = Arc<OnceCell<CacheEntry<V>>>;

/// Fresh, or still being filled by a caller holding its own reference.
fn is_live<V>(cell: &Cell<V>) -> bool {
    match cell.get() {
        Some(entry) => !entry.is_expired(),
        None => Arc::strong_count(cell) > 1,
    }
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    cells: Mutex<HashMap<K, Cell<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cells: Mutex::new(HashMap::new()),
        }
    }

    async fn cell_for(&self, key: &K) -> Cell<V> {
        let mut cells = self.cells.lock().await;
        if let Some(cell) = cells.get(key) {
            if !cell.get().is_some_and(CacheEntry::is_expired) {
                return cell.clone();
            }
        }
        cells.retain(|_, cell| is_live(cell));
        let cell: Cell<V> = Arc::new(OnceCell::new());
        cells.insert(key.clone(), cell.clone());
        cell
    }

    /// Cached value for `key`, or the result of `fill` (shared with any
    /// concurrent caller for the same key).
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, fill: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.cell_for(&key).await;
        let ttl = self.ttl;
        let entry = cell
            .get_or_try_init(|| async move { fill().await.map(|v| CacheEntry::new(v, ttl)) })
            .await?;
        Ok(entry.value.clone())
    }

    /// Fresh cached value, without filling.
    #[cfg(test)]
    pub async fn peek(&self, key: &K) -> Option<V> {
        let cells = self.cells.lock().await;
        cells
            .get(key)
            .and_then(|cell| cell.get())
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    pub async fn invalidate_all(&self) {
        self.cells.lock().await.clear();
    }

    /// Number of keys holding a fresh value.
    pub async fn len(&self) -> usize {
        let cells = self.cells.lock().await;
        cells
            .values()
            .filter(|cell| cell.get().is_some_and(|e| !e.is_expired()))
            .count()
    }

    /// Cells currently held, live or not.
    #[cfg(test)]
    async fn held_cells(&self) -> usize {
        self.cells.lock().await.len()
    }
}
