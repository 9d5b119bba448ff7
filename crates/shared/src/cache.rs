//! Query cache with subscriber notification.
//!
//! An explicit, injectable key-value store for read-through caching of
//! expensive queries (balances, current subscription). Components that
//! mutate the underlying data publish an invalidation; components that
//! render derived state subscribe and re-derive from the freshest value.
//! Keys are path-like strings (`"user:<id>:balance"`), so a whole family
//! can be dropped with [`QueryCache::invalidate_prefix`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

/// Default TTL for cached entries.
const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Maximum cache entries to prevent memory exhaustion: past this bound the
/// oldest entries are evicted.
const MAX_CACHE_ENTRIES: usize = 10_000;

/// Notification sent to subscribers when a key changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(String),
    Invalidated(String),
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Updated(k) | CacheEvent::Invalidated(k) => k,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedEntry {
    value: serde_json::Value,
    stored_at: Instant,
}

/// Bounded, TTL-expiring key-value cache with change notifications.
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<RwLock<HashMap<String, CachedEntry>>>,
    events: broadcast::Sender<CacheEvent>,
    ttl: Duration,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            events,
            ttl,
        }
    }

    /// Fetch a cached value. Expired entries are treated as absent.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Store a value and notify subscribers.
    pub async fn put(&self, key: &str, value: serde_json::Value) {
        let mut entries = self.entries.write().await;

        if entries.len() >= MAX_CACHE_ENTRIES && !entries.contains_key(key) {
            // Evict the oldest entry to stay bounded.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone())
            {
                tracing::debug!(evicted = %oldest, "Query cache at capacity");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        drop(entries);

        let _ = self.events.send(CacheEvent::Updated(key.to_string()));
    }

    /// Drop a single key and notify subscribers.
    pub async fn invalidate(&self, key: &str) {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            let _ = self.events.send(CacheEvent::Invalidated(key.to_string()));
        }
    }

    /// Drop every key under a prefix. Used after payment fulfilment, where
    /// all balance- and subscription-derived state for a user is stale at
    /// once.
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.entries.write().await;
        let stale: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &stale {
            entries.remove(key);
        }
        drop(entries);

        for key in stale {
            let _ = self.events.send(CacheEvent::Invalidated(key));
        }
    }

    /// Subscribe to change notifications. Slow subscribers that fall more
    /// than the channel capacity behind observe a `Lagged` error and should
    /// re-read through the cache.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = QueryCache::default();
        cache.put("user:1:balance", serde_json::json!(70)).await;

        assert_eq!(
            cache.get("user:1:balance").await,
            Some(serde_json::json!(70))
        );
        assert_eq!(cache.get("user:2:balance").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = QueryCache::new(Duration::from_secs(30));
        cache.put("k", serde_json::json!("v")).await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.get("k").await.is_some(), "Not yet expired");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.is_none(), "Expired after TTL");
    }

    #[tokio::test]
    async fn test_subscribers_notified_on_put_and_invalidate() {
        let cache = QueryCache::default();
        let mut rx = cache.subscribe();

        cache.put("user:1:balance", serde_json::json!(100)).await;
        cache.invalidate("user:1:balance").await;

        assert_eq!(
            rx.recv().await.unwrap(),
            CacheEvent::Updated("user:1:balance".to_string())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            CacheEvent::Invalidated("user:1:balance".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalidate_missing_key_is_silent() {
        let cache = QueryCache::default();
        let mut rx = cache.subscribe();

        cache.invalidate("absent").await;
        cache.put("present", serde_json::json!(1)).await;

        // The first event seen is the put, not an invalidation of a key
        // that was never cached.
        assert_eq!(
            rx.recv().await.unwrap(),
            CacheEvent::Updated("present".to_string())
        );
    }

    #[tokio::test]
    async fn test_invalidate_prefix() {
        let cache = QueryCache::default();
        cache.put("user:1:balance", serde_json::json!(10)).await;
        cache.put("user:1:subscription", serde_json::json!("x")).await;
        cache.put("user:2:balance", serde_json::json!(20)).await;

        cache.invalidate_prefix("user:1:").await;

        assert_eq!(cache.get("user:1:balance").await, None);
        assert_eq!(cache.get("user:1:subscription").await, None);
        assert_eq!(
            cache.get("user:2:balance").await,
            Some(serde_json::json!(20)),
            "Other users' keys untouched"
        );
    }
}
