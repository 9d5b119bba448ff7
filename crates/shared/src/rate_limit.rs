//! Request rate limiting.
//!
//! Fixed one-minute windows keyed by user and scope. Two backends: an
//! in-memory map for tests and single-node self-hosted deployments, and
//! Redis for multi-instance deployments where the window must be shared.

use std::collections::HashMap;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Requests left in the current minute window.
    pub remaining_minute: i64,
    /// Set when rejected: seconds until the window rolls over.
    pub retry_after_seconds: Option<u64>,
}

enum Backend {
    Memory(Mutex<HashMap<(String, i64), i64>>),
    Redis(ConnectionManager),
}

/// Fixed-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<Backend>,
}

impl RateLimiter {
    pub fn new_in_memory() -> Self {
        Self {
            backend: Arc::new(Backend::Memory(Mutex::new(HashMap::new()))),
        }
    }

    pub fn new_redis(manager: ConnectionManager) -> Self {
        Self {
            backend: Arc::new(Backend::Redis(manager)),
        }
    }

    /// Check and count one request for `user_id` under `scope`.
    pub async fn check(
        &self,
        user_id: Uuid,
        scope: &str,
        limit_per_minute: i64,
    ) -> Result<RateLimitResult, RateLimitError> {
        let now = unix_now();
        let window = now / 60;
        let window_ends_in = 60 - (now % 60) as u64;
        let key = format!("{user_id}:{scope}");

        // `count` is how many requests (including this one) landed in the
        // window. The limit-th request is the last one allowed.
        let count = match self.backend.as_ref() {
            Backend::Memory(map) => {
                let mut map = map.lock().await;
                // Windows other than the current one are dead weight.
                if map.len() > 10_000 {
                    map.retain(|(_, w), _| *w == window);
                }
                let count = map.entry((key, window)).or_insert(0);
                *count += 1;
                *count
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let redis_key = format!("ratelimit:{key}:{window}");
                let count: i64 = conn.incr(&redis_key, 1).await?;
                let _: () = conn.expire(&redis_key, 90).await?;
                count
            }
        };

        if count > limit_per_minute {
            return Ok(RateLimitResult {
                allowed: false,
                remaining_minute: 0,
                retry_after_seconds: Some(window_ends_in),
            });
        }

        Ok(RateLimitResult {
            allowed: true,
            remaining_minute: limit_per_minute - count,
            retry_after_seconds: None,
        })
    }
}

fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_allowed() {
        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        let result = limiter.check(user_id, "api", 60).await.unwrap();
        assert!(result.allowed, "First request should be allowed");
        assert_eq!(result.remaining_minute, 59, "Should have 59 remaining");
    }

    #[tokio::test]
    async fn test_exactly_at_limit_rejected() {
        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        for i in 0..60 {
            let result = limiter.check(user_id, "api", 60).await.unwrap();
            assert!(result.allowed, "Request {} should be allowed", i);
        }

        let result = limiter.check(user_id, "api", 60).await.unwrap();
        assert!(!result.allowed, "61st request should be rejected");
        assert!(
            result.retry_after_seconds.is_some(),
            "Should have retry_after"
        );
    }

    #[tokio::test]
    async fn test_concurrent_requests_respect_limit() {
        use tokio::sync::Barrier;

        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        // Use up 55 of 60 requests
        for _ in 0..55 {
            limiter.check(user_id, "api", 60).await.unwrap();
        }

        // Now try 10 concurrent requests (only 5 should succeed)
        let barrier = Arc::new(Barrier::new(10));
        let mut handles = vec![];

        for _ in 0..10 {
            let limiter = limiter.clone();
            let barrier = Arc::clone(&barrier);

            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                limiter.check(user_id, "api", 60).await.unwrap()
            }));
        }

        let mut results = vec![];
        for handle in handles {
            if let Ok(result) = handle.await {
                results.push(result);
            }
        }

        let allowed_count = results.iter().filter(|r| r.allowed).count();
        let rejected_count = results.iter().filter(|r| !r.allowed).count();

        assert!(allowed_count <= 5, "At most 5 concurrent should succeed");
        assert!(
            rejected_count >= 5,
            "At least 5 concurrent should be rejected"
        );
    }

    #[tokio::test]
    async fn test_scopes_isolated() {
        let limiter = RateLimiter::new_in_memory();
        let user_id = Uuid::new_v4();

        for _ in 0..5 {
            limiter.check(user_id, "checkout", 5).await.unwrap();
        }

        let result = limiter.check(user_id, "checkout", 5).await.unwrap();
        assert!(!result.allowed, "checkout scope should be blocked");

        let result = limiter.check(user_id, "api", 5).await.unwrap();
        assert!(result.allowed, "api scope should be unaffected");
    }

    #[tokio::test]
    async fn test_users_isolated() {
        let limiter = RateLimiter::new_in_memory();
        let user_1 = Uuid::new_v4();
        let user_2 = Uuid::new_v4();

        for _ in 0..5 {
            limiter.check(user_1, "api", 5).await.unwrap();
        }

        let result = limiter.check(user_1, "api", 5).await.unwrap();
        assert!(!result.allowed, "User 1 should be blocked");

        let result = limiter.check(user_2, "api", 5).await.unwrap();
        assert!(result.allowed, "User 2 should be allowed");
    }
}
