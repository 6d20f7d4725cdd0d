//! Rate Limiting Infrastructure
//!
//! Fixed-window counters behind the [`RateLimitStore`] trait so the
//! process-local store can later be swapped for a shared backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Rate limit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Rate limit check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// Time until the current window resets
    pub retry_after: Duration,
}

/// Errors from a rate limit backend
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit backend unavailable: {0}")]
    Backend(String),
}

/// Trait for rate limit storage backends
#[trait_variant::make(RateLimitStore: Send)]
pub trait LocalRateLimitStore {
    /// Count one request against `key` and report whether it is allowed
    async fn check_and_increment(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, RateLimitError>;

    /// Drop all windows (test isolation)
    async fn reset(&self);
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    /// Length of the window this key was opened with
    length: Duration,
    count: u32,
}

impl Window {
    fn open(now: Instant, length: Duration) -> Self {
        Self {
            started_at: now,
            length,
            count: 0,
        }
    }

    fn is_over(&self, now: Instant) -> bool {
        now.duration_since(self.started_at) >= self.length
    }
}

/// Process-local fixed-window store
///
/// Expired windows are recreated on the next request for that key and
/// pruned in bulk once the map grows past `prune_threshold` entries.
#[derive(Debug, Clone)]
pub struct MemoryRateLimitStore {
    windows: Arc<Mutex<HashMap<String, Window>>>,
    prune_threshold: usize,
}

impl Default for MemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            prune_threshold: 10_000,
        }
    }

    fn decide(window: &mut Window, config: &RateLimitConfig, now: Instant) -> RateLimitResult {
        let elapsed = now.duration_since(window.started_at);
        let retry_after = config.window.saturating_sub(elapsed);

        if window.count >= config.max_requests {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        window.count += 1;
        RateLimitResult {
            allowed: true,
            remaining: config.max_requests - window.count,
            retry_after,
        }
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        if windows.len() > self.prune_threshold {
            windows.retain(|_, w| !w.is_over(now));
        }

        let window = windows
            .entry(key.to_string())
            .or_insert_with(|| Window::open(now, config.window));
        if window.is_over(now) {
            *window = Window::open(now, config.window);
        }

        Ok(Self::decide(window, config, now))
    }

    async fn reset(&self) {
        self.windows.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryRateLimitStore, RateLimitConfig, RateLimitStore};
    use std::time::Duration;

    #[tokio::test]
    async fn test_allows_up_to_limit_then_denies() {
        let store = MemoryRateLimitStore::new();
        let config = RateLimitConfig::new(3, 60);

        for expected_remaining in [2, 1, 0] {
            let result = store.check_and_increment("register:1.2.3.4", &config).await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
        }

        let denied = store.check_and_increment("register:1.2.3.4", &config).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryRateLimitStore::new();
        let config = RateLimitConfig::new(1, 60);

        assert!(store.check_and_increment("checkout:a", &config).await.unwrap().allowed);
        assert!(store.check_and_increment("checkout:b", &config).await.unwrap().allowed);
        assert!(store.check_and_increment("download:a", &config).await.unwrap().allowed);
        assert!(!store.check_and_increment("checkout:a", &config).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_starts_fresh_window() {
        let store = MemoryRateLimitStore::new();
        let config = RateLimitConfig {
            max_requests: 1,
            window: Duration::from_millis(20),
        };

        assert!(store.check_and_increment("k", &config).await.unwrap().allowed);
        assert!(!store.check_and_increment("k", &config).await.unwrap().allowed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.check_and_increment("k", &config).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_prune_keeps_windows_of_longer_classes() {
        let store = MemoryRateLimitStore {
            prune_threshold: 0,
            ..MemoryRateLimitStore::new()
        };
        let long = RateLimitConfig::new(1, 60);
        let short = RateLimitConfig {
            max_requests: 1,
            window: Duration::from_millis(20),
        };

        assert!(store.check_and_increment("register:a", &long).await.unwrap().allowed);
        assert!(store.check_and_increment("download:a", &short).await.unwrap().allowed);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Pruning on behalf of the short class must not reopen the long window
        assert!(store.check_and_increment("download:b", &short).await.unwrap().allowed);
        assert!(!store.check_and_increment("register:a", &long).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_all_windows() {
        let store = MemoryRateLimitStore::new();
        let config = RateLimitConfig::new(1, 60);

        assert!(store.check_and_increment("k", &config).await.unwrap().allowed);
        store.reset().await;
        assert!(store.check_and_increment("k", &config).await.unwrap().allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_exceed_limit() {
        let store = MemoryRateLimitStore::new();
        let config = RateLimitConfig::new(5, 60);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .check_and_increment("register:9.9.9.9", &config)
                        .await
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }
}
