//! Per-client request limits for the public intake routes.
//!
//! The limiter is injected into the HTTP state so a shared backend can
//! replace the bundled in-process counter when several servers run.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait RateLimiter: Send + Sync {
    /// Count one request for `key`. `false` when the key is over its limit.
    fn check(&self, key: &str) -> bool;
}

/// Fixed-window counter scoped to one process.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    window: Duration,
    max_requests: u32,
    /// Keys tracked before expired windows are swept.
    max_keys: usize,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl InMemoryRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max_requests,
            max_keys: 10_000,
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(Duration::from_secs(60), max_requests)
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        if self.max_requests == 0 {
            return true;
        }
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if windows.len() >= self.max_keys && !windows.contains_key(key) {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= self.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_per_key() {
        let limiter = InMemoryRateLimiter::per_minute(2);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
    }

    #[test]
    fn test_window_resets() {
        let limiter = InMemoryRateLimiter::new(Duration::from_secs(10), 1);
        let start = Instant::now();
        assert!(limiter.check_at("a", start));
        assert!(!limiter.check_at("a", start + Duration::from_secs(9)));
        assert!(limiter.check_at("a", start + Duration::from_secs(10)));
    }

    #[test]
    fn test_zero_disables_limit() {
        let limiter = InMemoryRateLimiter::per_minute(0);
        assert!((0..100).all(|_| limiter.check("a")));
    }
}
