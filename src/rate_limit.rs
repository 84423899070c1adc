//! Fixed-window rate limiting keyed by arbitrary strings.
//!
//! Windows reset lazily on access, so memory tracks the active key set.
//! Failing open is the caller's choice; this type only counts.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    max: u32,
    window: Duration,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        RateLimiter {
            max,
            window,
            windows: DashMap::new(),
        }
    }

    pub fn per_minute(max: u32) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// Count one request against `key`.
    ///
    /// # Errors
    /// Returns the seconds until the window resets when the key is over its
    /// limit.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count > self.max {
            let elapsed = now.duration_since(entry.started);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            Err(retry_after)
        } else {
            Ok(())
        }
    }
}
