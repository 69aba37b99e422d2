//! Sliding-window rate limiter
//!
//! Keys are arbitrary strings such as `login:203.0.113.7` or
//! `api_commands:<user id>`. Each key holds the timestamps of admitted requests
//! inside its trailing window; expired timestamps are pruned on every check.
//!
//! State lives in this process only and resets on restart.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::RateLimitPolicy;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u32,
}

/// In-process sliding-window counter
#[derive(Default)]
pub struct RateLimiter {
    // One lock over the whole map: prune, check and record happen atomically.
    windows: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or deny one request for `key`.
    ///
    /// Denied requests are not recorded.
    ///
    /// # Arguments
    ///
    /// * `key` - Bucket to count against, e.g. `login:<ip>`
    /// * `max_requests` - Requests admitted per window
    /// * `window_seconds` - Length of the trailing window
    ///
    /// # Returns
    ///
    /// Whether the request is admitted and how many remain in the window
    pub async fn is_allowed(&self, key: &str, max_requests: u32, window_seconds: u64) -> RateLimitDecision {
        self.is_allowed_at(key, max_requests, window_seconds, Utc::now())
            .await
    }

    /// [`is_allowed`](Self::is_allowed) with a named policy
    pub async fn check(&self, key: &str, policy: RateLimitPolicy) -> RateLimitDecision {
        self.is_allowed(key, policy.max_requests, policy.window_seconds)
            .await
    }

    pub(crate) async fn is_allowed_at(
        &self,
        key: &str,
        max_requests: u32,
        window_seconds: u64,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let cutoff = now - window(window_seconds);
        let mut windows = self.windows.lock().await;
        let history = windows.entry(key.to_string()).or_default();
        history.retain(|t| *t > cutoff);

        if history.len() >= max_requests as usize {
            tracing::debug!(key, max_requests, window_seconds, "Rate limit exceeded");
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
            };
        }

        history.push(now);
        RateLimitDecision {
            allowed: true,
            remaining: max_requests - history.len() as u32,
        }
    }

    /// Remaining budget for `key` without recording anything
    pub async fn remaining(&self, key: &str, max_requests: u32, window_seconds: u64) -> u32 {
        let cutoff = Utc::now() - window(window_seconds);
        let windows = self.windows.lock().await;
        let used = windows
            .get(key)
            .map(|h| h.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0);
        max_requests.saturating_sub(used as u32)
    }

    /// Drop keys whose history has been pruned to nothing.
    ///
    /// Histories are only pruned when their key is checked, so keys that are
    /// never seen again stay until `cleanup_older_than` removes their entries.
    pub async fn cleanup(&self) {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, history| !history.is_empty());
        let evicted = before - windows.len();
        if evicted > 0 {
            tracing::debug!("Rate limiter evicted {} idle key(s)", evicted);
        }
    }

    /// Prune every history against `max_window_seconds` and then evict empty keys.
    pub async fn cleanup_older_than(&self, max_window_seconds: u64) {
        let cutoff = Utc::now() - window(max_window_seconds);
        {
            let mut windows = self.windows.lock().await;
            for history in windows.values_mut() {
                history.retain(|t| *t > cutoff);
            }
        }
        self.cleanup().await;
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}

fn window(seconds: u64) -> Duration {
    Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1000))
}
