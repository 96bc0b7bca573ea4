//! Per-key request rate limiting over a rolling one-minute window.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::SecurityConfig;
use crate::error::AssistantError;

const WINDOW: Duration = Duration::from_secs(60);

/// Keyed limiter allowing at most `per_minute` calls per key within any
/// sixty-second window.
pub struct RateLimiter<K = String>
where
    K: Hash + Eq + Clone,
{
    records: Mutex<HashMap<K, VecDeque<Instant>>>,
    per_minute: usize,
}

impl<K> RateLimiter<K>
where
    K: Hash + Eq + Clone,
{
    /// A zero limit is treated as one.
    pub fn per_minute(requests: u32) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            per_minute: requests.max(1) as usize,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::per_minute(config.rate_limit_per_minute)
    }

    /// Record one request for `key`.
    ///
    /// Fails with a non-retryable `RATE_LIMIT_EXCEEDED` when the key already
    /// has `per_minute` requests inside the last minute.  Rejected calls are
    /// not recorded.
    pub fn check_rate_limit(&self, key: &K) -> Result<(), AssistantError> {
        let now = Instant::now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let stamps = records.entry(key.clone()).or_default();
        prune(stamps, now);

        if stamps.len() >= self.per_minute {
            log::warn!("security: rate limit of {}/min exceeded", self.per_minute);
            return Err(AssistantError::rate_limited(
                "Rate limit exceeded. Please try again later.",
            ));
        }
        stamps.push_back(now);
        Ok(())
    }

    /// Drop expired timestamps and forget keys with none left.
    pub fn retain_recent(&self) {
        let now = Instant::now();
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.retain(|_, stamps| {
            prune(stamps, now);
            !stamps.is_empty()
        });
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant) {
    while stamps
        .front()
        .is_some_and(|t| now.duration_since(*t) >= WINDOW)
    {
        stamps.pop_front();
    }
}
