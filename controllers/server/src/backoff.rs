//! # Fibonacci Backoff
//!
//! Requeue delays for Servers whose reconciliation failed.
//!
//! The delay grows along the Fibonacci sequence in minutes with the number of
//! consecutive failures for that Server: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).
//! A successful reconciliation resets the count.

use crate::ownership::ServerKey;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Calculate the Fibonacci backoff duration for a given error count (stateless)
///
/// The sequence starts at `min_minutes` for error_count 0 and 1, then follows the Fibonacci
/// sequence: min, min, min*2, min*3, min*5, min*8, etc., capped at `max_minutes`.
pub fn fibonacci_delay(error_count: u32, min_minutes: u64, max_minutes: u64) -> Duration {
    let mut prev_minutes = min_minutes;
    let mut current_minutes = min_minutes;

    for _ in 2..=error_count {
        let next_minutes = prev_minutes.saturating_add(current_minutes);
        prev_minutes = current_minutes;
        current_minutes = next_minutes.min(max_minutes);

        if current_minutes >= max_minutes {
            break;
        }
    }

    Duration::from_secs(current_minutes.min(max_minutes) * 60)
}

/// Consecutive failure counts per Server.
#[derive(Debug)]
pub struct RetryTracker {
    min_minutes: u64,
    max_minutes: u64,
    failures: Mutex<HashMap<ServerKey, u32>>,
}

impl RetryTracker {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure for `key` and returns how long to wait before retrying.
    pub fn next_delay(&self, key: &ServerKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = fibonacci_delay(*count, self.min_minutes, self.max_minutes);
        *count = count.saturating_add(1);
        delay
    }

    /// Clears the failure count for `key`.
    pub fn reset(&self, key: &ServerKey) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Delay used when a failure cannot be attributed to a Server.
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_minutes * 60)
    }
}
