//! Reconnect Backoff for Byte Sources
//!
//! When a fetch from a byte source fails part way through, the caching reader
//! reconnects and resumes from the last byte it received. This module holds
//! the policy that decides whether to try again and how long to wait.
//!
//! ```text
//! fetch [offset, offset+len)
//!        │
//!        ├─→ Attempt 1: Immediate
//!        ├─→ Attempt 2: Wait 100ms, resume at first missing byte
//!        ├─→ Attempt 3: Wait 200ms
//!        ├─→ Attempt 4: Wait 400ms
//!        ├─→ Attempt 5: Wait 800ms
//!        └─→ Attempt 6: Wait 1.6s, then give up (Transfer error)
//! ```
//!
//! ## Retryable vs Non-Retryable Errors
//!
//! Sources report failures as `std::io::Error`. Everything is treated as
//! transient except the kinds that can't change between attempts:
//! `NotFound`, `PermissionDenied`, `InvalidInput`, `InvalidData` and
//! `Unsupported`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;

use crate::config::duration_ms;

/// Retry policy configuration for exponential backoff.
///
/// ```text
/// backoff = min(initial_backoff * multiplier^attempt, max_backoff)
/// ```
///
/// With `jitter` enabled each wait is scaled by a random factor in
/// `[0.75, 1.25)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of reconnect attempts per fetch (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial backoff in milliseconds (default: 100ms)
    #[serde(default = "default_initial_backoff", with = "duration_ms")]
    pub initial_backoff: Duration,

    /// Maximum backoff in milliseconds (default: 30s)
    #[serde(default = "default_max_backoff", with = "duration_ms")]
    pub max_backoff: Duration,

    /// Backoff multiplier for exponential growth (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Randomize waits (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_max_retries() -> usize {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            jitter: false,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate backoff duration for a given attempt number (0-indexed).
    ///
    /// ```ignore
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.backoff(0), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(1), Duration::from_millis(200));
    /// ```
    pub fn backoff(&self, attempt: usize) -> Duration {
        let backoff_ms =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff = Duration::from_millis(backoff_ms as u64);
        backoff.min(self.max_backoff)
    }

    /// The wait before reconnect attempt `attempt`, with jitter if enabled.
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self.backoff(attempt);
        if !self.jitter {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.75..1.25);
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }

    /// Check if a source error is worth retrying.
    pub fn is_retryable(&self, error: &io::Error) -> bool {
        !matches!(
            error.kind(),
            io::ErrorKind::NotFound
                | io::ErrorKind::PermissionDenied
                | io::ErrorKind::InvalidInput
                | io::ErrorKind::InvalidData
                | io::ErrorKind::Unsupported
        )
    }
}
