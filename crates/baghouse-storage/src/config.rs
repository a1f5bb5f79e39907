//! Storage Configuration
//!
//! ## CacheConfig
//!
//! Controls the caching byte reader:
//!
//! - **cache_size_bytes**: Hard ceiling on cached bytes (default: 200 MiB)
//! - **retry**: Reconnect policy for interrupted fetches (see [`RetryPolicy`])
//!
//! ## ProviderConfig
//!
//! Controls the bag data provider:
//!
//! - **cache**: The reader's [`CacheConfig`]
//! - **overlap_warning_fraction**: Warn when more than this fraction of chunks overlap
//!   earlier chunks in time (default: 0.25)
//! - **telemetry_debounce**: Quiet period before throughput is reported (default: 1s)
//! - **fetch_concurrency**: Chunks fetched in parallel per request (default: 4)
//! - **http_timeout**: Per-request timeout for remote bags (default: 30s)
//!
//! Durations are written in milliseconds.
//!
//! ## Usage
//!
//! ```ignore
//! use baghouse_storage::{CacheConfig, ProviderConfig};
//!
//! // Small cache for a memory constrained host
//! let config = ProviderConfig {
//!     cache: CacheConfig {
//!         cache_size_bytes: 32 * 1024 * 1024,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached bytes (default: 200 MiB)
    #[serde(default = "default_cache_size_bytes")]
    pub cache_size_bytes: u64,

    /// Reconnect policy
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_size_bytes: default_cache_size_bytes(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    /// Overlapping-chunk fraction above which a performance warning is raised (default: 0.25)
    #[serde(default = "default_overlap_warning_fraction")]
    pub overlap_warning_fraction: f64,

    /// Debounce for throughput reports in milliseconds (default: 1000)
    #[serde(default = "default_telemetry_debounce", with = "duration_ms")]
    pub telemetry_debounce: Duration,

    /// Maximum chunks fetched concurrently (default: 4)
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// HTTP request timeout in milliseconds (default: 30000)
    #[serde(default = "default_http_timeout", with = "duration_ms")]
    pub http_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            overlap_warning_fraction: default_overlap_warning_fraction(),
            telemetry_debounce: default_telemetry_debounce(),
            fetch_concurrency: default_fetch_concurrency(),
            http_timeout: default_http_timeout(),
        }
    }
}

fn default_cache_size_bytes() -> u64 {
    200 * 1024 * 1024 // 200 MiB
}

fn default_overlap_warning_fraction() -> f64 {
    0.25
}

fn default_telemetry_debounce() -> Duration {
    Duration::from_secs(1)
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
