//! Bag Timestamps
//!
//! Bags store receive times as a pair of unsigned 32-bit integers:
//! seconds and nanoseconds since the epoch. The smallest representable
//! step ("one tick") is one nanosecond.
//!
//! ## Wire Format
//! ```text
//! ┌──────────────┬──────────────┐
//! │ sec (u32 LE) │ nsec (u32 LE)│
//! └──────────────┴──────────────┘
//! ```
//!
//! `Time` orders by seconds, then nanoseconds. Arithmetic saturates at the
//! representable bounds instead of wrapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A bag timestamp (seconds + nanoseconds)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time {
    pub sec: u32,
    pub nsec: u32,
}

impl Time {
    pub const MIN: Time = Time { sec: 0, nsec: 0 };
    pub const MAX: Time = Time {
        sec: u32::MAX,
        nsec: 999_999_999,
    };

    /// Create a time, normalizing nanoseconds above one second.
    pub fn new(sec: u32, nsec: u32) -> Self {
        let total = sec as u64 * NANOS_PER_SEC + nsec as u64;
        Self::from_nanos(total)
    }

    /// Convert total nanoseconds to a time, saturating at `Time::MAX`.
    pub fn from_nanos(nanos: u64) -> Self {
        let sec = nanos / NANOS_PER_SEC;
        if sec > u32::MAX as u64 {
            return Self::MAX;
        }
        Self {
            sec: sec as u32,
            nsec: (nanos % NANOS_PER_SEC) as u32,
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::from_nanos(millis.saturating_mul(1_000_000))
    }

    /// Total nanoseconds since the epoch
    pub fn as_nanos(&self) -> u64 {
        self.sec as u64 * NANOS_PER_SEC + self.nsec as u64
    }

    /// The time one tick (one nanosecond) later.
    pub fn next_tick(&self) -> Self {
        Self::from_nanos(self.as_nanos().saturating_add(1))
    }

    pub fn saturating_add(&self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self::from_nanos(self.as_nanos().saturating_add(nanos))
    }

    /// Elapsed time from `earlier` to `self`, zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Time) -> Duration {
        Duration::from_nanos(self.as_nanos().saturating_sub(earlier.as_nanos()))
    }

    /// Duration of the inclusive range `[start, end]`.
    ///
    /// An inclusive range always covers at least one tick, so `[t, t]` is 1ns.
    pub fn inclusive_span(start: Time, end: Time) -> Duration {
        end.saturating_duration_since(start) + Duration::from_nanos(1)
    }

    /// Decode from the 8-byte little-endian wire format.
    ///
    /// Returns `None` when `nsec` is a full second or more.
    pub fn from_le_bytes(bytes: [u8; 8]) -> Option<Self> {
        let sec = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let nsec = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if nsec as u64 >= NANOS_PER_SEC {
            return None;
        }
        Some(Self { sec, nsec })
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.sec.to_le_bytes());
        out[4..].copy_from_slice(&self.nsec.to_le_bytes());
        out
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}
