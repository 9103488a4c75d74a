//! Retry policy with exponential back-off.

use std::time::Duration;

use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};

/// How often and how patiently a failed call is retried.
///
/// The delay before retry `n` (1-based) is `initial_backoff * 2^(n-1)`,
/// capped at `max_backoff`, then jittered down to between half and all of
/// that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 4). Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1s).
    #[serde(
        default = "default_initial_backoff",
        rename = "initial_backoff_ms",
        with = "duration_ms"
    )]
    pub initial_backoff: Duration,

    /// Upper bound of any delay (default: 16s).
    #[serde(
        default = "default_max_backoff",
        rename = "max_backoff_ms",
        with = "duration_ms"
    )]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Returns the attempt budget, at least one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the un-jittered delay before retry `retry` (1-based).
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Returns the jittered delay before retry `retry` (1-based).
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let full = u64::try_from(self.base_delay(retry).as_millis()).unwrap_or(u64::MAX);
        if full == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng().random_range(full / 2..=full))
    }
}

const fn default_max_attempts() -> u32 {
    4
}

const fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

const fn default_max_backoff() -> Duration {
    Duration::from_secs(16)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
