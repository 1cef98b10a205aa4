//! Reconnect policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Default delay before reconnecting after a clean close.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// How the requested delay grows across consecutive retries.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Use the requested delay unchanged.
    #[default]
    Fixed,
    /// Double the requested delay for every retry already scheduled
    Exponential {
        /// Upper bound for the scaled delay
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        max_delay: Duration,
        /// Spread delays by ±25% so clients don't reconnect in lockstep
        #[serde(default)]
        jitter: bool,
    },
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconnect after `delay`; `attempt` is the new retry count.
    Retry {
        /// Time to wait before reconnecting
        delay: Duration,
        /// Retry count once this retry is scheduled
        attempt: u32,
    },
    /// The retry budget is spent.
    Exhausted,
}

/// Decides whether and when a terminated stream is reconnected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed since the last successful open (None for unlimited)
    pub max_retry_count: Option<u32>,
    /// Delay used after a clean close
    pub retry_interval: Duration,
    /// Growth applied to the requested delay
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Decides the next step given the current retry count and the delay
    /// requested by the termination path.
    pub fn decide(&self, retry_count: u32, requested: Duration) -> RetryDecision {
        if let Some(max) = self.max_retry_count
            && retry_count >= max
        {
            return RetryDecision::Exhausted;
        }

        RetryDecision::Retry {
            delay: self.delay(retry_count, requested),
            attempt: retry_count.saturating_add(1),
        }
    }

    fn delay(&self, retry_count: u32, requested: Duration) -> Duration {
        match &self.backoff {
            Backoff::Fixed => requested,
            Backoff::Exponential { max_delay, jitter } => {
                let base_ms = requested.as_millis() as u64;
                let scaled = base_ms.saturating_mul(2u64.saturating_pow(retry_count));
                let capped = scaled.min(max_delay.as_millis() as u64);
                if !jitter {
                    return Duration::from_millis(capped);
                }

                let jitter_range = capped / 4;
                let jitter_offset = if jitter_range > 0 {
                    // Deterministic per retry count; no RNG needed
                    let hash = u64::from(retry_count)
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    hash % (jitter_range * 2)
                } else {
                    0
                };
                Duration::from_millis(
                    capped
                        .saturating_sub(jitter_range)
                        .saturating_add(jitter_offset),
                )
            }
        }
    }
}
