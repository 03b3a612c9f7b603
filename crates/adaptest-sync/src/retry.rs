//! Backoff policy for failed remote pushes.

use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::SyncError;

/// Exponential backoff: `base * 2^attempts`, capped at `max_delay`.
///
/// There is no retry limit. A snapshot stays queued until the remote accepts
/// it or a newer snapshot replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }

    /// Backoff before retry number `attempts + 1`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retrying after `error`.
    ///
    /// Rate-limit hints are honored even above `max_delay`. Errors that will
    /// not go away by themselves (bad token, rejected payload) wait the
    /// maximum delay.
    pub fn delay_after(&self, attempts: u32, error: &SyncError) -> Duration {
        if let Some(hint) = error.retry_after_ms() {
            return Duration::from_millis(hint).max(self.backoff(attempts));
        }
        if error.is_retryable() {
            self.backoff(attempts)
        } else {
            self.max_delay
        }
    }
}
