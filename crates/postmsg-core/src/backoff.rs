//! Handshake retry configuration and backoff calculation.
//!
//! The server re-sends `"init"` until the guest answers. The wait after
//! attempt `n` (zero-based) is `base_delay * 2^n`; after `max_attempts`
//! sends the handshake is declared failed. With the defaults (100 ms, 8
//! attempts) the last wait is 12.8 s and failure is reported 25.5 s after
//! the first send.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;
/// Default number of `"init"` sends before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Handshake retry parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Delay after the first attempt in ms (default: 100).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum number of attempts (default: 8).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffConfig {
    /// Wait scheduled after the zero-based `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(attempt, self.base_delay_ms))
    }

    /// Time from the first send until failure is reported.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts).map(|n| self.delay_for(n)).sum()
    }
}

/// Exponential backoff without jitter: `base_delay_ms * 2^attempt`,
/// saturating instead of overflowing.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64) -> u64 {
    base_delay_ms.saturating_mul(1u64 << attempt.min(63))
}
