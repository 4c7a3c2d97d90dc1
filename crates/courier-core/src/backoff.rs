//! Backoff policy for idle polling and store outages.

use std::time::Duration;

/// Exponential backoff with a cap and multiplicative jitter.
///
/// Used by the worker loop between empty polls and after
/// `StoreUnavailable` errors. Jitter spreads otherwise-synchronized
/// workers apart so an idle pool does not hit the store in lockstep.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first empty poll.
    pub base_delay: Duration,

    /// Growth factor per consecutive empty poll.
    pub multiplier: f64,

    /// Upper bound on the computed delay (before jitter).
    pub max_delay: Duration,

    /// Jitter fraction in [0, 1]; the final delay is scaled by a random
    /// factor in [1 - jitter/2, 1 + jitter/2].
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Delay before the next poll, given the number of consecutive
    /// empty polls so far (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exp = attempts.saturating_sub(1).min(32) as i32;
        let capped = (base_secs * self.multiplier.powi(exp)).min(self.max_delay.as_secs_f64());

        let factor = if self.jitter > 0.0 {
            1.0 + self.jitter * (rand::random::<f64>() - 0.5)
        } else {
            1.0
        };
        Duration::from_secs_f64(capped * factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
        }
    }
}
