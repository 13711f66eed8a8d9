//! Exponential backoff with uniform jitter
//!
//! Shared by the adaptive scheduler (with a learned base delay) and the bulk
//! processor (with a fixed per-item configuration).

use std::time::Duration;

use rand::Rng;

/// Cap on the exponent so `multiplier.powi` stays finite
const MAX_BACKOFF_EXPONENT: u32 = 32;

/// Lower bound of the jitter factor; the upper bound is 1.0
pub const JITTER_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl ExponentialBackoff {
    /// Delay before the attempt following the `failed_attempt`-th failure
    ///
    /// `base_delay × multiplier^(failed_attempt - 1)`, scaled by `factor`,
    /// jittered into `[0.5, 1.0]` of that value and capped at `max_delay`.
    pub fn delay(&self, failed_attempt: u32, factor: f64) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let mut millis = self.base_delay.as_millis() as f64
            * self.multiplier.powi(exponent as i32)
            * factor;

        if self.jitter {
            millis *= rand::thread_rng().gen_range(JITTER_FLOOR..=1.0);
        }

        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}
