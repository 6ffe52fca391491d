//! # Retry Backoff
//!
//! Exponential backoff with a ceiling and ±20% jitter. The exponent is
//! computed in floating point and clamped before exponentiation, so a
//! pathological retry counter cannot overflow.

use std::time::Duration;

use rand::Rng;

const JITTER_FRACTION: f64 = 0.2;
const MAX_EXPONENT: f64 = 63.0;

/// Exponential backoff policy: `min(max_delay, base · factor^retries)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, factor: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            factor,
            max_delay,
        }
    }

    /// Deterministic delay for the given retry count.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exponent = f64::from(retry_count).min(MAX_EXPONENT);
        let raw = self.base_delay.as_secs_f64() * self.factor.powf(exponent);
        let clamped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped.max(0.0))
    }

    /// Delay with ±20% jitter so workers hitting the same outage do not
    /// retry in lockstep.
    pub fn jittered_delay(&self, retry_count: u32) -> Duration {
        let base = self.delay(retry_count).as_secs_f64();
        let spread = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        Duration::from_secs_f64((base * (1.0 + spread)).max(0.0))
    }
}
