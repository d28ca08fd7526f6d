use std::time::Duration;

use rand::Rng;

/// Upper bound on jitter so consecutive delays keep strictly increasing
/// until the cap (a doubled delay always exceeds the previous delay plus
/// its jitter).
const MAX_JITTER: f64 = 0.5;

/// Capped exponential backoff with additive jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, MAX_JITTER),
        }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Jittered delay before retry number `attempt`, never above the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.base_delay(attempt);
        if self.jitter == 0.0 {
            return raw;
        }
        let extra = raw.mul_f64(rand::rng().random_range(0.0..=self.jitter));
        (raw + extra).min(self.max)
    }
}
