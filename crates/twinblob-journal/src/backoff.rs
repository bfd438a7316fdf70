use std::time::Duration;

use rand::Rng;

/// Exponential retry schedule with multiplicative jitter.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`, then scaled by a random factor in `[1 - jitter_factor, 1]`.
/// There is no attempt limit: an obligation is retried until delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay that may be shaved off at random, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.5,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Schedule without jitter, for deterministic tests.
    pub fn fixed(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(base_delay, max_delay, 0.0)
    }

    /// Delay before retry number `attempt`, before jitter.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay before retry number `attempt`, jittered with `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(attempt);
        if self.jitter_factor <= 0.0 {
            return ceiling;
        }
        let shave = self.jitter_factor * rng.gen::<f64>();
        ceiling.mul_f64(1.0 - shave)
    }

    /// Delay before retry number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }
}
