//! Per-sensor request ceiling.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

/// Keyed GCRA limiter: a sensor may send up to `max` readings at once, and
/// the allowance refills evenly over `window`.
///
/// A zero `max` or `window` disables limiting.
pub struct SensorRateLimiter {
    limiter: Option<DefaultKeyedRateLimiter<String>>,
}

impl SensorRateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        // ---
        let quota = NonZeroU32::new(max).and_then(|burst| {
            Quota::with_period(window / burst.get()).map(|quota| quota.allow_burst(burst))
        });
        Self {
            limiter: quota.map(RateLimiter::keyed),
        }
    }

    /// `Err` carries the seconds until the sensor may send again.
    pub fn check(&self, sensor_id: &str) -> Result<(), u64> {
        // ---
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        limiter.check_key(&sensor_id.to_string()).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            retry_after_secs(wait)
        })
    }

    /// Forget sensors whose allowance is full again; returns how many.
    pub fn prune(&self) -> usize {
        // ---
        let Some(limiter) = &self.limiter else {
            return 0;
        };
        let before = limiter.len();
        limiter.retain_recent();
        before.saturating_sub(limiter.len())
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}
