//! Per-worker request pacing.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const MIN_PERIOD: Duration = Duration::from_nanos(1);

/// Longest gap between permits. Slower rates are clamped to it.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Paces a single worker to at most `qps` exchanges per second.
///
/// The first exchange waits one full period, so a worker never bursts at
/// start. Ticks missed while an exchange is in flight are skipped rather
/// than replayed.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Interval>,
}

impl RateLimiter {
    /// A limiter for `qps` exchanges per second; zero (or anything that is
    /// not a positive finite number) means unlimited.
    pub fn new(qps: f64) -> Self {
        let interval = if qps.is_finite() && qps > 0.0 {
            let period = Duration::try_from_secs_f64(1.0 / qps)
                .map_or(MAX_PERIOD, |period| period.clamp(MIN_PERIOD, MAX_PERIOD));
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(interval)
        } else {
            None
        };

        Self { interval }
    }

    /// An unlimited limiter.
    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.interval.is_none()
    }

    /// Wait for the next permit, or until `stop` is cancelled.
    pub async fn wait(&mut self, stop: &CancellationToken) {
        let Some(interval) = self.interval.as_mut() else {
            return;
        };

        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.cancelled() => {}
        }
    }
}
