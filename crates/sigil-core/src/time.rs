//! Clock abstraction for ledger timestamps, backoff and confirmation polling.
//!
//! Everything that waits or stamps time goes through `Clock`, so tests can
//! drive retries and confirmation timeouts with `TestClock` without real
//! sleeps.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant, SystemTime},
};

use chrono::{DateTime, Utc};

/// Source of time for the ledger and the attestation client.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant for measuring elapsed time.
    fn now(&self) -> Instant;

    /// Wall-clock time.
    fn now_system(&self) -> SystemTime;

    /// Wall-clock time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }

    /// Suspends for `duration`.
    ///
    /// `RealClock` maps this to `tokio::time::sleep`; `TestClock` advances
    /// virtual time and yields.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug)]
struct VirtualTime {
    start: SystemTime,
    elapsed: Duration,
}

/// Virtual clock for deterministic tests.
///
/// Clones share the same timeline. `sleep` advances the timeline by the
/// requested duration and yields once, so code that backs off or polls
/// runs to completion without waiting.
#[derive(Debug, Clone)]
pub struct TestClock {
    base_instant: Instant,
    time: Arc<Mutex<VirtualTime>>,
}

impl TestClock {
    /// Creates a clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a clock starting at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        Self {
            base_instant: Instant::now(),
            time: Arc::new(Mutex::new(VirtualTime { start, elapsed: Duration::ZERO })),
        }
    }

    /// Creates a clock starting at a UTC timestamp.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::with_start_time(SystemTime::from(start))
    }

    /// Moves virtual time forward.
    pub fn advance(&self, duration: Duration) {
        let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
        time.elapsed = time.elapsed.saturating_add(duration);
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.time.lock().unwrap_or_else(PoisonError::into_inner).elapsed
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        let time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
        time.start + time.elapsed
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn advance_moves_both_timelines() {
        let start = Utc.with_ymd_and_hms(2025, 8, 25, 12, 0, 0).unwrap();
        let clock = TestClock::starting_at(start);
        let instant = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(instant), Duration::from_secs(90));
        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(90));
        assert_eq!(clock.elapsed(), Duration::from_secs(90));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::new();
        let other = clock.clone();

        other.advance(Duration::from_millis(250));
        assert_eq!(clock.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn sleep_is_instant_and_advances() {
        let clock = TestClock::new();
        let wall = Instant::now();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.elapsed(), Duration::from_secs(3600));
        assert!(wall.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn real_clock_sleeps() {
        let clock = RealClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now().duration_since(start) >= Duration::from_millis(5));
    }
}
