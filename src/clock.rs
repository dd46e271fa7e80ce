/*!
 # Clocks

 The scheduler never reads the system time or sleeps directly. It goes
 through a [`Clock`], backed by real time in production and by a
 [`SimulatedClock`] in tests, where a day of reservations runs instantly.
*/

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Source of local wall-clock time and of suspension
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current local time
    fn now(&self) -> NaiveDateTime;

    /// Suspends the caller for `duration`
    async fn sleep(&self, duration: Duration);

    /// Suspends the caller until `deadline`; returns at once if it has passed
    async fn sleep_until(&self, deadline: NaiveDateTime) {
        let remaining = deadline - self.now();
        if let Ok(remaining) = remaining.to_std() {
            if !remaining.is_zero() {
                self.sleep(remaining).await;
            }
        }
    }
}

/// Local system time with tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    async fn sleep(&self, duration: Duration) {
        trace!("Sleeping for {:?}", duration);
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock.
///
/// Sleeping advances the clock by the requested duration and returns after
/// yielding once to the runtime. Clones share the same time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl SimulatedClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock to `time`
    pub fn set(&self, time: NaiveDateTime) {
        *self.now.lock() = time;
    }

    /// Moves the clock forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let step = chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(step).unwrap_or(NaiveDateTime::MAX);
    }
}

#[async_trait]
impl Clock for SimulatedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn simulated_sleep_advances_time() {
        let clock = SimulatedClock::new(at(9, 0));
        clock.sleep(Duration::from_secs(90 * 60)).await;
        assert_eq!(clock.now(), at(10, 30));
    }

    #[tokio::test]
    async fn sleep_until_past_deadline_is_a_no_op() {
        let clock = SimulatedClock::new(at(12, 0));
        clock.sleep_until(at(11, 0)).await;
        assert_eq!(clock.now(), at(12, 0));

        clock.sleep_until(at(13, 15)).await;
        assert_eq!(clock.now(), at(13, 15));
    }
}
