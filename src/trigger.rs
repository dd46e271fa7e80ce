/*!
 # Daily trigger

 Runs a job once immediately, then every day at a fixed time of day. The
 trigger polls the clock at a fixed period instead of sleeping until the
 next run, so a long job (a whole day of reservations) simply delays the
 next check.
*/

use chrono::{NaiveDateTime, NaiveTime};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::clock::Clock;
use crate::schedule::next_occurrence;

/// Fires a job at a fixed time every day
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    at: NaiveTime,
    poll_interval: Duration,
    next_run: Option<NaiveDateTime>,
}

impl DailyTrigger {
    pub fn new(at: NaiveTime, poll_interval: Duration) -> Self {
        Self {
            at,
            poll_interval,
            next_run: None,
        }
    }

    /// Next scheduled run, once the trigger has been armed
    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.next_run
    }

    /// Arms the trigger for the first daily time after `now`
    pub fn arm(&mut self, now: NaiveDateTime) {
        self.next_run = Some(next_occurrence(now, self.at));
    }

    /// Whether the job is due at `now`.
    ///
    /// A due trigger re-arms itself for the following day. Runs missed while
    /// a previous job was still busy collapse into one.
    pub fn tick(&mut self, now: NaiveDateTime) -> bool {
        match self.next_run {
            Some(next) if now >= next => {
                self.arm(now);
                true
            }
            Some(_) => false,
            None => {
                self.arm(now);
                false
            }
        }
    }

    /// Runs `job` now, then every day at the configured time. Never returns.
    #[instrument(skip(self, clock, job), fields(at = %self.at.format("%H:%M")))]
    pub async fn run<C, J, Fut>(&mut self, clock: &C, mut job: J)
    where
        C: Clock,
        J: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        info!("Running daily routine at startup");
        job().await;
        self.arm(clock.now());

        loop {
            if let Some(next) = self.next_run {
                debug!("Next daily routine at {}", next);
            }
            clock.sleep(self.poll_interval).await;
            if self.tick(clock.now()) {
                info!("Starting daily routine");
                job().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use chrono::{NaiveDate, TimeDelta};
    use std::cell::RefCell;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn trigger() -> DailyTrigger {
        DailyTrigger::new(
            NaiveTime::from_hms_opt(5, 10, 0).unwrap(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn arms_for_later_today_or_tomorrow() {
        let mut early = trigger();
        early.arm(at(3, 4, 0));
        assert_eq!(early.next_run(), Some(at(3, 5, 10)));

        let mut late = trigger();
        late.arm(at(3, 9, 0));
        assert_eq!(late.next_run(), Some(at(4, 5, 10)));
    }

    #[test]
    fn fires_once_per_day() {
        let mut trigger = trigger();
        trigger.arm(at(3, 9, 0));

        assert!(!trigger.tick(at(4, 5, 9)));
        assert!(trigger.tick(at(4, 5, 10)));
        assert!(!trigger.tick(at(4, 5, 11)));
        assert_eq!(trigger.next_run(), Some(at(5, 5, 10)));
    }

    #[test]
    fn missed_runs_collapse() {
        let mut trigger = trigger();
        trigger.arm(at(3, 9, 0));

        assert!(trigger.tick(at(6, 12, 0)));
        assert_eq!(trigger.next_run(), Some(at(7, 5, 10)));
    }

    #[tokio::test]
    async fn runs_at_startup_then_daily() {
        let clock = SimulatedClock::new(at(3, 9, 0));
        let runs: RefCell<Vec<NaiveDateTime>> = RefCell::new(Vec::new());
        let mut trigger = trigger();

        let run = trigger.run(&clock, || {
            runs.borrow_mut().push(clock.now());
            async {}
        });
        // The loop never ends on its own; stop it once two days have passed.
        let stop = async {
            while clock.now() < at(5, 6, 0) {
                tokio::task::yield_now().await;
            }
        };
        tokio::select! {
            _ = run => unreachable!("daily trigger returned"),
            _ = stop => {}
        }

        let runs = runs.into_inner();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0], at(3, 9, 0));
        assert!(runs[1] >= at(4, 5, 10) && runs[1] < at(4, 5, 10) + TimeDelta::minutes(1));
        assert!(runs[2] >= at(5, 5, 10) && runs[2] < at(5, 5, 10) + TimeDelta::minutes(1));
    }
}
