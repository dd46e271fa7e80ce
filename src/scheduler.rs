/*!
 # Lighting scheduler

 Drives the fixtures through one day of reservations.

 The scheduler walks the day's [`SchedulePlan`] in start order with a single
 control task. Before every slot it enforces the blackout window, then waits
 for the slot to start, commands its light state and holds it until the slot
 ends, waking every poll interval.

 Switching off at the end of a slot uses look-ahead: when the next slot
 starts no later than this one ends the lights are left alone and the next
 activation rewrites them at its start, so adjacent or overlapping bookings
 never flicker. Fixture status is never queried; an overlapping booking
 takes over the lights from its own start time.

 Whatever way a day ends (last slot done, shutdown requested, panic) every
 fixture is commanded off before [`LightingScheduler::run_day_until`]
 returns or unwinds.
*/

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::fixture::{FixtureController, LightState, FIXTURES};
use crate::plan::{FullCourtPolicy, SchedulePlan, Slot};
use crate::reservation::{parse_reservations, Reservations};
use crate::schedule::{BlackoutWindow, SlotDurations};

/// Tunables of the scheduling engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub blackout: BlackoutWindow,
    pub durations: SlotDurations,
    pub policy: FullCourtPolicy,
    /// Wake-up period while a slot is active
    pub poll_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            blackout: BlackoutWindow::default(),
            durations: SlotDurations::default(),
            policy: FullCourtPolicy::default(),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// How a day of scheduling ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    /// No valid reservation, nothing was commanded
    NoReservations,
    /// Every slot was processed
    Completed,
    /// Shutdown was requested before the day was over
    Interrupted,
}

/// Executes a day of reservations against the fixtures
pub struct LightingScheduler<F, C> {
    controller: F,
    clock: C,
    settings: SchedulerSettings,
}

impl<F: FixtureController, C: Clock> LightingScheduler<F, C> {
    pub fn new(controller: F, clock: C, settings: SchedulerSettings) -> Self {
        Self {
            controller,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Plan for the rest of today derived from a raw reservation mapping
    pub fn plan(&self, reservations: &Reservations) -> SchedulePlan {
        let parsed = parse_reservations(reservations);
        SchedulePlan::build(
            &parsed,
            self.clock.now().date(),
            &self.settings.durations,
            self.settings.policy,
        )
    }

    /// Runs today's reservations to the end of the day
    pub async fn run_day(&self, reservations: &Reservations) -> DayOutcome {
        self.run_day_until(reservations, std::future::pending()).await
    }

    /// Runs today's reservations until the day is over or `shutdown`
    /// resolves, then switches every fixture off.
    #[instrument(skip_all, fields(policy = %self.settings.policy))]
    pub async fn run_day_until<S>(&self, reservations: &Reservations, shutdown: S) -> DayOutcome
    where
        S: Future<Output = ()>,
    {
        let plan = self.plan(reservations);
        if plan.is_empty() {
            info!("No valid reservations for today, nothing to schedule");
            return DayOutcome::NoReservations;
        }

        info!("Scheduling {} reservation slots", plan.len());
        for slot in &plan.slots {
            debug!(
                "Slot {}-{} for {}: {}",
                slot.start.format("%H:%M"),
                slot.end.format("%H:%M"),
                slot.court_names(),
                slot.state
            );
        }

        let driven = AssertUnwindSafe(self.drive(&plan)).catch_unwind();
        let outcome = tokio::select! {
            result = driven => match result {
                Ok(()) => {
                    info!("All reservations for today have been processed");
                    DayOutcome::Completed
                }
                Err(panic) => {
                    error!("Scheduler panicked, switching all fixtures off");
                    self.all_off().await;
                    std::panic::resume_unwind(panic);
                }
            },
            _ = shutdown => {
                warn!("Shutdown requested, abandoning the rest of the day");
                DayOutcome::Interrupted
            }
        };

        self.all_off().await;
        outcome
    }

    /// Commands every fixture off
    pub async fn all_off(&self) {
        info!("Switching all fixtures off");
        self.apply(LightState::OFF).await;
    }

    async fn drive(&self, plan: &SchedulePlan) {
        let blackout = self.settings.blackout;
        let mut lights: Option<LightState> = None;
        let mut index = 0;

        while let Some(slot) = plan.slots.get(index) {
            let now = self.clock.now();

            if blackout.is_active_at(now) {
                let until = blackout.end_after(now);
                info!(
                    "Blackout window active, lights forced off until {}",
                    until.format("%H:%M")
                );
                lights = self.apply(LightState::OFF).await;
                self.clock.sleep_until(until).await;
                continue;
            }

            if slot.end <= now {
                info!(
                    "Skipping reservation at {} for {}: already over",
                    slot.start.format("%H:%M"),
                    slot.court_names()
                );
                index += 1;
                continue;
            }

            if slot.start > now {
                if lights != Some(LightState::OFF) {
                    debug!("Idle until next reservation, switching off");
                    lights = self.apply(LightState::OFF).await;
                }

                let next_blackout = blackout.start_after(now);
                if blackout.is_enabled() && next_blackout < slot.start {
                    debug!(
                        "Blackout starts at {} before the next reservation",
                        next_blackout.format("%H:%M")
                    );
                    self.clock.sleep_until(next_blackout).await;
                    continue;
                }

                let wait = slot.start - now;
                info!(
                    "Waiting {}m until next reservation at {}",
                    wait.num_minutes(),
                    slot.start.format("%H:%M")
                );
                self.clock.sleep_until(slot.start).await;
                continue;
            }

            if slot.start < now {
                info!(
                    "Reservation at {} already started, lighting it late",
                    slot.start.format("%H:%M")
                );
            }

            lights = self.run_slot(slot, plan.slots.get(index + 1)).await;
            index += 1;
        }
    }

    /// Lights a slot and holds it until it ends, or until a merged next slot
    /// starts. Returns the state left on the fixtures, `None` when a command
    /// failed and the state is unknown.
    async fn run_slot(&self, slot: &Slot, next: Option<&Slot>) -> Option<LightState> {
        info!(
            "Reservation started at {} for {}",
            slot.start.format("%H:%M"),
            slot.court_names()
        );
        let lights = self.apply(slot.state).await;

        let until = match next {
            Some(next) if slot.merged_with_next => next.start.min(slot.end),
            _ => slot.end,
        };

        loop {
            let now = self.clock.now();
            if now >= until {
                break;
            }
            if self.settings.blackout.is_active_at(now) {
                warn!(
                    "Blackout window began during reservation at {}, cutting it short",
                    slot.start.format("%H:%M")
                );
                return lights;
            }

            let step = chrono::TimeDelta::from_std(self.settings.poll_interval)
                .unwrap_or(chrono::TimeDelta::MAX);
            let wake = now.checked_add_signed(step).unwrap_or(until).min(until);
            self.clock.sleep_until(wake).await;
        }

        match next {
            Some(next) if slot.merged_with_next => {
                info!(
                    "Another reservation follows at {}. Keeping lights on.",
                    next.start.format("%H:%M")
                );
                lights
            }
            Some(_) => {
                info!(
                    "No immediate follow-up reservation. Lights turned off at {}",
                    slot.end.format("%H:%M")
                );
                self.apply(LightState::OFF).await
            }
            None => {
                debug!("Last reservation of the day finished");
                lights
            }
        }
    }

    /// Writes every fixture's value. A failed command is logged and the
    /// remaining fixtures are still written. Returns the state now on the
    /// fixtures, or `None` if any command failed.
    #[instrument(skip(self))]
    async fn apply(&self, state: LightState) -> Option<LightState> {
        let mut all_written = true;
        for fixture in FIXTURES {
            let on = state.is_on(fixture);
            match self.controller.set(fixture, on).await {
                Ok(()) => info!(
                    "{} light turned {}",
                    fixture,
                    if on { "on" } else { "off" }
                ),
                Err(e) => {
                    error!(
                        "Error turning {} light {}: {}",
                        fixture,
                        if on { "on" } else { "off" },
                        e
                    );
                    all_written = false;
                }
            }
        }
        all_written.then_some(state)
    }
}
