/*!
 # Schedule plans

 A plan is the day's reservations turned into time-ordered slots, each with
 the light state it must hold and whether it runs straight into the next
 slot. Building a plan is pure; the scheduler executes it.
*/

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::fixture::{Fixture, LightState};
use crate::reservation::Reservation;
use crate::schedule::SlotDurations;

/// How the full-court light relates to the half-court bookings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FullCourtPolicy {
    /// The full-court light follows "Full Court" bookings only
    Independent,
    /// The full-court light floods both halves and is lit whenever either
    /// half is in use
    #[default]
    SharedArea,
}

impl FullCourtPolicy {
    /// Light state required by the courts booked in one slot.
    ///
    /// A "Full Court" booking occupies both halves.
    pub fn light_state(&self, courts: &BTreeSet<Fixture>) -> LightState {
        let full_booked = courts.contains(&Fixture::FullCourt);
        let half_a = full_booked || courts.contains(&Fixture::HalfCourtA);
        let half_b = full_booked || courts.contains(&Fixture::HalfCourtB);
        let full = match self {
            FullCourtPolicy::Independent => full_booked,
            FullCourtPolicy::SharedArea => half_a || half_b,
        };

        LightState { half_a, half_b, full }
    }
}

impl fmt::Display for FullCourtPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FullCourtPolicy::Independent => write!(f, "independent"),
            FullCourtPolicy::SharedArea => write!(f, "shared-area"),
        }
    }
}

/// One reservation slot of the day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Activation time
    pub start: NaiveDateTime,
    /// Deactivation time
    pub end: NaiveDateTime,
    /// Courts booked in this slot
    pub courts: BTreeSet<Fixture>,
    /// Light state held for the duration of the slot
    pub state: LightState,
    /// The next slot starts before or exactly when this one ends, so the
    /// lights are handed over without switching off in between
    pub merged_with_next: bool,
}

impl Slot {
    pub fn court_names(&self) -> String {
        self.courts
            .iter()
            .map(|court| court.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Time-ordered slots for one day
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePlan {
    pub slots: Vec<Slot>,
}

impl SchedulePlan {
    /// Builds the plan for `day` from validated reservations.
    ///
    /// Reservations are sorted by start time first, so any input order
    /// yields the same plan.
    pub fn build(
        reservations: &[Reservation],
        day: NaiveDate,
        durations: &SlotDurations,
        policy: FullCourtPolicy,
    ) -> Self {
        let mut ordered: Vec<&Reservation> = reservations.iter().collect();
        ordered.sort_by_key(|reservation| reservation.start);

        let mut slots: Vec<Slot> = ordered
            .into_iter()
            .map(|reservation| {
                let start = day.and_time(reservation.start);
                Slot {
                    start,
                    end: start + durations.for_start(reservation.start),
                    courts: reservation.courts.clone(),
                    state: policy.light_state(&reservation.courts),
                    merged_with_next: false,
                }
            })
            .collect();

        for index in 1..slots.len() {
            let next_start = slots[index].start;
            let previous = &mut slots[index - 1];
            previous.merged_with_next = next_start <= previous.end;
        }

        Self { slots }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Display for SchedulePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.slots.is_empty() {
            return writeln!(f, "No reservations");
        }
        for slot in &self.slots {
            write!(
                f,
                "{}-{}  {:<40} {}",
                slot.start.format("%H:%M"),
                slot.end.format("%H:%M"),
                slot.court_names(),
                slot.state
            )?;
            if slot.merged_with_next {
                write!(f, " (held into next slot)")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn reservation(hour: u32, minute: u32, courts: &[Fixture]) -> Reservation {
        Reservation {
            start: NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
            courts: courts.iter().copied().collect(),
        }
    }

    fn courts(list: &[Fixture]) -> BTreeSet<Fixture> {
        list.iter().copied().collect()
    }

    #[test]
    fn full_court_booking_lights_everything() {
        for policy in [FullCourtPolicy::Independent, FullCourtPolicy::SharedArea] {
            assert_eq!(
                policy.light_state(&courts(&[Fixture::FullCourt])),
                LightState::ALL_ON
            );
        }
    }

    #[test]
    fn half_court_booking_depends_on_policy() {
        let half_a = courts(&[Fixture::HalfCourtA]);

        let independent = FullCourtPolicy::Independent.light_state(&half_a);
        assert_eq!(
            independent,
            LightState {
                half_a: true,
                half_b: false,
                full: false
            }
        );

        let shared = FullCourtPolicy::SharedArea.light_state(&half_a);
        assert_eq!(
            shared,
            LightState {
                half_a: true,
                half_b: false,
                full: true
            }
        );
    }

    #[test]
    fn slots_follow_start_order() {
        let plan = SchedulePlan::build(
            &[
                reservation(20, 0, &[Fixture::HalfCourtB]),
                reservation(9, 0, &[Fixture::HalfCourtA]),
                reservation(18, 45, &[Fixture::FullCourt]),
            ],
            day(),
            &SlotDurations::default(),
            FullCourtPolicy::default(),
        );

        let starts: Vec<NaiveDateTime> = plan.slots.iter().map(|s| s.start).collect();
        assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(starts[0], day().and_hms_opt(9, 0, 0).unwrap());
        assert_eq!(starts[2], day().and_hms_opt(20, 0, 0).unwrap());
    }

    #[test]
    fn adjacent_slots_are_merged() {
        let plan = SchedulePlan::build(
            &[
                reservation(18, 0, &[Fixture::HalfCourtA]),
                reservation(19, 0, &[Fixture::HalfCourtA]),
                reservation(20, 30, &[Fixture::HalfCourtB]),
                reservation(21, 30, &[Fixture::FullCourt]),
            ],
            day(),
            &SlotDurations::default(),
            FullCourtPolicy::default(),
        );

        let merged: Vec<bool> = plan.slots.iter().map(|s| s.merged_with_next).collect();
        assert_eq!(merged, vec![true, false, true, false]);
        assert_eq!(
            plan.slots[3].end,
            day().and_hms_opt(22, 45, 0).unwrap(),
            "closing session runs 75 minutes"
        );
    }

    #[test]
    fn overlapping_slots_are_merged() {
        let plan = SchedulePlan::build(
            &[
                reservation(21, 30, &[Fixture::HalfCourtA]),
                reservation(22, 30, &[Fixture::HalfCourtA]),
            ],
            day(),
            &SlotDurations::default(),
            FullCourtPolicy::default(),
        );

        assert!(plan.slots[0].merged_with_next);
        assert!(plan.slots[1].start < plan.slots[0].end);
    }

    #[test]
    fn late_slot_ends_on_the_next_day() {
        let plan = SchedulePlan::build(
            &[reservation(23, 30, &[Fixture::HalfCourtB])],
            day(),
            &SlotDurations::default(),
            FullCourtPolicy::Independent,
        );
        assert_eq!(
            plan.slots[0].end,
            day().succ_opt().unwrap().and_hms_opt(0, 30, 0).unwrap()
        );
    }
}
