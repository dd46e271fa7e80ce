/*!
 # Time-of-day helpers

 This module provides the daily blackout window, the slot duration table
 and the `HH:MM` parsing used throughout the crate.
*/

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Parses a 24-hour `HH:MM` time of day.
///
/// The string must contain a ':' with a numeric hour (0-23) before it and a
/// numeric minute (0-59) after it.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    let invalid = || Error::InvalidTime(value.to_string());
    let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = minute.trim().parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Deserializes an `HH:MM` string into a [`NaiveTime`]
pub(crate) fn deserialize_hhmm<'de, D>(deserializer: D) -> std::result::Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_time_of_day(&raw).map_err(serde::de::Error::custom)
}

/// Daily interval during which every fixture must be off.
///
/// The window is half-open: `start` is inside, `end` is not. A window whose
/// start lies after its end wraps past midnight; equal bounds disable it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlackoutWindow {
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub start: NaiveTime,
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub end: NaiveTime,
}

impl Default for BlackoutWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(7, 30, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(17, 30, 0).unwrap_or_default(),
        }
    }
}

impl BlackoutWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn is_enabled(&self) -> bool {
        self.start != self.end
    }

    /// Whether the given time of day falls inside the window
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    pub fn is_active_at(&self, now: NaiveDateTime) -> bool {
        self.contains(now.time())
    }

    /// First moment strictly after `now` at which the window closes
    pub fn end_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        next_occurrence(now, self.end)
    }

    /// First moment strictly after `now` at which the window opens
    pub fn start_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        next_occurrence(now, self.start)
    }
}

/// First moment strictly after `now` showing the given time of day
pub(crate) fn next_occurrence(now: NaiveDateTime, time: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(time);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// How long a reservation slot lasts, keyed by its start time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDurations {
    /// Nominal slot length in minutes
    pub default_minutes: u32,
    /// Start times whose slot runs longer (the closing session)
    pub extended: BTreeMap<NaiveTime, u32>,
}

impl Default for SlotDurations {
    fn default() -> Self {
        let mut extended = BTreeMap::new();
        if let Some(closing) = NaiveTime::from_hms_opt(21, 30, 0) {
            extended.insert(closing, 75);
        }
        Self {
            default_minutes: 60,
            extended,
        }
    }
}

impl SlotDurations {
    /// Length of a slot starting at `start`
    pub fn for_start(&self, start: NaiveTime) -> TimeDelta {
        let minutes = self
            .extended
            .get(&start)
            .copied()
            .unwrap_or(self.default_minutes);
        TimeDelta::minutes(i64::from(minutes))
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

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn parses_hhmm() {
        assert_eq!(parse_time_of_day("13:30").unwrap(), hm(13, 30));
        assert_eq!(parse_time_of_day(" 9:05 ").unwrap(), hm(9, 5));
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["1330", "ab:cd", "24:00", "12:60", ":30", "12:"] {
            assert!(
                matches!(parse_time_of_day(bad), Err(Error::InvalidTime(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn blackout_is_half_open() {
        let window = BlackoutWindow::default();
        assert!(!window.contains(hm(7, 29)));
        assert!(window.contains(hm(7, 30)));
        assert!(window.contains(hm(17, 29)));
        assert!(!window.contains(hm(17, 30)));
    }

    #[test]
    fn blackout_wraps_midnight() {
        let window = BlackoutWindow::new(hm(23, 0), hm(5, 0));
        assert!(window.contains(hm(23, 30)));
        assert!(window.contains(hm(4, 59)));
        assert!(!window.contains(hm(12, 0)));
        assert_eq!(window.end_after(at(23, 30)), at(5, 0) + TimeDelta::days(1));
    }

    #[test]
    fn window_bounds_after_now() {
        let window = BlackoutWindow::default();
        assert_eq!(window.end_after(at(8, 0)), at(17, 30));
        assert_eq!(window.start_after(at(6, 0)), at(7, 30));
        assert_eq!(window.start_after(at(19, 0)), at(7, 30) + TimeDelta::days(1));
    }

    #[test]
    fn closing_session_runs_longer() {
        let durations = SlotDurations::default();
        assert_eq!(durations.for_start(hm(20, 30)), TimeDelta::minutes(60));
        assert_eq!(durations.for_start(hm(21, 30)), TimeDelta::minutes(75));
    }
}
