/*!
 # Configuration

 Everything the daemon needs is read once at startup from a TOML file:
 fixture identities and secrets, the bridge process, where the booking
 email is dropped, and the scheduling tunables.

 ```toml
 [schedule]
 full_court_policy = "shared-area"
 daily_run_at = "05:10"

 [blackout]
 start = "07:30"
 end = "17:30"

 [source]
 path = "/var/lib/court-lights/schedule.eml"

 [fixtures.half_court_a]
 device_id = "ebf1a2..."
 local_key = "..."
 ```
*/

use chrono::NaiveTime;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::fixture::Fixture;
use crate::plan::FullCourtPolicy;
use crate::schedule::{deserialize_hhmm, parse_time_of_day, BlackoutWindow, SlotDurations};
use crate::scheduler::SchedulerSettings;
use crate::{Error, Result};

/// Root of the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub blackout: BlackoutWindow,
    pub source: SourceConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    pub fixtures: FixturesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Nominal slot length in minutes
    pub slot_minutes: u32,
    /// `HH:MM` start times whose slot runs longer, with their length
    pub extended_slots: BTreeMap<String, u32>,
    /// Wake-up period while a slot is active, also the daily trigger poll
    pub poll_seconds: u64,
    pub full_court_policy: FullCourtPolicy,
    /// Time of day at which the daily routine runs
    #[serde(deserialize_with = "deserialize_hhmm")]
    pub daily_run_at: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 60,
            extended_slots: BTreeMap::from([("21:30".to_string(), 75)]),
            poll_seconds: 60,
            full_court_policy: FullCourtPolicy::default(),
            daily_run_at: NaiveTime::from_hms_opt(5, 10, 0).unwrap_or_default(),
        }
    }
}

/// Where the booking email is read from
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
}

/// Helper process that speaks to the fixtures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Upper bound for one command round trip
    pub command_timeout_secs: u64,
    /// Minimum spacing between two commands
    pub command_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "tuya-bridge".to_string(),
            args: Vec::new(),
            command_timeout_secs: 10,
            command_delay_ms: 250,
        }
    }
}

/// Network identity of one fixture
#[derive(Clone, PartialEq, Deserialize)]
pub struct FixtureConfig {
    pub device_id: String,
    /// IP address, or "Auto" to let the bridge discover it
    #[serde(default = "default_address")]
    pub address: String,
    pub local_key: String,
    #[serde(default = "default_version")]
    pub version: f64,
}

impl std::fmt::Debug for FixtureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureConfig")
            .field("device_id", &self.device_id)
            .field("address", &self.address)
            .field("local_key", &"<redacted>")
            .field("version", &self.version)
            .finish()
    }
}

fn default_address() -> String {
    "Auto".to_string()
}

fn default_version() -> f64 {
    3.4
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixturesConfig {
    pub half_court_a: FixtureConfig,
    pub half_court_b: FixtureConfig,
    pub full_court: FixtureConfig,
}

impl Config {
    /// Loads and validates the configuration file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Identity of the given fixture
    pub fn fixture(&self, fixture: Fixture) -> &FixtureConfig {
        match fixture {
            Fixture::HalfCourtA => &self.fixtures.half_court_a,
            Fixture::HalfCourtB => &self.fixtures.half_court_b,
            Fixture::FullCourt => &self.fixtures.full_court,
        }
    }

    pub fn slot_durations(&self) -> Result<SlotDurations> {
        let mut extended = BTreeMap::new();
        for (start, minutes) in &self.schedule.extended_slots {
            let start = parse_time_of_day(start)
                .map_err(|e| Error::InvalidConfig(format!("extended_slots: {e}")))?;
            extended.insert(start, *minutes);
        }
        Ok(SlotDurations {
            default_minutes: self.schedule.slot_minutes,
            extended,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.poll_seconds)
    }

    pub fn scheduler_settings(&self) -> Result<SchedulerSettings> {
        Ok(SchedulerSettings {
            blackout: self.blackout,
            durations: self.slot_durations()?,
            policy: self.schedule.full_court_policy,
            poll_interval: self.poll_interval(),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.schedule.slot_minutes == 0 {
            return Err(Error::InvalidConfig("slot_minutes must be positive".into()));
        }
        if self.schedule.poll_seconds == 0 {
            return Err(Error::InvalidConfig("poll_seconds must be positive".into()));
        }
        if self.schedule.extended_slots.values().any(|minutes| *minutes == 0) {
            return Err(Error::InvalidConfig(
                "extended_slots durations must be positive".into(),
            ));
        }
        if self.bridge.command.trim().is_empty() {
            return Err(Error::InvalidConfig("bridge.command is empty".into()));
        }
        self.slot_durations()?;
        Ok(())
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}
