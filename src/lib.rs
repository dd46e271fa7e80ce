/*!
 # Court Lights

 A Rust library for switching the light fixtures of a basketball venue on and
 off from the daily booking-schedule email.

 The venue has three fixtures: two half-court lights and one full-court light
 that floods both halves. Each day the booking email is turned into a set of
 reservations, the reservations into a [`SchedulePlan`], and the plan is
 driven through real time by the [`LightingScheduler`].

 ## Features

 * Booking table extraction from the raw email or its HTML part
 * Configurable full-court dependency policy
 * Back-to-back booking merge (no off/on flicker between adjacent slots)
 * Daily blackout window forcing every fixture off
 * Guaranteed "all off" when a day ends, fails or is cancelled
 * Line-protocol fixture bridge with retries and rate limiting

 ## Example

 ```rust,no_run
 use court_lights::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     tracing_subscriber::fmt::init();

     let config = Config::load("court-lights.toml")?;
     let source = FileSource::new(&config.source.path);
     let reservations = source.fetch().await?;

     let controller = DryRunController::new();
     let scheduler = LightingScheduler::new(&controller, SystemClock, config.scheduler_settings()?);
     scheduler.run_day(&reservations).await;

     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the court lights library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be parsed
    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but is not usable
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Time-of-day string could not be parsed
    #[error("Invalid time of day: {0:?}")]
    InvalidTime(String),

    /// Court name does not match any fixture
    #[error("Unknown fixture: {0:?}")]
    UnknownFixture(String),

    /// Booking email did not contain a usable schedule
    #[error("Could not extract reservations: {0}")]
    Extraction(String),

    /// Fixture bridge reported an error or answered unexpectedly
    #[error("Fixture bridge error: {0}")]
    Bridge(String),

    /// Command timeout
    #[error("Command timed out after {0} retries")]
    CommandTimeout(u8),

    /// Filesystem or process I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod clock;
pub mod config;
pub mod device;
pub mod extract;
pub mod fixture;
pub mod plan;
pub mod reservation;
pub mod schedule;
pub mod scheduler;
pub mod trigger;

// Re-export key types
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use config::{BridgeConfig, Config, FixtureConfig};
pub use device::{BridgeController, DryRunController};
pub use fixture::{Fixture, FixtureController, LightState, FIXTURES};
pub use plan::{FullCourtPolicy, SchedulePlan, Slot};
pub use reservation::{FileSource, Reservations, ReservationSource};
pub use schedule::{BlackoutWindow, SlotDurations};
pub use scheduler::{DayOutcome, LightingScheduler, SchedulerSettings};
pub use trigger::DailyTrigger;
