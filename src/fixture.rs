/*!
 # Fixtures and light states

 The venue has three physically controllable lights. This module names
 them, describes a configuration of all three, and defines the controller
 seam the scheduler drives them through.
*/

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// One controllable light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fixture {
    /// Lights the first half court
    HalfCourtA,
    /// Lights the second half court
    HalfCourtB,
    /// Floods the whole court, both halves included
    FullCourt,
}

/// All fixtures, in command order
pub const FIXTURES: [Fixture; 3] = [Fixture::HalfCourtA, Fixture::HalfCourtB, Fixture::FullCourt];

impl Fixture {
    /// Name used by the booking system
    pub fn name(&self) -> &'static str {
        match self {
            Fixture::HalfCourtA => "Half Court A",
            Fixture::HalfCourtB => "Half Court B",
            Fixture::FullCourt => "Full Court",
        }
    }
}

impl fmt::Display for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Fixture {
    type Err = Error;

    /// Accepts booking names ("Full Court.") as well as the snake case keys
    /// used in the configuration file ("full_court").
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s
            .trim()
            .trim_end_matches('.')
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ");

        match normalized.as_str() {
            "half court a" => Ok(Fixture::HalfCourtA),
            "half court b" => Ok(Fixture::HalfCourtB),
            "full court" => Ok(Fixture::FullCourt),
            _ => Err(Error::UnknownFixture(s.to_string())),
        }
    }
}

/// Desired on/off configuration of every fixture at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightState {
    pub half_a: bool,
    pub half_b: bool,
    pub full: bool,
}

impl LightState {
    /// Everything off
    pub const OFF: LightState = LightState {
        half_a: false,
        half_b: false,
        full: false,
    };

    /// Everything on
    pub const ALL_ON: LightState = LightState {
        half_a: true,
        half_b: true,
        full: true,
    };

    /// Whether the given fixture is lit in this state
    pub fn is_on(&self, fixture: Fixture) -> bool {
        match fixture {
            Fixture::HalfCourtA => self.half_a,
            Fixture::HalfCourtB => self.half_b,
            Fixture::FullCourt => self.full,
        }
    }

    /// Fixtures lit in this state
    pub fn lit(&self) -> impl Iterator<Item = Fixture> + '_ {
        FIXTURES.into_iter().filter(move |f| self.is_on(*f))
    }

    pub fn is_off(&self) -> bool {
        *self == LightState::OFF
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_off() {
            return f.write_str("all off");
        }
        let names: Vec<&str> = self.lit().map(|fixture| fixture.name()).collect();
        write!(f, "{} on", names.join(" + "))
    }
}

/// Seam between the scheduler and the physical lights.
///
/// Commands are idempotent: switching on a fixture that is already on is not
/// an error. Implementations must be `Send + Sync` so a single controller can
/// be shared by the scheduler and the shutdown path.
#[async_trait]
pub trait FixtureController: Send + Sync {
    /// Switches a fixture on
    async fn turn_on(&self, fixture: Fixture) -> Result<()>;

    /// Switches a fixture off
    async fn turn_off(&self, fixture: Fixture) -> Result<()>;

    /// Reports whether a fixture is currently on
    async fn status(&self, fixture: Fixture) -> Result<bool>;

    /// Switches a fixture to the given value
    async fn set(&self, fixture: Fixture, on: bool) -> Result<()> {
        if on {
            self.turn_on(fixture).await
        } else {
            self.turn_off(fixture).await
        }
    }
}

#[async_trait]
impl<T: FixtureController + ?Sized> FixtureController for &T {
    async fn turn_on(&self, fixture: Fixture) -> Result<()> {
        (**self).turn_on(fixture).await
    }

    async fn turn_off(&self, fixture: Fixture) -> Result<()> {
        (**self).turn_off(fixture).await
    }

    async fn status(&self, fixture: Fixture) -> Result<bool> {
        (**self).status(fixture).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_booking_names() {
        assert_eq!("Half Court A".parse::<Fixture>().unwrap(), Fixture::HalfCourtA);
        assert_eq!(" half court b. ".parse::<Fixture>().unwrap(), Fixture::HalfCourtB);
        assert_eq!("Full Court.".parse::<Fixture>().unwrap(), Fixture::FullCourt);
        assert_eq!("full_court".parse::<Fixture>().unwrap(), Fixture::FullCourt);
    }

    #[test]
    fn rejects_unknown_court() {
        let err = "Court 3".parse::<Fixture>().unwrap_err();
        assert!(matches!(err, Error::UnknownFixture(name) if name == "Court 3"));
    }

    #[test]
    fn lists_lit_fixtures() {
        let state = LightState {
            half_a: true,
            half_b: false,
            full: true,
        };
        let lit: Vec<Fixture> = state.lit().collect();
        assert_eq!(lit, vec![Fixture::HalfCourtA, Fixture::FullCourt]);
        assert_eq!(state.to_string(), "Half Court A + Full Court on");
        assert_eq!(LightState::OFF.to_string(), "all off");
    }
}
