/*!
 # Reservations

 A reservation source hands over today's bookings as an unordered mapping
 from `HH:MM` start time to the courts booked at that time. This module
 validates that mapping into typed, time-ordered [`Reservation`]s.
*/

use async_trait::async_trait;
use chrono::NaiveTime;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::extract;
use crate::fixture::Fixture;
use crate::schedule::parse_time_of_day;
use crate::Result;

/// Raw booking mapping: 24-hour `HH:MM` start time to booked court names
pub type Reservations = HashMap<String, Vec<String>>;

/// One validated booking slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub start: NaiveTime,
    pub courts: BTreeSet<Fixture>,
}

/// Validates a raw mapping into reservations sorted by start time.
///
/// Entries whose key is not a valid time of day are dropped, as are court
/// names that match no fixture. A slot left without any known court is
/// dropped too. Nothing here aborts the run.
pub fn parse_reservations(raw: &Reservations) -> Vec<Reservation> {
    let mut parsed: Vec<Reservation> = Vec::with_capacity(raw.len());

    for (time, names) in raw {
        let start = match parse_time_of_day(time) {
            Ok(start) => start,
            Err(e) => {
                warn!("Dropping reservation: {}", e);
                continue;
            }
        };

        let mut courts = BTreeSet::new();
        for name in names {
            match name.parse::<Fixture>() {
                Ok(fixture) => {
                    courts.insert(fixture);
                }
                Err(e) => warn!("Ignoring court in {} reservation: {}", time, e),
            }
        }

        if courts.is_empty() {
            warn!("Dropping {} reservation without a known court", time);
            continue;
        }

        parsed.push(Reservation { start, courts });
    }

    parsed.sort_by_key(|reservation| reservation.start);
    debug!("Parsed {} of {} reservation entries", parsed.len(), raw.len());
    parsed
}

/// Producer of today's bookings
#[async_trait]
pub trait ReservationSource: Send + Sync {
    async fn fetch(&self) -> Result<Reservations>;
}

/// Reads the booking email from a file.
///
/// The file may hold the raw message as delivered by the mail agent or just
/// its HTML part.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReservationSource for FileSource {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn fetch(&self) -> Result<Reservations> {
        debug!("Reading booking email");
        let content = tokio::fs::read_to_string(&self.path).await?;
        let reservations = extract::reservations_from_message(&content)?;

        info!("Reservations for today:");
        let mut times: Vec<&String> = reservations.keys().collect();
        times.sort();
        for time in times {
            info!("Time: {}, Courts: {}", time, reservations[time].join(", "));
        }

        Ok(reservations)
    }
}
