//! Greedy geographic routing: every node forwards to the closest node that the message has not
//!  visited yet. The ground station is always a candidate for relays, so a message ends there
//!  once it is the closest unvisited node - or once everything else was visited.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::GroundStationInfo;
use crate::directory::client::DirectoryClient;
use crate::directory::DirectoryRecord;
use crate::messaging::envelope::Path;
use crate::orbit::geo::{haversine_3d, propagation_delay_secs, GeoPoint};
use crate::orbit::OrbitalState;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("No route to a ground station")]
    NoRoute,
    #[error("Directory unavailable: {0}")]
    Directory(String),
    #[error("Invalid distance to {name}: {distance_km}")]
    InvalidDistance { name: String, distance_km: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Orbit(OrbitalState),
    Fixed(GeoPoint),
}

impl Location {
    pub fn at(&self, now: f64) -> GeoPoint {
        match self {
            Location::Orbit(orbit) => orbit.geo_point(now),
            Location::Fixed(point) => *point,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CandidateRole {
    Relay,
    GroundStation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub device_name: String,
    pub addr: String,
    pub location: Location,
    pub role: CandidateRole,
}

impl Candidate {
    /// `None` for records without orbital parameters: their position is unknown
    pub fn from_record(record: &DirectoryRecord) -> Option<Candidate> {
        let orbit = record.orbit.as_ref()?;
        Some(Candidate {
            device_name: record.device_name.clone(),
            addr: record.addr.clone(),
            location: Location::Orbit(orbit.clone()),
            role: CandidateRole::Relay,
        })
    }

    pub fn ground_station(info: &GroundStationInfo) -> Candidate {
        Candidate {
            device_name: info.name.clone(),
            addr: info.addr.clone(),
            location: Location::Fixed(info.position),
            role: CandidateRole::GroundStation,
        }
    }

    pub fn is_ground_station(&self) -> bool {
        self.role == CandidateRole::GroundStation
    }
}

#[derive(Debug, Clone)]
pub struct HopSelection {
    pub candidate: Candidate,
    pub distance_km: f64,
    /// simulated propagation delay to the chosen hop
    pub delay: Duration,
}

/// Picks the candidate closest to `origin` whose name is not on `visited`. Ties go to the
///  candidate listed first.
pub fn select_next_hop(origin: &GeoPoint, candidates: &[Candidate], visited: &Path, now: f64) -> Result<HopSelection, RoutingError> {
    let mut best: Option<(&Candidate, f64)> = None;

    for candidate in candidates {
        if visited.contains(&candidate.device_name) {
            trace!("skipping {} - already on path {}", candidate.device_name, visited);
            continue;
        }

        let distance = haversine_3d(origin, &candidate.location.at(now));
        if !distance.is_finite() {
            warn!("skipping {} - distance is {}", candidate.device_name, distance);
            continue;
        }
        trace!("distance to {}: {:.2} km", candidate.device_name, distance);

        match best {
            Some((_, best_distance)) if !(distance < best_distance) => {}
            _ => best = Some((candidate, distance)),
        }
    }

    let (candidate, distance_km) = best.ok_or(RoutingError::NoRoute)?;
    let delay = propagation_delay_secs(distance_km);
    debug!("closest node is {} at {:.2} km, delay {:.6}s", candidate.device_name, distance_km, delay);

    let delay = Duration::try_from_secs_f64(delay)
        .map_err(|_| RoutingError::InvalidDistance { name: candidate.device_name.clone(), distance_km })?;

    Ok(HopSelection {
        candidate: candidate.clone(),
        distance_km,
        delay,
    })
}

/// Routing against the live directory: every decision fetches a fresh candidate set.
pub struct Router {
    directory: Arc<dyn DirectoryClient>,
    ground_station: Option<Candidate>,
}

impl Router {
    /// Relays pass the ground station; trackers route to relays only.
    pub fn new(directory: Arc<dyn DirectoryClient>, ground_station: Option<&GroundStationInfo>) -> Router {
        Router {
            directory,
            ground_station: ground_station.map(Candidate::ground_station),
        }
    }

    pub async fn candidates(&self) -> Result<Vec<Candidate>, RoutingError> {
        let records = self.directory.list().await
            .map_err(|e| RoutingError::Directory(e.to_string()))?;

        let mut result = Vec::with_capacity(records.len() + 1);
        for record in &records {
            match Candidate::from_record(record) {
                Some(candidate) => result.push(candidate),
                None => debug!("{} has no orbital parameters - not routable", record.device_name),
            }
        }
        if let Some(ground_station) = &self.ground_station {
            result.push(ground_station.clone());
        }
        Ok(result)
    }

    pub async fn next_hop(&self, origin: &GeoPoint, visited: &Path, now: f64) -> Result<HopSelection, RoutingError> {
        let candidates = self.candidates().await?;
        select_next_hop(origin, &candidates, visited, now)
    }
}
