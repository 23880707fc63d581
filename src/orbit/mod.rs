//! Deterministic, time-varying position of a relay. Every node that knows a relay's
//!  [OrbitalState] computes the same position for the same instant, so routing decisions need
//!  no position reports.

pub mod geo;

use std::f64::consts::PI;
use std::marker::PhantomData;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::orbit::geo::GeoPoint;
use crate::util::random::Random;

/// degrees of longitude the earth turns underneath an orbit per second
pub const EARTH_ROTATION_DEG_PER_S: f64 = 360.0 / 86400.0;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Direction {
    Prograde,
    Retrograde,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Prograde => 1.0,
            Direction::Retrograde => -1.0,
        }
    }
}

impl TryFrom<i64> for Direction {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Prograde),
            -1 => Ok(Direction::Retrograde),
            other => Err(format!("orbit direction must be 1 or -1, was {}", other)),
        }
    }
}

impl From<Direction> for i64 {
    fn from(value: Direction) -> Self {
        match value {
            Direction::Prograde => 1,
            Direction::Retrograde => -1,
        }
    }
}

/// Orbital parameters of a relay. The JSON representation uses the field names relays
///  register with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOrbitalState")]
pub struct OrbitalState {
    pub init_lat: f64,
    pub init_long: f64,
    pub inclination: f64,
    pub direction: Direction,
    #[serde(rename = "period")]
    pub period_seconds: f64,
    /// unix time in seconds at which the relay was at (init_lat, init_long)
    #[serde(rename = "start_time")]
    pub epoch_time: f64,
    #[serde(rename = "altitude")]
    pub altitude_km: f64,
}

#[derive(Deserialize)]
struct RawOrbitalState {
    init_lat: f64,
    init_long: f64,
    inclination: f64,
    direction: Direction,
    period: f64,
    start_time: f64,
    altitude: f64,
}

impl TryFrom<RawOrbitalState> for OrbitalState {
    type Error = String;

    fn try_from(raw: RawOrbitalState) -> Result<Self, Self::Error> {
        OrbitalState::new(raw.init_lat, raw.init_long, raw.inclination, raw.direction, raw.period, raw.start_time, raw.altitude)
            .map_err(|e| e.to_string())
    }
}

impl OrbitalState {
    pub fn new(init_lat: f64, init_long: f64, inclination: f64, direction: Direction, period_seconds: f64, epoch_time: f64, altitude_km: f64) -> anyhow::Result<OrbitalState> {
        if !(-90.0..=90.0).contains(&init_lat) {
            bail!("initial latitude must be in [-90, 90], was {}", init_lat);
        }
        if !(-180.0..=180.0).contains(&init_long) {
            bail!("initial longitude must be in [-180, 180], was {}", init_long);
        }
        if !(0.0..=180.0).contains(&inclination) {
            bail!("inclination must be in [0, 180], was {}", inclination);
        }
        if !(period_seconds > 0.0) || !period_seconds.is_finite() {
            bail!("orbital period must be positive, was {}", period_seconds);
        }
        if !epoch_time.is_finite() || !altitude_km.is_finite() {
            bail!("epoch time and altitude must be finite");
        }

        Ok(OrbitalState {
            init_lat,
            init_long,
            inclination,
            direction,
            period_seconds,
            epoch_time,
            altitude_km,
        })
    }

    /// (lat, long) in degrees at unix time `now`
    pub fn position(&self, now: f64) -> (f64, f64) {
        position(self, now)
    }

    pub fn geo_point(&self, now: f64) -> GeoPoint {
        let (lat, long) = self.position(now);
        GeoPoint::new(lat, long, self.altitude_km)
    }
}

pub fn position(orbit: &OrbitalState, now: f64) -> (f64, f64) {
    let t = now - orbit.epoch_time;
    let theta = 2.0 * PI * t / orbit.period_seconds;

    let long = orbit.init_long
        + orbit.direction.sign() * theta.to_degrees()
        + EARTH_ROTATION_DEG_PER_S * t;
    let long = (long + 180.0).rem_euclid(360.0) - 180.0;

    let lat = (orbit.init_lat + theta.sin() * orbit.inclination).clamp(-90.0, 90.0);

    (lat, long)
}


/// Builds an orbit for a relay that was started without explicit parameters. Anything that
///  is given is used as is, the rest is drawn at random within plausible low earth orbit bounds.
pub struct OrbitBuilder<R: Random> {
    pub init_lat: Option<f64>,
    pub init_long: Option<f64>,
    pub inclination: Option<f64>,
    pub direction: Option<Direction>,
    pub period_seconds: Option<f64>,
    pub altitude_km: Option<f64>,
    _random: PhantomData<R>,
}

impl <R: Random> Default for OrbitBuilder<R> {
    fn default() -> Self {
        OrbitBuilder {
            init_lat: None,
            init_long: None,
            inclination: None,
            direction: None,
            period_seconds: None,
            altitude_km: None,
            _random: Default::default(),
        }
    }
}

impl <R: Random> OrbitBuilder<R> {
    pub const DEFAULT_PERIOD_SECONDS: f64 = 5400.0;
    pub const ALTITUDE_RANGE_KM: std::ops::Range<f64> = 340.0..1200.0;

    pub fn build(self, epoch_time: f64) -> anyhow::Result<OrbitalState> {
        let direction = match self.direction {
            Some(d) => d,
            None => if R::gen_bool() { Direction::Prograde } else { Direction::Retrograde },
        };

        OrbitalState::new(
            self.init_lat.unwrap_or_else(|| R::gen_f64_range(-90.0..90.0)),
            self.init_long.unwrap_or_else(|| R::gen_f64_range(-180.0..180.0)),
            self.inclination.unwrap_or_else(|| R::gen_f64_range(0.0..180.0)),
            direction,
            self.period_seconds.unwrap_or(Self::DEFAULT_PERIOD_SECONDS),
            epoch_time,
            self.altitude_km.unwrap_or_else(|| R::gen_f64_range(Self::ALTITUDE_RANGE_KM)),
        )
    }
}
