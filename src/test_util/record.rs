use crate::directory::DirectoryRecord;
use crate::orbit::{Direction, OrbitalState};

pub const TEST_EPOCH: f64 = 1_700_000_000.0;

/// prograde orbit starting at (10, 20) at [TEST_EPOCH], 550 km up
pub fn test_orbit(inclination: f64, period_seconds: f64) -> OrbitalState {
    OrbitalState {
        init_lat: 10.0,
        init_long: 20.0,
        inclination,
        direction: Direction::Prograde,
        period_seconds,
        epoch_time: TEST_EPOCH,
        altitude_km: 550.0,
    }
}

pub fn test_record(device_name: &str, addr: &str) -> DirectoryRecord {
    DirectoryRecord {
        device_name: device_name.to_string(),
        addr: addr.to_string(),
        orbit: Some(test_orbit(10.0, 360.0)),
    }
}
