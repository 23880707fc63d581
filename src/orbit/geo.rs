pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const SPEED_OF_LIGHT_KM_PER_S: f64 = 299_792.458;

/// A position above (or below) the earth's surface. Altitude is relative to sea level, negative
///  values are below the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub long: f64,
    pub altitude_km: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, long: f64, altitude_km: f64) -> GeoPoint {
        GeoPoint { lat, long, altitude_km }
    }

    pub fn on_surface(lat: f64, long: f64) -> GeoPoint {
        GeoPoint::new(lat, long, 0.0)
    }
}

/// Great-circle distance on a sphere of [EARTH_RADIUS_KM], combined with the altitude difference
///  as if the two were orthogonal. That is a crude approximation, but it is what the network
///  uses to compare candidates, and it is consistent across nodes.
pub fn haversine_3d(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let delta_phi = (b.lat - a.lat).to_radians();
    let delta_lambda = (b.long - a.long).to_radians();

    // rounding pushes h slightly past 1 for near-antipodal points
    let h = ((delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2))
        .clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    let horizontal = EARTH_RADIUS_KM * c;

    let vertical = b.altitude_km - a.altitude_km;
    (horizontal * horizontal + vertical * vertical).sqrt()
}

/// simulated radio propagation delay over a distance, in seconds
pub fn propagation_delay_secs(distance_km: f64) -> f64 {
    distance_km / SPEED_OF_LIGHT_KM_PER_S
}
