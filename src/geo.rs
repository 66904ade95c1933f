//! Great-circle geometry on a spherical Earth
//!
//! Distance (degrees and kilometers) and forward azimuth between two
//! latitude/longitude points. Used when a fresh travel-time record must be
//! computed for an (event, station) pair.

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometers per degree of great-circle arc.
pub const KM_PER_DEG: f64 = EARTH_RADIUS_KM * std::f64::consts::PI / 180.0;

/// Great-circle distance between two points, in degrees of arc.
///
/// Haversine formulation; stable for both small and antipodal separations.
pub fn distance_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    c.to_degrees()
}

/// Great-circle distance between two points, in kilometers.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    distance_deg(lat1, lon1, lat2, lon2) * KM_PER_DEG
}

/// Forward azimuth from point 1 to point 2, degrees clockwise from north
/// in `[0, 360)`.
pub fn azimuth_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_zero_distance() {
        assert!(close(distance_deg(35.0, -106.0, 35.0, -106.0), 0.0, 1e-9));
    }

    #[test]
    fn test_equator_to_pole_is_quarter_circle() {
        assert!(close(distance_deg(0.0, 0.0, 90.0, 0.0), 90.0, 1e-6));
    }

    #[test]
    fn test_along_equator() {
        assert!(close(distance_deg(0.0, 10.0, 0.0, 55.0), 45.0, 1e-6));
        assert!(close(
            distance_km(0.0, 0.0, 0.0, 1.0),
            KM_PER_DEG,
            1e-6
        ));
    }

    #[test]
    fn test_cardinal_azimuths() {
        assert!(close(azimuth_deg(0.0, 0.0, 10.0, 0.0), 0.0, 1e-6));
        assert!(close(azimuth_deg(0.0, 0.0, 0.0, 10.0), 90.0, 1e-6));
        assert!(close(azimuth_deg(10.0, 0.0, 0.0, 0.0), 180.0, 1e-6));
        assert!(close(azimuth_deg(0.0, 10.0, 0.0, 0.0), 270.0, 1e-6));
    }

    #[test]
    fn test_azimuth_in_range() {
        let az = azimuth_deg(35.0, -106.0, 64.9, -147.9);
        assert!((0.0..360.0).contains(&az));
    }
}
