//! WGS84 geodetic <-> earth-fixed Cartesian conversions

use crate::types::{wgs84, GeoPos, Vector3, DTOR, RTOD};

const MAX_ITERATIONS: usize = 10;
const LATITUDE_TOLERANCE: f64 = 1e-12; // radians

/// Convert geodetic latitude/longitude (degrees) and ellipsoid height (m) to ECEF
pub fn geodetic_to_cartesian(lat: f64, lon: f64, height: f64) -> Vector3 {
    let lat_rad = lat * DTOR;
    let lon_rad = lon * DTOR;
    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();

    let n = wgs84::SEMI_MAJOR_AXIS / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();

    Vector3::new(
        (n + height) * cos_lat * lon_rad.cos(),
        (n + height) * cos_lat * lon_rad.sin(),
        (n * (1.0 - wgs84::E2) + height) * sin_lat,
    )
}

/// Convert ECEF to geodetic position (degrees) and ellipsoid height (m)
pub fn cartesian_to_geodetic(point: &Vector3) -> (GeoPos, f64) {
    let p = (point.x * point.x + point.y * point.y).sqrt();
    let lon = point.y.atan2(point.x);

    if p < 1e-9 {
        let lat = if point.z >= 0.0 { 90.0 } else { -90.0 };
        return (GeoPos::new(lat, lon * RTOD), point.z.abs() - wgs84::SEMI_MINOR_AXIS);
    }

    let mut lat = point.z.atan2(p * (1.0 - wgs84::E2));
    let mut height = 0.0;
    for _ in 0..MAX_ITERATIONS {
        let sin_lat = lat.sin();
        let n = wgs84::SEMI_MAJOR_AXIS / (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();
        height = p / lat.cos() - n;
        let next = point.z.atan2(p * (1.0 - wgs84::E2 * n / (n + height)));
        let converged = (next - lat).abs() < LATITUDE_TOLERANCE;
        lat = next;
        if converged {
            break;
        }
    }

    (GeoPos::new(lat * RTOD, lon * RTOD), height)
}

/// Outward ellipsoid normal at a geodetic position
pub fn ellipsoid_normal(lat: f64, lon: f64) -> Vector3 {
    let lat_rad = lat * DTOR;
    let lon_rad = lon * DTOR;
    Vector3::new(
        lat_rad.cos() * lon_rad.cos(),
        lat_rad.cos() * lon_rad.sin(),
        lat_rad.sin(),
    )
}

/// Output pixel spacing in degrees for a spacing in meters
pub fn pixel_spacing_in_degree(pixel_spacing_m: f64) -> f64 {
    pixel_spacing_m / wgs84::SEMI_MAJOR_AXIS * RTOD
}

/// Output pixel spacing in meters for a spacing in degrees
pub fn pixel_spacing_in_meter(pixel_spacing_deg: f64) -> f64 {
    pixel_spacing_deg * DTOR * wgs84::SEMI_MAJOR_AXIS
}

/// Absolute longitude difference in degrees, taking the date line into account
pub fn longitude_difference(lon: f64, other: f64) -> f64 {
    if lon < 0.0 && other > 0.0 {
        (360.0 + lon - other).abs().min(other - lon)
    } else if lon > 0.0 && other < 0.0 {
        (360.0 + other - lon).abs().min(lon - other)
    } else {
        (lon - other).abs()
    }
}
