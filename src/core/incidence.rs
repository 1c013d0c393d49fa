//! Local incidence angles from a 3x3 DEM stencil

use crate::core::geodesy::{ellipsoid_normal, geodetic_to_cartesian};
use crate::types::{GeoPos, Vector3, RTOD};

/// Ground neighbourhood of a cell used for surface normal estimation
#[derive(Debug, Clone, Copy)]
pub struct LocalGeometry {
    pub left_point: GeoPos,
    pub right_point: GeoPos,
    pub up_point: GeoPos,
    pub down_point: GeoPos,
    pub centre_point: Vector3,
    pub sensor_position: Vector3,
}

impl LocalGeometry {
    /// Neighbours on a regular lat/lon grid, `up` towards north
    pub fn from_grid(
        lat: f64,
        lon: f64,
        del_lat: f64,
        del_lon: f64,
        centre_point: Vector3,
        sensor_position: Vector3,
    ) -> Self {
        Self {
            left_point: GeoPos::new(lat, lon - del_lon),
            right_point: GeoPos::new(lat, lon + del_lon),
            up_point: GeoPos::new(lat + del_lat, lon),
            down_point: GeoPos::new(lat - del_lat, lon),
            centre_point,
            sensor_position,
        }
    }
}

/// Local and projected local incidence angles (degrees)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IncidenceAngles {
    pub local: f64,
    pub projected: f64,
}

/// Incidence angles from a 3x3 height stencil (`heights[row][col]`, row 0 = up, col 0 = left).
///
/// Returns `None` if any stencil height equals `dem_no_data`.
pub fn incidence_angles(
    geometry: &LocalGeometry,
    heights: &[[f64; 3]; 3],
    dem_no_data: f64,
) -> Option<IncidenceAngles> {
    if heights
        .iter()
        .flatten()
        .any(|&h| h == dem_no_data || h.is_nan())
    {
        return None;
    }

    let right_height = (heights[0][2] + heights[1][2] + heights[2][2]) / 3.0;
    let left_height = (heights[0][0] + heights[1][0] + heights[2][0]) / 3.0;
    let up_height = (heights[0][0] + heights[0][1] + heights[0][2]) / 3.0;
    let down_height = (heights[2][0] + heights[2][1] + heights[2][2]) / 3.0;

    let right = to_cartesian(&geometry.right_point, right_height);
    let left = to_cartesian(&geometry.left_point, left_height);
    let up = to_cartesian(&geometry.up_point, up_height);
    let down = to_cartesian(&geometry.down_point, down_height);

    let a = right - left;
    let b = down - up;
    let mut normal = a.cross(&b).normalized();
    if normal.dot(&geometry.centre_point) < 0.0 {
        normal = -normal;
    }

    let look = (geometry.sensor_position - geometry.centre_point).normalized();
    let local = angle_between_unit(&normal, &look);

    let m = look.cross(&geometry.centre_point).normalized();
    let projected_normal = (normal - m * m.dot(&normal)).normalized();
    let projected = angle_between_unit(&projected_normal, &look);

    Some(IncidenceAngles { local, projected })
}

fn to_cartesian(pos: &GeoPos, height: f64) -> Vector3 {
    geodetic_to_cartesian(pos.lat, pos.lon, height)
}

fn angle_between_unit(a: &Vector3, b: &Vector3) -> f64 {
    a.dot(b).clamp(-1.0, 1.0).acos() * RTOD
}

/// Incidence angle (degrees) between the look vector and the ellipsoid normal
pub fn incidence_angle_from_ellipsoid(pos: &GeoPos, ground: &Vector3, sensor: &Vector3) -> f64 {
    let look = (*sensor - *ground).normalized();
    angle_between_unit(&ellipsoid_normal(pos.lat, pos.lon), &look)
}

/// Angle at the sensor between nadir and the look direction (degrees)
pub fn elevation_angle(slant_range: f64, ground: &Vector3, sensor: &Vector3) -> f64 {
    let h2 = sensor.dot(sensor);
    let r2 = ground.dot(ground);
    let cos = (slant_range * slant_range + h2 - r2) / (2.0 * slant_range * h2.sqrt());
    cos.clamp(-1.0, 1.0).acos() * RTOD
}
