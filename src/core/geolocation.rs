//! Forward geolocation: radar pixel + height -> ground point.
//!
//! Newton iteration on the zero-Doppler, range-sphere and ellipsoid equations.

use crate::core::geodesy::{cartesian_to_geodetic, geodetic_to_cartesian};
use crate::core::incidence::incidence_angle_from_ellipsoid;
use crate::core::orbit::{OrbitInterpolator, SensorState};
use crate::core::range::RangeIndexMapper;
use crate::io::metadata::SarMetadata;
use crate::io::tie_point::{TiePointGeometry, TiePointGrid};
use crate::types::{
    wgs84, GeoPos, SarError, SarResult, Vector3, LIGHT_SPEED_IN_METERS_PER_DAY, SECONDS_IN_DAY,
};
use ndarray::Array2;

const MAX_ITERATIONS: usize = 10;
const POSITION_TOLERANCE: f64 = 1e-6; // m
const HEIGHT_REFINEMENTS: usize = 3;
const HEIGHT_TOLERANCE: f64 = 1e-3; // m

/// Solve `a * x = b` for a 3x3 system by Cramer's rule
pub fn solve33(a: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let det = |m: &[[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };

    let d = det(a);
    if d == 0.0 || !d.is_finite() {
        return None;
    }

    let mut x = [0.0; 3];
    for (col, xi) in x.iter_mut().enumerate() {
        let mut m = *a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *xi = det(&m) / d;
    }
    Some(x)
}

/// Radar pixel to ground point conversion for one product
#[derive(Debug, Clone)]
pub struct Geolocator {
    interpolator: OrbitInterpolator,
    mapper: RangeIndexMapper,
    first_line_time: f64,
    line_time_interval: f64, // days
    skip_bistatic_correction: bool,
    scene_centre: GeoPos,
}

impl Geolocator {
    pub fn new(metadata: &SarMetadata, srgr_tolerance: Option<f64>) -> SarResult<Self> {
        metadata.validate()?;
        Ok(Self {
            interpolator: OrbitInterpolator::new(
                &metadata.orbit_state_vectors,
                metadata.first_line_time,
            )?,
            mapper: metadata.range_index_mapper(srgr_tolerance)?,
            first_line_time: metadata.first_line_time,
            line_time_interval: metadata.line_time_interval / SECONDS_IN_DAY,
            skip_bistatic_correction: metadata.skip_bistatic_correction(),
            scene_centre: metadata.scene_centre,
        })
    }

    /// Sensor state at a fractional azimuth line
    pub fn sensor_state(&self, azimuth_index: f64) -> SensorState {
        self.interpolator
            .interpolate(self.first_line_time + azimuth_index * self.line_time_interval)
    }

    /// Ground point at `height` above the ellipsoid imaged at the given pixel
    pub fn pixel_to_ground(
        &self,
        range_index: f64,
        azimuth_index: f64,
        height: f64,
        initial: &Vector3,
    ) -> SarResult<Vector3> {
        let time = self.first_line_time + azimuth_index * self.line_time_interval;
        let slant_range = self.mapper.slant_range_at(time, range_index);
        let range_sensor = self.interpolator.position(time);

        let doppler_time = if self.skip_bistatic_correction {
            time
        } else {
            time - slant_range / LIGHT_SPEED_IN_METERS_PER_DAY
        };
        let doppler_sensor = self.interpolator.interpolate(doppler_time);

        // The ellipsoid equation uses a+h, b+h; correct the offset until the
        // geodetic height matches.
        let mut point = *initial;
        let mut surface_height = height;
        for _ in 0..HEIGHT_REFINEMENTS {
            point = newton_solve(
                &point,
                &doppler_sensor,
                &range_sensor,
                slant_range,
                surface_height,
            )?;
            let (_, actual) = cartesian_to_geodetic(&point);
            if (actual - height).abs() < HEIGHT_TOLERANCE {
                break;
            }
            surface_height += height - actual;
        }
        Ok(point)
    }

    /// Geodetic position of a pixel, seeded from the scene centre
    pub fn pixel_to_geo(&self, range_index: f64, azimuth_index: f64, height: f64) -> SarResult<GeoPos> {
        let seed = geodetic_to_cartesian(self.scene_centre.lat, self.scene_centre.lon, height);
        let point = self.pixel_to_ground(range_index, azimuth_index, height, &seed)?;
        Ok(cartesian_to_geodetic(&point).0)
    }

    /// Latitude, longitude and incidence angle tie points every `sub_sampling` pixels
    pub fn tie_point_geometry(
        &self,
        width: usize,
        height: usize,
        sub_sampling: usize,
        terrain_height: f64,
    ) -> SarResult<TiePointGeometry> {
        if sub_sampling == 0 || width < 2 || height < 2 {
            return Err(SarError::Configuration(format!(
                "Cannot build tie points for {}x{} image with sub-sampling {}",
                width, height, sub_sampling
            )));
        }
        let nx = (width - 1 + sub_sampling - 1) / sub_sampling + 1;
        let ny = (height - 1 + sub_sampling - 1) / sub_sampling + 1;

        let mut lat = Array2::zeros((ny, nx));
        let mut lon = Array2::zeros((ny, nx));
        let mut inc = Array2::zeros((ny, nx));

        let mut row_seed = geodetic_to_cartesian(
            self.scene_centre.lat,
            self.scene_centre.lon,
            terrain_height,
        );
        for j in 0..ny {
            let y = (j * sub_sampling) as f64;
            let mut seed = row_seed;
            for i in 0..nx {
                let x = (i * sub_sampling) as f64;
                let point = self.pixel_to_ground(x, y, terrain_height, &seed)?;
                let (pos, _) = cartesian_to_geodetic(&point);
                let sensor = self.sensor_state(y).position;

                lat[[j, i]] = pos.lat;
                lon[[j, i]] = pos.lon;
                inc[[j, i]] = incidence_angle_from_ellipsoid(&pos, &point, &sensor);

                seed = point;
                if i == 0 {
                    row_seed = point;
                }
            }
        }

        log::debug!("Built {}x{} tie-point grid by forward geolocation", nx, ny);

        let step = sub_sampling as f64;
        Ok(TiePointGeometry {
            latitude: TiePointGrid::new(0.0, 0.0, step, step, lat)?,
            longitude: TiePointGrid::longitudes(0.0, 0.0, step, step, lon)?,
            incidence_angle: TiePointGrid::new(0.0, 0.0, step, step, inc)?,
        })
    }
}

fn newton_solve(
    initial: &Vector3,
    doppler_sensor: &SensorState,
    range_sensor: &Vector3,
    slant_range: f64,
    height: f64,
) -> SarResult<Vector3> {
    let a2 = (wgs84::SEMI_MAJOR_AXIS + height).powi(2);
    let b2 = (wgs84::SEMI_MINOR_AXIS + height).powi(2);
    let v = doppler_sensor.velocity;

    let mut p = *initial;
    for _ in 0..MAX_ITERATIONS {
        let to_doppler = p - doppler_sensor.position;
        let to_range = p - *range_sensor;

        let residual = [
            -v.dot(&to_doppler),
            -(to_range.dot(&to_range) - slant_range * slant_range),
            -((p.x * p.x + p.y * p.y) / a2 + p.z * p.z / b2 - 1.0),
        ];
        let jacobian = [
            [v.x, v.y, v.z],
            [2.0 * to_range.x, 2.0 * to_range.y, 2.0 * to_range.z],
            [2.0 * p.x / a2, 2.0 * p.y / a2, 2.0 * p.z / b2],
        ];

        let step = solve33(&jacobian, &residual).ok_or_else(|| {
            SarError::Geolocation("Singular geolocation system".to_string())
        })?;
        p = p + Vector3::from_array(step);

        if step.iter().all(|s| s.abs() < POSITION_TOLERANCE) {
            return Ok(p);
        }
    }

    Err(SarError::Geolocation(format!(
        "No convergence after {} iterations for slant range {:.1} m",
        MAX_ITERATIONS, slant_range
    )))
}
