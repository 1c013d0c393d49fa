//! Slant range, slant-range to ground-range conversion and source range indices.
//!
//! Ground-range products carry time-stamped SRGR polynomials giving slant range as a
//! function of ground range; the inverse is found by bisection.

use crate::core::orbit::OrbitInterpolator;
use crate::types::{SarError, SarResult, SrgrCoefficients, Vector3};

const MAX_BISECTION_ITERATIONS: usize = 200;

/// Default SRGR convergence tolerance for a given ground range spacing (m)
pub fn default_srgr_tolerance(range_spacing: f64) -> f64 {
    (range_spacing * 1e-3).min(0.1)
}

/// Sensor position at `time` (MJD) and its distance to the ground point
pub fn slant_range(interpolator: &OrbitInterpolator, time: f64, ground: &Vector3) -> (Vector3, f64) {
    let sensor = interpolator.position(time);
    let range = sensor.distance(ground);
    (sensor, range)
}

/// Evaluate c0 + c1*x + c2*x^2 + ...
pub fn polynomial_value(x: f64, coefficients: &[f64]) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Slant range for a ground range using an SRGR polynomial
pub fn ground_range_to_slant_range(ground_range: f64, coefficients: &[f64]) -> f64 {
    polynomial_value(ground_range, coefficients)
}

/// Invert an SRGR polynomial by bisection over `[origin, origin + swath_extent]`.
///
/// Returns `None` when the slant range lies outside the swath.
pub fn slant_range_to_ground_range(
    slant_range: f64,
    coefficients: &[f64],
    ground_range_origin: f64,
    swath_extent: f64,
    tolerance: f64,
) -> Option<f64> {
    let mut lower = ground_range_origin;
    let mut upper = ground_range_origin + swath_extent;
    if slant_range < polynomial_value(lower, coefficients)
        || slant_range > polynomial_value(upper, coefficients)
    {
        return None;
    }

    for _ in 0..MAX_BISECTION_ITERATIONS {
        let mid = 0.5 * (lower + upper);
        let diff = polynomial_value(mid, coefficients) - slant_range;
        if diff.abs() < tolerance || upper - lower <= f64::EPSILON * upper.abs() {
            return Some(mid);
        }
        if diff > 0.0 {
            upper = mid;
        } else {
            lower = mid;
        }
    }
    Some(0.5 * (lower + upper))
}

/// Range sampling geometry of the source product
#[derive(Debug, Clone)]
pub enum RangeGeometry {
    /// Slant-range product with the slant range of the first sample (m)
    SlantRange { near_edge_slant_range: f64 },
    /// Ground-range product described by time-ordered SRGR polynomials
    GroundRange {
        coefficients: Vec<SrgrCoefficients>,
        tolerance: f64,
    },
}

/// Maps (zero-Doppler time, slant range) to a fractional range sample and back
#[derive(Debug, Clone)]
pub struct RangeIndexMapper {
    geometry: RangeGeometry,
    range_spacing: f64,
    width: usize,
    first_line_time: f64,
    last_line_time: f64,
    near_range_on_left: bool,
}

impl RangeIndexMapper {
    pub fn new(
        geometry: RangeGeometry,
        range_spacing: f64,
        width: usize,
        first_line_time: f64,
        last_line_time: f64,
        near_range_on_left: bool,
    ) -> SarResult<Self> {
        if !(range_spacing > 0.0) {
            return Err(SarError::Configuration(format!(
                "Range spacing must be positive, got {}",
                range_spacing
            )));
        }
        if width == 0 {
            return Err(SarError::Configuration("Source image width is zero".to_string()));
        }
        if let RangeGeometry::GroundRange { coefficients, .. } = &geometry {
            if coefficients.is_empty() {
                return Err(SarError::Configuration(
                    "Ground range product without SRGR coefficients".to_string(),
                ));
            }
            if coefficients.windows(2).any(|w| w[1].time_mjd < w[0].time_mjd) {
                return Err(SarError::Configuration(
                    "SRGR coefficients must be ordered by time".to_string(),
                ));
            }
        }

        Ok(Self {
            geometry,
            range_spacing,
            width,
            first_line_time,
            last_line_time,
            near_range_on_left,
        })
    }

    pub fn near_range_on_left(&self) -> bool {
        self.near_range_on_left
    }

    /// Fractional range index, `None` when the point is not inside the image
    pub fn range_index(&self, zero_doppler_time: f64, slant_range: f64) -> Option<f64> {
        let start = self.first_line_time.min(self.last_line_time);
        let stop = self.first_line_time.max(self.last_line_time);
        if zero_doppler_time < start || zero_doppler_time > stop {
            return None;
        }

        let index = match &self.geometry {
            RangeGeometry::SlantRange {
                near_edge_slant_range,
            } => (slant_range - near_edge_slant_range) / self.range_spacing,
            RangeGeometry::GroundRange {
                coefficients,
                tolerance,
            } => {
                let (poly, origin) = srgr_polynomial_at(coefficients, zero_doppler_time);
                let ground_range = slant_range_to_ground_range(
                    slant_range,
                    &poly,
                    origin,
                    self.width as f64 * self.range_spacing,
                    *tolerance,
                )?;
                (ground_range - origin) / self.range_spacing
            }
        };

        if self.near_range_on_left {
            Some(index)
        } else {
            Some(self.width as f64 - 1.0 - index)
        }
    }

    /// Slant range of a fractional range index at `time` (MJD)
    pub fn slant_range_at(&self, time: f64, range_index: f64) -> f64 {
        let index = if self.near_range_on_left {
            range_index
        } else {
            self.width as f64 - 1.0 - range_index
        };

        match &self.geometry {
            RangeGeometry::SlantRange {
                near_edge_slant_range,
            } => near_edge_slant_range + index * self.range_spacing,
            RangeGeometry::GroundRange { coefficients, .. } => {
                let (poly, origin) = srgr_polynomial_at(coefficients, time);
                ground_range_to_slant_range(origin + index * self.range_spacing, &poly)
            }
        }
    }
}

/// SRGR polynomial valid at `time`, linearly blended between neighbouring entries
fn srgr_polynomial_at(list: &[SrgrCoefficients], time: f64) -> (Vec<f64>, f64) {
    if list.len() == 1 {
        return (list[0].coefficients.clone(), list[0].ground_range_origin);
    }

    let mut idx = list
        .iter()
        .rposition(|c| c.time_mjd <= time)
        .unwrap_or(0);
    if idx == list.len() - 1 {
        idx -= 1;
    }

    let first = &list[idx];
    let second = &list[idx + 1];
    let span = second.time_mjd - first.time_mjd;
    let mu = if span > 0.0 {
        ((time - first.time_mjd) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let len = first.coefficients.len().max(second.coefficients.len());
    let blended = (0..len)
        .map(|i| {
            let a = first.coefficients.get(i).copied().unwrap_or(0.0);
            let b = second.coefficients.get(i).copied().unwrap_or(0.0);
            (1.0 - mu) * a + mu * b
        })
        .collect();

    (blended, first.ground_range_origin)
}
