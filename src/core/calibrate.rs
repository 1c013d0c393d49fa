//! Radiometric calibration hook

use crate::types::{BandUnit, Polarization};

/// Geometry of one resampled cell handed to a radiometric calibrator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationContext {
    pub range_index: f64,
    pub azimuth_index: f64,
    /// Slant range (m)
    pub slant_range: f64,
    /// Distance from the earth centre to the sensor (m)
    pub satellite_height: f64,
    /// Distance from the earth centre to the ground point (m)
    pub earth_centre_distance: f64,
    /// Projected local incidence angle (degrees)
    pub projected_local_incidence_angle: f64,
    pub polarization: Option<Polarization>,
    pub unit: BandUnit,
}

/// Radiometric calibration applied after resampling.
///
/// Implementations must be safe to call from several tiles at once.
pub trait Calibrator: Send + Sync {
    fn apply_calibration(&self, value: f64, context: &CalibrationContext) -> f64;
}

/// Pass-through calibrator
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCalibrator;

impl Calibrator for IdentityCalibrator {
    fn apply_calibration(&self, value: f64, _context: &CalibrationContext) -> f64 {
        value
    }
}

impl<F> Calibrator for F
where
    F: Fn(f64, &CalibrationContext) -> f64 + Send + Sync,
{
    fn apply_calibration(&self, value: f64, context: &CalibrationContext) -> f64 {
        self(value, context)
    }
}
