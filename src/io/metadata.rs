//! Product metadata needed for geocoding

use crate::core::range::{default_srgr_tolerance, RangeGeometry, RangeIndexMapper};
use crate::types::{
    GeoPos, OrbitStateVector, Polarization, SarError, SarResult, SrgrCoefficients, LIGHT_SPEED,
    SECONDS_IN_DAY,
};
use serde::{Deserialize, Serialize};

/// Mission name fragments of products delivered with the bistatic delay already removed
const BISTATIC_CORRECTED_MISSIONS: [&str; 3] = ["CSKS", "TSX", "SENTINEL"];

/// Whether the zero-Doppler time of this mission needs no bistatic correction
pub fn mission_skips_bistatic_correction(mission: &str) -> bool {
    let mission = mission.to_uppercase();
    mission == "RS2"
        || BISTATIC_CORRECTED_MISSIONS
            .iter()
            .any(|m| mission.contains(m))
}

/// Geometry metadata of a source product in radar coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SarMetadata {
    pub mission: String,
    pub polarizations: Vec<Polarization>,

    /// Precise or annotated orbit, ordered by time
    pub orbit_state_vectors: Vec<OrbitStateVector>,
    /// Radar carrier frequency (MHz)
    pub radar_frequency: f64,

    /// Range pixel spacing (m), slant or ground depending on `srgr_flag`
    pub range_spacing: f64,
    /// Azimuth pixel spacing (m)
    pub azimuth_spacing: f64,

    /// Zero-Doppler time of the first line (MJD)
    pub first_line_time: f64,
    /// Zero-Doppler time of the last line (MJD)
    pub last_line_time: f64,
    /// Azimuth line time interval (s)
    pub line_time_interval: f64,

    /// Slant range to the first range sample (m)
    pub near_edge_slant_range: f64,
    /// Ground range detected product
    pub srgr_flag: bool,
    pub srgr_coefficients: Vec<SrgrCoefficients>,

    pub near_range_on_left: bool,
    pub bistatic_correction_applied: bool,
    /// Average terrain height of the scene (m)
    pub avg_scene_height: f64,
    /// Approximate scene centre, seed for forward geolocation
    pub scene_centre: GeoPos,

    pub source_width: usize,
    pub source_height: usize,
}

impl SarMetadata {
    /// Check everything the geocoding setup relies on
    pub fn validate(&self) -> SarResult<()> {
        if self.orbit_state_vectors.len() < 2 {
            return Err(SarError::Configuration(format!(
                "At least 2 orbit state vectors are required, got {}",
                self.orbit_state_vectors.len()
            )));
        }
        if self.source_width == 0 || self.source_height == 0 {
            return Err(SarError::Configuration(format!(
                "Invalid source image size {}x{}",
                self.source_width, self.source_height
            )));
        }
        for (name, value) in [
            ("radar frequency", self.radar_frequency),
            ("range spacing", self.range_spacing),
            ("azimuth spacing", self.azimuth_spacing),
            ("line time interval", self.line_time_interval),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SarError::Configuration(format!(
                    "Invalid {}: {}",
                    name, value
                )));
            }
        }
        if !self.srgr_flag && !(self.near_edge_slant_range > 0.0) {
            return Err(SarError::Configuration(format!(
                "Invalid near edge slant range: {}",
                self.near_edge_slant_range
            )));
        }
        if self.srgr_flag && self.srgr_coefficients.is_empty() {
            return Err(SarError::Configuration(
                "Ground range product without SRGR coefficients".to_string(),
            ));
        }
        if !self.scene_centre.is_valid() {
            return Err(SarError::Metadata(format!(
                "Invalid scene centre {:?}",
                self.scene_centre
            )));
        }

        let expected_last = self.first_line_time
            + (self.source_height - 1) as f64 * self.line_time_interval / SECONDS_IN_DAY;
        let mismatch = (expected_last - self.last_line_time).abs() * SECONDS_IN_DAY;
        if mismatch > self.line_time_interval {
            log::warn!(
                "Last line time differs from first line time + lines * interval by {:.6} s",
                mismatch
            );
        }

        Ok(())
    }

    /// Radar wavelength (m)
    pub fn wavelength(&self) -> f64 {
        LIGHT_SPEED / (self.radar_frequency * 1e6)
    }

    pub fn skip_bistatic_correction(&self) -> bool {
        self.bistatic_correction_applied || mission_skips_bistatic_correction(&self.mission)
    }

    /// Range sampling geometry; `srgr_tolerance` defaults to a fraction of the spacing
    pub fn range_geometry(&self, srgr_tolerance: Option<f64>) -> RangeGeometry {
        if self.srgr_flag {
            RangeGeometry::GroundRange {
                coefficients: self.srgr_coefficients.clone(),
                tolerance: srgr_tolerance
                    .unwrap_or_else(|| default_srgr_tolerance(self.range_spacing)),
            }
        } else {
            RangeGeometry::SlantRange {
                near_edge_slant_range: self.near_edge_slant_range,
            }
        }
    }

    pub fn range_index_mapper(&self, srgr_tolerance: Option<f64>) -> SarResult<RangeIndexMapper> {
        RangeIndexMapper::new(
            self.range_geometry(srgr_tolerance),
            self.range_spacing,
            self.source_width,
            self.first_line_time,
            self.last_line_time,
            self.near_range_on_left,
        )
    }
}
