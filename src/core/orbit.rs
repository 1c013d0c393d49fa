//! Orbit state vector interpolation and the per-line ephemeris table

use crate::types::{OrbitStateVector, SarError, SarResult, Vector3, SECONDS_IN_DAY};

/// Maximum number of state vectors used by the Lagrange interpolator
pub const MAX_INTERPOLATION_VECTORS: usize = 5;

/// Sensor position and velocity at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorState {
    pub position: Vector3,
    pub velocity: Vector3,
}

/// Lagrange interpolator over the state vectors nearest the first image line
#[derive(Debug, Clone)]
pub struct OrbitInterpolator {
    vectors: Vec<OrbitStateVector>,
}

impl OrbitInterpolator {
    /// Select the interpolation window around `first_line_time` (MJD)
    pub fn new(state_vectors: &[OrbitStateVector], first_line_time: f64) -> SarResult<Self> {
        if state_vectors.len() < 2 {
            return Err(SarError::Configuration(format!(
                "At least 2 orbit state vectors are required, got {}",
                state_vectors.len()
            )));
        }
        if state_vectors
            .windows(2)
            .any(|w| w[1].time_mjd <= w[0].time_mjd)
        {
            return Err(SarError::Configuration(
                "Orbit state vector times must be strictly increasing".to_string(),
            ));
        }

        let num_vectors = state_vectors.len().min(MAX_INTERPOLATION_VECTORS);
        if num_vectors < MAX_INTERPOLATION_VECTORS {
            log::warn!(
                "Only {} orbit state vectors available for interpolation",
                num_vectors
            );
        }

        let closest = Self::closest_vector_index(state_vectors, first_line_time);
        let start = closest
            .saturating_sub(num_vectors / 2)
            .min(state_vectors.len() - num_vectors);
        let vectors = state_vectors[start..start + num_vectors].to_vec();

        log::debug!(
            "Orbit interpolation window: vectors {}..{} of {}",
            start,
            start + num_vectors,
            state_vectors.len()
        );

        Ok(Self { vectors })
    }

    /// Binary search for the state vector closest in time to the target
    fn closest_vector_index(state_vectors: &[OrbitStateVector], target_time: f64) -> usize {
        match state_vectors.binary_search_by(|sv| sv.time_mjd.total_cmp(&target_time)) {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) if idx >= state_vectors.len() => state_vectors.len() - 1,
            Err(idx) => {
                let before = target_time - state_vectors[idx - 1].time_mjd;
                let after = state_vectors[idx].time_mjd - target_time;
                if before <= after {
                    idx - 1
                } else {
                    idx
                }
            }
        }
    }

    pub fn vectors(&self) -> &[OrbitStateVector] {
        &self.vectors
    }

    /// Interpolate position and velocity at `time` (MJD)
    pub fn interpolate(&self, time: f64) -> SensorState {
        let mut position = Vector3::default();
        let mut velocity = Vector3::default();

        for (i, sv_i) in self.vectors.iter().enumerate() {
            let mut weight = 1.0;
            for (j, sv_j) in self.vectors.iter().enumerate() {
                if i != j {
                    weight *= (time - sv_j.time_mjd) / (sv_i.time_mjd - sv_j.time_mjd);
                }
            }
            position = position + sv_i.position * weight;
            velocity = velocity + sv_i.velocity * weight;
        }

        SensorState { position, velocity }
    }

    pub fn position(&self, time: f64) -> Vector3 {
        self.interpolate(time).position
    }
}

/// Per-line sensor positions and velocities for an image
#[derive(Debug, Clone)]
pub struct EphemerisTable {
    first_line_time: f64,
    line_time_interval: f64,
    positions: Vec<Vector3>,
    velocities: Vec<Vector3>,
}

impl EphemerisTable {
    /// Evaluate the interpolator once per azimuth line.
    ///
    /// `first_line_time` is in MJD, `line_time_interval` in seconds.
    pub fn build(
        interpolator: &OrbitInterpolator,
        first_line_time: f64,
        line_time_interval: f64,
        num_lines: usize,
    ) -> SarResult<Self> {
        if num_lines == 0 {
            return Err(SarError::Configuration(
                "Ephemeris table needs at least one line".to_string(),
            ));
        }
        if !(line_time_interval > 0.0) {
            return Err(SarError::Configuration(format!(
                "Line time interval must be positive, got {}",
                line_time_interval
            )));
        }

        let dt = line_time_interval / SECONDS_IN_DAY;
        let (positions, velocities): (Vec<_>, Vec<_>) = (0..num_lines)
            .map(|i| {
                let state = interpolator.interpolate(first_line_time + i as f64 * dt);
                (state.position, state.velocity)
            })
            .unzip();

        Ok(Self {
            first_line_time,
            line_time_interval: dt,
            positions,
            velocities,
        })
    }

    pub fn num_lines(&self) -> usize {
        self.positions.len()
    }

    pub fn first_line_time(&self) -> f64 {
        self.first_line_time
    }

    pub fn last_line_time(&self) -> f64 {
        self.line_time(self.num_lines() - 1)
    }

    /// Line time interval in days
    pub fn line_time_interval(&self) -> f64 {
        self.line_time_interval
    }

    pub fn line_time(&self, line: usize) -> f64 {
        self.first_line_time + line as f64 * self.line_time_interval
    }

    pub fn position(&self, line: usize) -> &Vector3 {
        &self.positions[line]
    }

    pub fn velocity(&self, line: usize) -> &Vector3 {
        &self.velocities[line]
    }
}
