//! Doppler frequency and zero-Doppler time search over the ephemeris table

use crate::core::orbit::EphemerisTable;
use crate::types::Vector3;

/// Doppler frequency (Hz) of a ground point seen from a sensor state
pub fn doppler_frequency(
    ground: &Vector3,
    sensor_position: &Vector3,
    sensor_velocity: &Vector3,
    wavelength: f64,
) -> f64 {
    let look = *ground - *sensor_position;
    let distance = look.norm();
    if distance == 0.0 {
        return 0.0;
    }
    2.0 * sensor_velocity.dot(&look) / (distance * wavelength)
}

/// Finds the time at which a ground point crosses the zero-Doppler plane
pub struct ZeroDopplerSolver<'a> {
    ephemeris: &'a EphemerisTable,
    wavelength: f64,
}

impl<'a> ZeroDopplerSolver<'a> {
    pub fn new(ephemeris: &'a EphemerisTable, wavelength: f64) -> Self {
        Self {
            ephemeris,
            wavelength,
        }
    }

    fn frequency_at_line(&self, ground: &Vector3, line: usize) -> f64 {
        doppler_frequency(
            ground,
            self.ephemeris.position(line),
            self.ephemeris.velocity(line),
            self.wavelength,
        )
    }

    /// Zero-Doppler time (MJD) over the whole image, `None` if the point is not imaged
    pub fn solve(&self, ground: &Vector3) -> Option<f64> {
        self.solve_in_bracket(ground, 0, self.ephemeris.num_lines() - 1)
    }

    /// Search a bracket of `half_width` lines around `hint_line` first and fall back to
    /// the full image when the bracket holds no sign change.
    pub fn solve_near(&self, ground: &Vector3, hint_line: usize, half_width: usize) -> Option<f64> {
        let last = self.ephemeris.num_lines() - 1;
        let hint = hint_line.min(last);
        let lower = hint.saturating_sub(half_width);
        let upper = hint.saturating_add(half_width).min(last);
        if lower < upper {
            if let Some(time) = self.solve_in_bracket(ground, lower, upper) {
                return Some(time);
            }
        }
        self.solve(ground)
    }

    fn solve_in_bracket(&self, ground: &Vector3, lower: usize, upper: usize) -> Option<f64> {
        let mut lower = lower;
        let mut upper = upper;
        let mut lower_freq = self.frequency_at_line(ground, lower);
        if lower_freq == 0.0 {
            return Some(self.ephemeris.line_time(lower));
        }
        let mut upper_freq = self.frequency_at_line(ground, upper);
        if upper_freq == 0.0 {
            return Some(self.ephemeris.line_time(upper));
        }
        if lower_freq * upper_freq > 0.0 || !(lower_freq * upper_freq).is_finite() {
            return None;
        }

        while upper - lower > 1 {
            let mid = (lower + upper) / 2;
            let mid_freq = self.frequency_at_line(ground, mid);
            if mid_freq == 0.0 {
                return Some(self.ephemeris.line_time(mid));
            }
            if mid_freq * lower_freq > 0.0 {
                lower = mid;
                lower_freq = mid_freq;
            } else {
                upper = mid;
                upper_freq = mid_freq;
            }
        }

        let y0 = lower as f64
            - lower_freq * (upper - lower) as f64 / (upper_freq - lower_freq);
        Some(self.ephemeris.first_line_time() + y0 * self.ephemeris.line_time_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::orbit::OrbitInterpolator;
    use crate::types::{OrbitStateVector, SECONDS_IN_DAY};
    use approx::assert_abs_diff_eq;

    const T0: f64 = 0.25;
    const WAVELENGTH: f64 = 0.0555;

    /// Five vectors 10 s apart, sensor moving along x at 7 km/s
    fn create_test_ephemeris(num_lines: usize, line_interval: f64) -> EphemerisTable {
        let svs: Vec<_> = (0..5)
            .map(|k| {
                let dt = k as f64 * 10.0;
                OrbitStateVector::new(
                    T0 + dt / SECONDS_IN_DAY,
                    [-140_000.0 + 7000.0 * dt, 0.0, 7.0e6],
                    [7000.0, 0.0, 0.0],
                )
            })
            .collect();
        let interp = OrbitInterpolator::new(&svs, T0).unwrap();
        EphemerisTable::build(&interp, T0, line_interval, num_lines).unwrap()
    }

    #[test]
    fn test_doppler_sign() {
        let ground = Vector3::new(0.0, 0.0, 6.4e6);
        let velocity = Vector3::new(7000.0, 0.0, 0.0);
        let approaching = doppler_frequency(&ground, &Vector3::new(-1000.0, 0.0, 7.0e6), &velocity, WAVELENGTH);
        let receding = doppler_frequency(&ground, &Vector3::new(1000.0, 0.0, 7.0e6), &velocity, WAVELENGTH);
        assert!(approaching > 0.0);
        assert!(receding < 0.0);
        assert_eq!(doppler_frequency(&ground, &ground, &velocity, WAVELENGTH), 0.0);
    }

    #[test]
    fn test_broadside_point() {
        // Sensor passes x = 0 at 20 s, i.e. line 20 with a 1 s line interval
        let table = create_test_ephemeris(41, 1.0);
        let solver = ZeroDopplerSolver::new(&table, WAVELENGTH);
        let ground = Vector3::new(0.0, 300_000.0, 6.3e6);

        let time = solver.solve(&ground).unwrap();
        let line = (time - T0) * SECONDS_IN_DAY;
        assert_abs_diff_eq!(line, 20.0, epsilon = 1.0);

        let residual = doppler_frequency(&ground, &Vector3::new(-140_000.0 + 7000.0 * line, 0.0, 7.0e6),
            &Vector3::new(7000.0, 0.0, 0.0), WAVELENGTH);
        assert!(residual.abs() < 1e-6);
    }

    #[test]
    fn test_sub_line_interpolation() {
        let table = create_test_ephemeris(41, 1.0);
        let solver = ZeroDopplerSolver::new(&table, WAVELENGTH);
        let ground = Vector3::new(-140_000.0 + 7000.0 * 12.25, 250_000.0, 6.3e6);

        let time = solver.solve(&ground).unwrap();
        assert_abs_diff_eq!((time - T0) * SECONDS_IN_DAY, 12.25, epsilon = 1e-3);
    }

    #[test]
    fn test_point_outside_swath() {
        let table = create_test_ephemeris(41, 1.0);
        let solver = ZeroDopplerSolver::new(&table, WAVELENGTH);
        let ground = Vector3::new(500_000.0, 300_000.0, 6.3e6);
        assert!(solver.solve(&ground).is_none());
    }

    #[test]
    fn test_exact_zero_at_first_line() {
        let table = create_test_ephemeris(41, 1.0);
        let solver = ZeroDopplerSolver::new(&table, WAVELENGTH);
        let ground = Vector3::new(-140_000.0, 300_000.0, 6.3e6);
        assert_eq!(solver.solve(&ground), Some(T0));
    }

    #[test]
    fn test_solve_near_matches_full_search() {
        let table = create_test_ephemeris(41, 1.0);
        let solver = ZeroDopplerSolver::new(&table, WAVELENGTH);
        let ground = Vector3::new(-140_000.0 + 7000.0 * 30.6, 250_000.0, 6.3e6);

        let full = solver.solve(&ground).unwrap();
        let near = solver.solve_near(&ground, 31, 4).unwrap();
        assert_abs_diff_eq!(full, near, epsilon = 1e-12);

        // A wrong hint falls back to the full search
        let fallback = solver.solve_near(&ground, 2, 3).unwrap();
        assert_abs_diff_eq!(full, fallback, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_near_with_unbounded_bracket() {
        let table = create_test_ephemeris(41, 1.0);
        let solver = ZeroDopplerSolver::new(&table, WAVELENGTH);
        let ground = Vector3::new(-140_000.0 + 7000.0 * 30.6, 250_000.0, 6.3e6);

        let full = solver.solve(&ground).unwrap();
        let wide = solver.solve_near(&ground, 40, usize::MAX).unwrap();
        assert_abs_diff_eq!(full, wide, epsilon = 1e-12);
        let past_end = solver.solve_near(&ground, usize::MAX, 4).unwrap();
        assert_abs_diff_eq!(full, past_end, epsilon = 1e-12);
    }
}
