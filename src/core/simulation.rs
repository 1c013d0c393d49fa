//! SAR image simulation from a DEM.
//!
//! Source-grid cells are georeferenced through the tie points, lifted onto the DEM and
//! forward-mapped into radar geometry, where a simple backscatter model of the local
//! incidence angle is splatted. Optionally flags layover and shadow along each line.

use crate::core::doppler::ZeroDopplerSolver;
use crate::core::geodesy::geodetic_to_cartesian;
use crate::core::incidence::{elevation_angle, incidence_angles, LocalGeometry};
use crate::core::orbit::{EphemerisTable, OrbitInterpolator};
use crate::core::range::{slant_range, RangeIndexMapper};
use crate::core::terrain_correction::NON_VALID_INCIDENCE_ANGLE;
use crate::io::dem::ElevationModel;
use crate::io::metadata::SarMetadata;
use crate::io::tie_point::TiePointGeometry;
use crate::types::{
    SarError, SarRealImage, SarResult, Vector3, DTOR, LIGHT_SPEED_IN_METERS_PER_DAY,
    SECONDS_IN_DAY,
};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Layover flag of the layover/shadow mask
pub const LAYOVER: u8 = 1;
/// Shadow flag of the layover/shadow mask
pub const SHADOW: u8 = 2;

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub tile_size: usize,
    pub save_layover_shadow_mask: bool,
    pub save_local_incidence_angle: bool,
    pub save_dem: bool,
    /// Stride of the source grid sample used to estimate the tile margins
    pub margin_sample_stride: usize,
    /// Lines added to the estimated margins
    pub margin_padding_lines: usize,
    /// Half width (lines) of the zero-Doppler bracket around a cached line
    pub zero_doppler_search_half_width: usize,
    pub srgr_tolerance: Option<f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            save_layover_shadow_mask: false,
            save_local_incidence_angle: false,
            save_dem: false,
            margin_sample_stride: 20,
            margin_padding_lines: 2,
            zero_doppler_search_half_width: 64,
            srgr_tolerance: None,
        }
    }
}

/// Extra source lines and samples read around every tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileMargin {
    pub azimuth: usize,
    pub range: usize,
}

/// Simulated image in source geometry
#[derive(Debug, Clone)]
pub struct SimulatedImage {
    pub simulated: SarRealImage,
    /// Bit 1 layover, bit 2 shadow
    pub layover_shadow_mask: Option<Array2<u8>>,
    /// Projected local incidence angle of the cell landing in each pixel (degrees)
    pub local_incidence_angle: Option<SarRealImage>,
    pub elevation: Option<SarRealImage>,
    pub margin: TileMargin,
    pub completed_tiles: usize,
    pub total_tiles: usize,
    pub cancelled: bool,
}

/// Backscattered power for a local incidence angle (degrees)
pub fn backscattered_power(local_incidence_angle: f64) -> f64 {
    let alpha = local_incidence_angle * DTOR;
    let cos = alpha.cos();
    0.0118 * cos / (alpha.sin() + 0.111 * cos).powi(3)
}

/// Radar position of a ground point
#[derive(Debug, Clone, Copy, PartialEq)]
struct RadarPosition {
    range_index: f64,
    azimuth_index: f64,
    slant_range: f64,
    sensor: Vector3,
}

#[derive(Debug, Clone, Copy)]
struct TileRect {
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
}

impl TileRect {
    fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x0 as i64
            && x < (self.x0 + self.width) as i64
            && y >= self.y0 as i64
            && y < (self.y0 + self.height) as i64
    }
}

/// Forward-mapped cell kept for the layover/shadow traversals of one line
#[derive(Debug, Clone, Copy)]
struct RowSample {
    range_index: f64,
    azimuth_index: f64,
    slant_range: f64,
    elevation_angle: f64,
}

struct TileOutput {
    rect: TileRect,
    simulated: Array2<f64>,
    mask: Option<Array2<u8>>,
    local_incidence_angle: Option<Array2<f32>>,
    elevation: Option<Array2<f32>>,
}

/// Bilinear splat of `value` into the four pixels around `(range_index, azimuth_index)`
fn splat(buffer: &mut Array2<f64>, rect: &TileRect, range_index: f64, azimuth_index: f64, value: f64) {
    let ir0 = range_index.floor() as i64;
    let ia0 = azimuth_index.floor() as i64;
    let wr = range_index - ir0 as f64;
    let wa = azimuth_index - ia0 as f64;

    for (ir, w_r) in [(ir0, 1.0 - wr), (ir0 + 1, wr)] {
        for (ia, w_a) in [(ia0, 1.0 - wa), (ia0 + 1, wa)] {
            if rect.contains(ir, ia) {
                let r = ia as usize - rect.y0;
                let c = ir as usize - rect.x0;
                buffer[[r, c]] += w_r * w_a * value;
            }
        }
    }
}

/// Flag the 2x2 pixels at a sample; layover then shadow combine to 3
fn mark(mask: &mut Array2<u8>, rect: &TileRect, sample: &RowSample, value: u8) {
    let x_min = sample.range_index.floor() as usize;
    let y_min = sample.azimuth_index.floor() as usize;
    let x_max = (x_min + 1).min(rect.x0 + rect.width - 1);
    let y_max = (y_min + 1).min(rect.y0 + rect.height - 1);
    for y in y_min..=y_max {
        for x in x_min..=x_max {
            let v0 = &mut mask[[y - rect.y0, x - rect.x0]];
            if *v0 == 0 {
                *v0 = value;
            } else if *v0 == LAYOVER && value == SHADOW {
                *v0 = LAYOVER + SHADOW;
            }
        }
    }
}

/// Layover and shadow of one source line, `samples` indexed by range sample
fn layover_shadow_row(
    samples: &[Option<RowSample>],
    near_range_on_left: bool,
    mask: &mut Array2<u8>,
    rect: &TileRect,
) {
    let near_to_far: Vec<usize> = if near_range_on_left {
        (0..samples.len()).collect()
    } else {
        (0..samples.len()).rev().collect()
    };

    // Slant range must grow from near to far range
    let mut max_slant_range = 0.0;
    for sample in near_to_far.iter().filter_map(|&i| samples[i].as_ref()) {
        if sample.slant_range > max_slant_range {
            max_slant_range = sample.slant_range;
        } else {
            mark(mask, rect, sample, LAYOVER);
        }
    }

    let mut min_slant_range = max_slant_range;
    for sample in near_to_far.iter().rev().filter_map(|&i| samples[i].as_ref()) {
        if sample.slant_range <= min_slant_range {
            min_slant_range = sample.slant_range;
        } else {
            mark(mask, rect, sample, LAYOVER);
        }
    }

    // Elevation angle must grow from near to far range
    let mut max_elevation_angle = 0.0;
    for sample in near_to_far.iter().filter_map(|&i| samples[i].as_ref()) {
        if sample.elevation_angle > max_elevation_angle {
            max_elevation_angle = sample.elevation_angle;
        } else {
            mark(mask, rect, sample, SHADOW);
        }
    }
}

/// DEM based SAR image simulator for one source product
pub struct SarSimulator {
    metadata: SarMetadata,
    tie_points: TiePointGeometry,
    config: SimulationConfig,
    interpolator: OrbitInterpolator,
    ephemeris: EphemerisTable,
    mapper: RangeIndexMapper,
    wavelength: f64,
    line_time_interval: f64, // days
    skip_bistatic_correction: bool,
}

impl SarSimulator {
    pub fn new(
        metadata: SarMetadata,
        tie_points: TiePointGeometry,
        config: SimulationConfig,
    ) -> SarResult<Self> {
        metadata.validate()?;
        if config.tile_size == 0 {
            return Err(SarError::Configuration(
                "Tile size must be positive".to_string(),
            ));
        }

        let interpolator =
            OrbitInterpolator::new(&metadata.orbit_state_vectors, metadata.first_line_time)?;
        let ephemeris = EphemerisTable::build(
            &interpolator,
            metadata.first_line_time,
            metadata.line_time_interval,
            metadata.source_height,
        )?;
        let mapper = metadata.range_index_mapper(config.srgr_tolerance)?;

        Ok(Self {
            wavelength: metadata.wavelength(),
            line_time_interval: metadata.line_time_interval / SECONDS_IN_DAY,
            skip_bistatic_correction: metadata.skip_bistatic_correction(),
            metadata,
            tie_points,
            config,
            interpolator,
            ephemeris,
            mapper,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn forward_map(
        &self,
        ground: &Vector3,
        solver: &ZeroDopplerSolver,
        hint_line: Option<usize>,
    ) -> Option<RadarPosition> {
        let mut time = match hint_line {
            Some(line) => {
                solver.solve_near(ground, line, self.config.zero_doppler_search_half_width)
            }
            None => solver.solve(ground),
        }?;
        let (mut sensor, mut range) = slant_range(&self.interpolator, time, ground);
        if !self.skip_bistatic_correction {
            time += range / LIGHT_SPEED_IN_METERS_PER_DAY;
            let corrected = slant_range(&self.interpolator, time, ground);
            sensor = corrected.0;
            range = corrected.1;
        }

        let range_index = self.mapper.range_index(time, range)?;
        Some(RadarPosition {
            range_index,
            azimuth_index: (time - self.ephemeris.first_line_time()) / self.line_time_interval,
            slant_range: range,
            sensor,
        })
    }

    /// Largest displacement between a source cell and its simulated position, over a
    /// sample of the whole image
    pub fn compute_margin(&self, dem: &dyn ElevationModel) -> TileMargin {
        let solver = ZeroDopplerSolver::new(&self.ephemeris, self.wavelength);
        let stride = self.config.margin_sample_stride.max(1);
        let no_data = dem.no_data_value();

        let mut max_azimuth_shift: f64 = 0.0;
        let mut max_range_shift: f64 = 0.0;
        for y in (0..self.metadata.source_height).step_by(stride) {
            for x in (0..self.metadata.source_width).step_by(stride) {
                let pos = self.tie_points.geo_pos(x as f64, y as f64);
                if !pos.is_valid() {
                    continue;
                }
                let alt = dem.elevation(pos.lat, pos.lon);
                if alt == no_data || alt.is_nan() {
                    continue;
                }
                let ground = geodetic_to_cartesian(pos.lat, pos.lon, alt);
                if let Some(p) = self.forward_map(&ground, &solver, Some(y)) {
                    max_azimuth_shift = max_azimuth_shift.max((p.azimuth_index - y as f64).abs());
                    max_range_shift = max_range_shift.max((p.range_index - x as f64).abs());
                }
            }
        }

        let padding = self.config.margin_padding_lines;
        let margin = TileMargin {
            azimuth: max_azimuth_shift.ceil() as usize + padding,
            range: max_range_shift.ceil() as usize + padding,
        };
        log::debug!(
            "Maximum shift {:.2} lines, {:.2} samples; tile margin {:?}",
            max_azimuth_shift,
            max_range_shift,
            margin
        );
        margin
    }

    /// Simulate the whole source image tile by tile; `cancel` stops before the next tile
    pub fn simulate(
        &self,
        dem: &dyn ElevationModel,
        cancel: &AtomicBool,
    ) -> SarResult<SimulatedImage> {
        let width = self.metadata.source_width;
        let height = self.metadata.source_height;
        let margin = self.compute_margin(dem);

        let mut tiles = Vec::new();
        for y0 in (0..height).step_by(self.config.tile_size) {
            for x0 in (0..width).step_by(self.config.tile_size) {
                tiles.push(TileRect {
                    x0,
                    y0,
                    width: self.config.tile_size.min(width - x0),
                    height: self.config.tile_size.min(height - y0),
                });
            }
        }
        log::info!(
            "Simulating {}x{} image in {} tiles, margin {} lines / {} samples",
            width,
            height,
            tiles.len(),
            margin.azimuth,
            margin.range
        );

        let run = |rect: &TileRect| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            Some(self.process_tile(rect, &margin, dem))
        };

        #[cfg(feature = "parallel")]
        let results: Vec<Option<TileOutput>> = {
            use rayon::prelude::*;
            tiles.par_iter().map(run).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Option<TileOutput>> = tiles.iter().map(run).collect();

        let dem_no_data = dem.no_data_value() as f32;
        let mut image = SimulatedImage {
            simulated: Array2::zeros((height, width)),
            layover_shadow_mask: self
                .config
                .save_layover_shadow_mask
                .then(|| Array2::zeros((height, width))),
            local_incidence_angle: self
                .config
                .save_local_incidence_angle
                .then(|| Array2::from_elem((height, width), NON_VALID_INCIDENCE_ANGLE as f32)),
            elevation: self
                .config
                .save_dem
                .then(|| Array2::from_elem((height, width), dem_no_data)),
            margin,
            completed_tiles: 0,
            total_tiles: tiles.len(),
            cancelled: false,
        };

        for tile in results.into_iter().flatten() {
            let rect = tile.rect;
            let rows = rect.y0..rect.y0 + rect.height;
            let cols = rect.x0..rect.x0 + rect.width;
            image
                .simulated
                .slice_mut(s![rows.clone(), cols.clone()])
                .assign(&tile.simulated.mapv(|v| v as f32));
            if let (Some(out), Some(data)) = (image.layover_shadow_mask.as_mut(), tile.mask) {
                out.slice_mut(s![rows.clone(), cols.clone()]).assign(&data);
            }
            if let (Some(out), Some(data)) =
                (image.local_incidence_angle.as_mut(), tile.local_incidence_angle)
            {
                out.slice_mut(s![rows.clone(), cols.clone()]).assign(&data);
            }
            if let (Some(out), Some(data)) = (image.elevation.as_mut(), tile.elevation) {
                out.slice_mut(s![rows, cols]).assign(&data);
            }
            image.completed_tiles += 1;
        }

        image.cancelled = image.completed_tiles < image.total_tiles;
        if image.cancelled {
            log::warn!(
                "Simulation cancelled after {}/{} tiles",
                image.completed_tiles,
                image.total_tiles
            );
        } else {
            log::info!("Simulation completed");
        }
        Ok(image)
    }

    fn process_tile(
        &self,
        rect: &TileRect,
        margin: &TileMargin,
        dem: &dyn ElevationModel,
    ) -> TileOutput {
        let width = self.metadata.source_width;
        let height = self.metadata.source_height;
        let y_min = rect.y0.saturating_sub(margin.azimuth);
        let y_max = (rect.y0 + rect.height + margin.azimuth).min(height);
        let x_min = rect.x0.saturating_sub(margin.range);
        let x_max = (rect.x0 + rect.width + margin.range).min(width);
        let width_ext = x_max - x_min;

        let dem_no_data = dem.no_data_value();
        let geo = |x: f64, y: f64| self.tie_points.geo_pos(x, y);

        // Heights of the extended tile plus a one cell border
        let local_dem = Array2::from_shape_fn((y_max - y_min + 2, width_ext + 2), |(r, c)| {
            let pos = geo(
                x_min as f64 + c as f64 - 1.0,
                y_min as f64 + r as f64 - 1.0,
            );
            dem.elevation(pos.lat, pos.lon)
        });

        let mut simulated = Array2::zeros((rect.height, rect.width));
        let mut mask = self
            .config
            .save_layover_shadow_mask
            .then(|| Array2::zeros((rect.height, rect.width)));
        let mut local_incidence_angle = self.config.save_local_incidence_angle.then(|| {
            Array2::from_elem((rect.height, rect.width), NON_VALID_INCIDENCE_ANGLE as f32)
        });
        let mut elevation = self
            .config
            .save_dem
            .then(|| Array2::from_elem((rect.height, rect.width), dem_no_data as f32));

        let solver = ZeroDopplerSolver::new(&self.ephemeris, self.wavelength);
        // Source line -> zero-Doppler line of the last cell mapped on it
        let mut zero_doppler_lines: HashMap<usize, usize> = HashMap::new();
        let mut row: Vec<Option<RowSample>> = vec![None; width_ext];

        for y in y_min..y_max {
            let yy = y - y_min;
            row.iter_mut().for_each(|s| *s = None);

            for x in x_min..x_max {
                let xx = x - x_min;
                let alt = local_dem[[yy + 1, xx + 1]];
                if alt == dem_no_data || alt.is_nan() {
                    continue;
                }
                let (xf, yf) = (x as f64, y as f64);
                let centre = geo(xf, yf);
                if !centre.is_valid() {
                    continue;
                }

                let ground = geodetic_to_cartesian(centre.lat, centre.lon, alt);
                let hint = zero_doppler_lines.get(&y).copied().unwrap_or(y);
                let position = match self.forward_map(&ground, &solver, Some(hint)) {
                    Some(p) => p,
                    None => continue,
                };
                if position.azimuth_index >= 0.0 {
                    zero_doppler_lines.insert(y, position.azimuth_index.round() as usize);
                }

                let geometry = LocalGeometry {
                    left_point: geo(xf - 1.0, yf),
                    right_point: geo(xf + 1.0, yf),
                    up_point: geo(xf, yf - 1.0),
                    down_point: geo(xf, yf + 1.0),
                    centre_point: ground,
                    sensor_position: position.sensor,
                };
                let mut heights = [[0.0; 3]; 3];
                for (dr, h_row) in heights.iter_mut().enumerate() {
                    for (dc, h) in h_row.iter_mut().enumerate() {
                        *h = local_dem[[yy + dr, xx + dc]];
                    }
                }
                let angles = match incidence_angles(&geometry, &heights, dem_no_data) {
                    Some(a) => a,
                    None => continue,
                };

                splat(
                    &mut simulated,
                    rect,
                    position.range_index,
                    position.azimuth_index,
                    backscattered_power(angles.projected),
                );

                let ir = position.range_index.floor() as i64;
                let ia = position.azimuth_index.floor() as i64;
                if !rect.contains(ir, ia) {
                    continue;
                }
                let (r, c) = (ia as usize - rect.y0, ir as usize - rect.x0);
                if let Some(out) = elevation.as_mut() {
                    out[[r, c]] = alt as f32;
                }
                if let Some(out) = local_incidence_angle.as_mut() {
                    out[[r, c]] = angles.projected as f32;
                }
                if mask.is_some() {
                    row[xx] = Some(RowSample {
                        range_index: position.range_index,
                        azimuth_index: position.azimuth_index,
                        slant_range: position.slant_range,
                        elevation_angle: elevation_angle(
                            position.slant_range,
                            &ground,
                            &position.sensor,
                        ),
                    });
                }
            }

            if let Some(mask) = mask.as_mut() {
                layover_shadow_row(&row, self.metadata.near_range_on_left, mask, rect);
            }
        }

        log::debug!(
            "Simulated tile at ({}, {}) {}x{}",
            rect.x0,
            rect.y0,
            rect.width,
            rect.height
        );
        TileOutput {
            rect: *rect,
            simulated,
            mask,
            local_incidence_angle,
            elevation,
        }
    }
}
