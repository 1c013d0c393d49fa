//! Range-Doppler terrain correction.
//!
//! Every output cell of a regular lat/lon grid is traced back into the source
//! image: DEM height -> ground point -> zero-Doppler time -> slant range ->
//! source pixel index, where the source bands are resampled.

use crate::core::calibrate::{CalibrationContext, Calibrator};
use crate::core::doppler::ZeroDopplerSolver;
use crate::core::geodesy::{
    cartesian_to_geodetic, geodetic_to_cartesian, longitude_difference, pixel_spacing_in_degree,
};
use crate::core::incidence::{incidence_angles, IncidenceAngles, LocalGeometry};
use crate::core::orbit::{EphemerisTable, OrbitInterpolator};
use crate::core::range::{slant_range, RangeIndexMapper};
use crate::core::resampling::{ResamplingMethod, ResamplingWindow};
use crate::core::simulation::{SarSimulator, SimulationConfig};
use crate::io::dem::{ConstantGeoid, ElevationModel, GeoidModel, DEFAULT_DEM_NO_DATA};
use crate::io::metadata::SarMetadata;
use crate::io::raster::{BandInfo, SourceRaster};
use crate::io::tie_point::TiePointGeometry;
use crate::types::{
    BandUnit, BoundingBox, GeoPos, GeoTransform, Polarization, SarError, SarRealImage, SarResult,
    Vector3, DTOR, LIGHT_SPEED_IN_METERS_PER_DAY, SECONDS_IN_DAY,
};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fill value of the incidence angle diagnostics bands
pub const NON_VALID_INCIDENCE_ANGLE: f64 = -99999.0;

/// Terrain correction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainCorrectionConfig {
    pub resampling: ResamplingMethod,
    /// Output no-data where the DEM has no height; otherwise fall back to the geoid
    pub mask_no_elevation: bool,
    /// Replace the DEM by the average scene height of the product
    pub use_average_scene_height: bool,
    pub save_dem: bool,
    pub save_local_incidence_angle: bool,
    pub save_projected_local_incidence_angle: bool,
    pub save_incidence_angle_from_ellipsoid: bool,
    pub save_lat_lon: bool,
    /// Layover/shadow flags of the source pixel each cell maps to
    pub save_layover_shadow_mask: bool,
    /// Output pixel spacing (m); derived from the source spacings when unset
    pub pixel_spacing: Option<f64>,
    /// Side length of the square output tiles
    pub tile_size: usize,
    /// Ground range inversion tolerance (m)
    pub srgr_tolerance: Option<f64>,
}

impl Default for TerrainCorrectionConfig {
    fn default() -> Self {
        Self {
            resampling: ResamplingMethod::Bilinear,
            mask_no_elevation: true,
            use_average_scene_height: false,
            save_dem: false,
            save_local_incidence_angle: false,
            save_projected_local_incidence_angle: false,
            save_incidence_angle_from_ellipsoid: false,
            save_lat_lon: false,
            save_layover_shadow_mask: false,
            pixel_spacing: None,
            tile_size: 256,
            srgr_tolerance: None,
        }
    }
}

/// How an output band is read from the source raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandSource {
    Single(usize),
    /// In-phase and quadrature bands combined into intensity
    IqPair { i: usize, q: usize },
}

/// One geocoded output band and where it comes from
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBand {
    pub name: String,
    pub source: BandSource,
    pub unit: BandUnit,
    pub polarization: Option<Polarization>,
    pub no_data_value: f64,
}

impl TargetBand {
    /// Output bands for a set of source bands.
    ///
    /// A `Real` band directly followed by an `Imaginary` band becomes one intensity band;
    /// phase bands are not geocoded.
    pub fn from_source_bands(bands: &[BandInfo]) -> SarResult<Vec<TargetBand>> {
        let mut targets = Vec::new();
        let mut i = 0;
        while i < bands.len() {
            let band = &bands[i];
            match band.unit {
                BandUnit::Real => {
                    let q = bands
                        .get(i + 1)
                        .filter(|b| b.unit == BandUnit::Imaginary)
                        .ok_or_else(|| {
                            SarError::Configuration(format!(
                                "Band {} has no quadrature band",
                                band.name
                            ))
                        })?;
                    let suffix = band
                        .polarization
                        .or(q.polarization)
                        .map(|p| format!("_{}", p))
                        .unwrap_or_default();
                    targets.push(TargetBand {
                        name: format!("Intensity{}", suffix),
                        source: BandSource::IqPair { i, q: i + 1 },
                        unit: BandUnit::Intensity,
                        polarization: band.polarization,
                        no_data_value: band.no_data_value,
                    });
                    i += 2;
                    continue;
                }
                BandUnit::Imaginary => {
                    return Err(SarError::Configuration(format!(
                        "Band {} has no in-phase band",
                        band.name
                    )));
                }
                BandUnit::Phase => {
                    log::debug!("Skipping phase band {}", band.name);
                }
                unit => targets.push(TargetBand {
                    name: band.name.clone(),
                    source: BandSource::Single(i),
                    unit,
                    polarization: band.polarization,
                    no_data_value: band.no_data_value,
                }),
            }
            i += 1;
        }

        if targets.is_empty() {
            return Err(SarError::Configuration(
                "No source band can be terrain corrected".to_string(),
            ));
        }
        Ok(targets)
    }
}

/// Regular north-up lat/lon output grid, values at cell centres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub north_lat: f64,
    pub west_lon: f64,
    pub del_lat: f64,
    pub del_lon: f64,
    pub width: usize,
    pub height: usize,
}

impl TargetGrid {
    pub fn new(
        north_lat: f64,
        west_lon: f64,
        del_lat: f64,
        del_lon: f64,
        width: usize,
        height: usize,
    ) -> SarResult<Self> {
        if !(del_lat > 0.0 && del_lon > 0.0) || width == 0 || height == 0 {
            return Err(SarError::Configuration(format!(
                "Invalid target grid {}x{} with spacing {} x {} deg",
                width, height, del_lat, del_lon
            )));
        }
        Ok(Self {
            north_lat,
            west_lon,
            del_lat,
            del_lon,
            width,
            height,
        })
    }

    /// Grid covering the footprint of a source image at `pixel_spacing` meters
    pub fn covering(
        tie_points: &TiePointGeometry,
        source_width: usize,
        source_height: usize,
        pixel_spacing: f64,
    ) -> SarResult<Self> {
        if source_width == 0 || source_height == 0 {
            return Err(SarError::Configuration(
                "Empty source image has no footprint".to_string(),
            ));
        }
        if !(pixel_spacing > 0.0) {
            return Err(SarError::Configuration(format!(
                "Invalid pixel spacing: {}",
                pixel_spacing
            )));
        }

        let max_x = (source_width - 1) as f64;
        let max_y = (source_height - 1) as f64;
        let mut edge = Vec::new();
        let steps = 100usize;
        for k in 0..=steps {
            let fx = max_x * k as f64 / steps as f64;
            let fy = max_y * k as f64 / steps as f64;
            edge.push((fx, 0.0));
            edge.push((fx, max_y));
            edge.push((0.0, fy));
            edge.push((max_x, fy));
        }

        let reference_lon = tie_points.geo_pos(0.0, 0.0).lon;
        let mut bbox = BoundingBox {
            min_lon: f64::MAX,
            max_lon: f64::MIN,
            min_lat: f64::MAX,
            max_lat: f64::MIN,
        };
        for (x, y) in edge {
            let pos = tie_points.geo_pos(x, y);
            // Continuous longitudes across the date line
            let mut lon = pos.lon;
            if lon - reference_lon > 180.0 {
                lon -= 360.0;
            } else if reference_lon - lon > 180.0 {
                lon += 360.0;
            }
            bbox.min_lat = bbox.min_lat.min(pos.lat);
            bbox.max_lat = bbox.max_lat.max(pos.lat);
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
        }

        let del = pixel_spacing_in_degree(pixel_spacing);
        let width = ((bbox.max_lon - bbox.min_lon) / del).floor() as usize + 1;
        let height = ((bbox.max_lat - bbox.min_lat) / del).floor() as usize + 1;
        log::debug!("Source footprint {:?}", bbox);

        Self::new(bbox.max_lat, bbox.min_lon, del, del, width, height)
    }

    /// Latitude of a (fractional) row centre
    pub fn latitude(&self, row: f64) -> f64 {
        self.north_lat - (row + 0.5) * self.del_lat
    }

    /// Longitude of a (fractional) column centre, in [-180, 180)
    pub fn longitude(&self, col: f64) -> f64 {
        let lon = self.west_lon + (col + 0.5) * self.del_lon;
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }

    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform {
            top_left_x: self.west_lon,
            pixel_width: self.del_lon,
            rotation_x: 0.0,
            top_left_y: self.north_lat,
            rotation_y: 0.0,
            pixel_height: -self.del_lat,
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            min_lon: self.west_lon,
            max_lon: self.west_lon + self.width as f64 * self.del_lon,
            min_lat: self.north_lat - self.height as f64 * self.del_lat,
            max_lat: self.north_lat,
        }
    }
}

/// Inputs of one output cell
#[derive(Debug, Clone, Copy)]
pub struct TargetCell {
    pub lat: f64,
    pub lon: f64,
    /// DEM height at the cell centre (m)
    pub elevation: f64,
    pub dem_no_data: f64,
    /// DEM heights around the cell, row 0 north, column 0 west
    pub neighbourhood: Option<[[f64; 3]; 3]>,
    pub del_lat: f64,
    pub del_lon: f64,
}

/// How far a cell got through the geocoding chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CellState {
    Start,
    HaveElevation,
    HaveGroundPoint,
    HaveZeroDopplerTime,
    HaveSlantRange,
    HaveSourceIndex,
    Validated,
    Resampled,
}

/// Fractional source pixel position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceIndex {
    pub range_index: f64,
    pub azimuth_index: f64,
}

/// Outcome of one output cell; `values` holds one entry per target band
#[derive(Debug, Clone, PartialEq)]
pub struct CellResult {
    pub state: CellState,
    pub values: Vec<f64>,
    pub elevation: Option<f64>,
    pub zero_doppler_time: Option<f64>,
    pub slant_range: Option<f64>,
    pub source_index: Option<SourceIndex>,
    pub incidence: Option<IncidenceAngles>,
    pub incidence_angle_from_ellipsoid: Option<f64>,
}

impl CellResult {
    fn no_data(bands: &[TargetBand]) -> Self {
        Self {
            state: CellState::Start,
            values: bands.iter().map(|b| b.no_data_value).collect(),
            elevation: None,
            zero_doppler_time: None,
            slant_range: None,
            source_index: None,
            incidence: None,
            incidence_angle_from_ellipsoid: None,
        }
    }
}

/// One band of a geocoded image
#[derive(Debug, Clone)]
pub struct OutputBand {
    pub name: String,
    pub unit: BandUnit,
    pub no_data_value: f64,
    pub data: SarRealImage,
}

impl OutputBand {
    fn new(name: &str, unit: BandUnit, no_data_value: f64, grid: &TargetGrid) -> Self {
        Self {
            name: name.to_string(),
            unit,
            no_data_value,
            data: Array2::from_elem((grid.height, grid.width), no_data_value as f32),
        }
    }

    /// Fraction of cells holding data
    pub fn valid_fraction(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let nodata = self.no_data_value as f32;
        let valid = self.data.iter().filter(|&&v| v != nodata).count();
        valid as f64 / self.data.len() as f64
    }
}

/// Terrain corrected bands on a lat/lon grid
#[derive(Debug, Clone)]
pub struct GeocodedImage {
    pub grid: TargetGrid,
    /// Geocoded source bands followed by the requested diagnostics bands
    pub bands: Vec<OutputBand>,
    pub completed_tiles: usize,
    pub total_tiles: usize,
    /// Processing stopped early; only completed tiles hold data
    pub cancelled: bool,
}

impl GeocodedImage {
    pub fn band(&self, name: &str) -> Option<&OutputBand> {
        self.bands.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Copy)]
struct TileRect {
    x0: usize,
    y0: usize,
    width: usize,
    height: usize,
}

fn split_tiles(width: usize, height: usize, tile_size: usize) -> Vec<TileRect> {
    let mut tiles = Vec::new();
    for y0 in (0..height).step_by(tile_size) {
        for x0 in (0..width).step_by(tile_size) {
            tiles.push(TileRect {
                x0,
                y0,
                width: tile_size.min(width - x0),
                height: tile_size.min(height - y0),
            });
        }
    }
    tiles
}

/// Range-Doppler terrain corrector for one source product
pub struct TerrainCorrector {
    metadata: SarMetadata,
    tie_points: TiePointGeometry,
    config: TerrainCorrectionConfig,
    interpolator: OrbitInterpolator,
    ephemeris: EphemerisTable,
    mapper: RangeIndexMapper,
    geoid: Box<dyn GeoidModel>,
    wavelength: f64,
    line_time_interval: f64, // days
    skip_bistatic_correction: bool,
}

impl TerrainCorrector {
    pub fn new(
        metadata: SarMetadata,
        tie_points: TiePointGeometry,
        config: TerrainCorrectionConfig,
    ) -> SarResult<Self> {
        metadata.validate()?;
        if config.tile_size == 0 {
            return Err(SarError::Configuration(
                "Tile size must be positive".to_string(),
            ));
        }

        let mut config = config;
        if config.use_average_scene_height
            && (config.save_dem
                || config.save_local_incidence_angle
                || config.save_projected_local_incidence_angle
                || config.save_layover_shadow_mask)
        {
            log::info!("Average scene height in use, DEM derived outputs disabled");
            config.save_dem = false;
            config.save_local_incidence_angle = false;
            config.save_projected_local_incidence_angle = false;
            config.save_layover_shadow_mask = false;
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

        if tie_points.is_near_range_on_left(metadata.source_width) != metadata.near_range_on_left {
            log::warn!(
                "Near range orientation of the metadata disagrees with the tie-point incidence angles"
            );
        }

        let skip_bistatic_correction = metadata.skip_bistatic_correction();
        log::info!(
            "Terrain correction of {} image {}x{}, {} resampling",
            metadata.mission,
            metadata.source_width,
            metadata.source_height,
            config.resampling
        );
        log::debug!(
            "Ground range: {}, bistatic correction: {}",
            metadata.srgr_flag,
            !skip_bistatic_correction
        );

        Ok(Self {
            wavelength: metadata.wavelength(),
            line_time_interval: metadata.line_time_interval / SECONDS_IN_DAY,
            skip_bistatic_correction,
            metadata,
            tie_points,
            config,
            interpolator,
            ephemeris,
            mapper,
            geoid: Box::new(ConstantGeoid::default()),
        })
    }

    /// Heights used where the DEM has no data and masking is off
    pub fn with_geoid(mut self, geoid: Box<dyn GeoidModel>) -> Self {
        self.geoid = geoid;
        self
    }

    pub fn metadata(&self) -> &SarMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &TerrainCorrectionConfig {
        &self.config
    }

    pub fn tie_points(&self) -> &TiePointGeometry {
        &self.tie_points
    }

    /// Output grid over the source footprint
    pub fn target_grid(&self) -> SarResult<TargetGrid> {
        let spacing = self
            .config
            .pixel_spacing
            .unwrap_or_else(|| self.default_pixel_spacing());
        TargetGrid::covering(
            &self.tie_points,
            self.metadata.source_width,
            self.metadata.source_height,
            spacing,
        )
    }

    /// Larger of the ground range and azimuth spacings
    fn default_pixel_spacing(&self) -> f64 {
        let range_spacing = if self.metadata.srgr_flag {
            self.metadata.range_spacing
        } else {
            let inc = self.tie_points.incidence_angle(
                self.metadata.source_width as f64 / 2.0,
                self.metadata.source_height as f64 / 2.0,
            );
            let sin = (inc * DTOR).sin();
            if sin > 0.0 {
                self.metadata.range_spacing / sin
            } else {
                self.metadata.range_spacing
            }
        };
        range_spacing.max(self.metadata.azimuth_spacing)
    }

    fn needs_incidence(&self, calibrating: bool) -> bool {
        calibrating
            || self.config.save_local_incidence_angle
            || self.config.save_projected_local_incidence_angle
    }

    /// Trace one output cell into the source image and resample every band
    pub fn compute_cell(
        &self,
        cell: &TargetCell,
        source: &dyn SourceRaster,
        bands: &[TargetBand],
        calibrator: Option<&dyn Calibrator>,
    ) -> CellResult {
        let mut result = CellResult::no_data(bands);

        let mut alt = cell.elevation;
        if alt == cell.dem_no_data || alt.is_nan() {
            if self.config.mask_no_elevation {
                return result;
            }
            alt = self.geoid.geoid_height(cell.lat, cell.lon);
        }
        result.elevation = Some(alt);
        result.state = CellState::HaveElevation;

        let ground = geodetic_to_cartesian(cell.lat, cell.lon, alt);
        result.state = CellState::HaveGroundPoint;

        let solver = ZeroDopplerSolver::new(&self.ephemeris, self.wavelength);
        let mut time = match solver.solve(&ground) {
            Some(t) => t,
            None => return result,
        };
        let (mut sensor, mut range) = slant_range(&self.interpolator, time, &ground);
        if !self.skip_bistatic_correction {
            time += range / LIGHT_SPEED_IN_METERS_PER_DAY;
            let corrected = slant_range(&self.interpolator, time, &ground);
            sensor = corrected.0;
            range = corrected.1;
        }
        result.zero_doppler_time = Some(time);
        result.state = CellState::HaveZeroDopplerTime;
        result.slant_range = Some(range);
        result.state = CellState::HaveSlantRange;

        let range_index = match self.mapper.range_index(time, range) {
            Some(idx) => idx,
            None => return result,
        };
        let azimuth_index = (time - self.ephemeris.first_line_time()) / self.line_time_interval;
        result.source_index = Some(SourceIndex {
            range_index,
            azimuth_index,
        });
        result.state = CellState::HaveSourceIndex;

        let (sensor_pos, _) = cartesian_to_geodetic(&sensor);
        if !self.is_valid_cell(range_index, azimuth_index, cell.lat, cell.lon, &sensor_pos) {
            return result;
        }
        result.state = CellState::Validated;

        if self.needs_incidence(calibrator.is_some()) {
            if let Some(heights) = &cell.neighbourhood {
                let geometry = LocalGeometry::from_grid(
                    cell.lat,
                    cell.lon,
                    cell.del_lat,
                    cell.del_lon,
                    ground,
                    sensor,
                );
                result.incidence = incidence_angles(&geometry, heights, cell.dem_no_data);
            }
        }
        if self.config.save_incidence_angle_from_ellipsoid {
            result.incidence_angle_from_ellipsoid =
                Some(self.tie_points.incidence_angle(range_index, azimuth_index));
        }

        let method = self.config.resampling;
        let rect = method.window_rect(range_index, azimuth_index);
        for (k, band) in bands.iter().enumerate() {
            let (i_band, q_band) = match band.source {
                BandSource::Single(b) => (b, None),
                BandSource::IqPair { i, q } => (i, Some(q)),
            };
            let window =
                ResamplingWindow::from_raster(source, i_band, q_band, rect, band.no_data_value);
            let value = match method.resample(
                &window,
                range_index,
                azimuth_index,
                source.width(),
                source.height(),
            ) {
                Some(v) if v != band.no_data_value => v,
                _ => continue,
            };

            result.values[k] = match calibrator {
                Some(cal) => match &result.incidence {
                    Some(angles) => cal.apply_calibration(
                        value,
                        &CalibrationContext {
                            range_index,
                            azimuth_index,
                            slant_range: range,
                            satellite_height: sensor.norm(),
                            earth_centre_distance: ground.norm(),
                            projected_local_incidence_angle: angles.projected,
                            polarization: band.polarization,
                            unit: band.unit,
                        },
                    ),
                    None => band.no_data_value,
                },
                None => value,
            };
        }
        result.state = CellState::Resampled;
        result
    }

    /// Source index inside the image and the cell closer to the tie-point position than
    /// to the sensor nadir
    pub fn is_valid_cell(
        &self,
        range_index: f64,
        azimuth_index: f64,
        lat: f64,
        lon: f64,
        sensor_pos: &GeoPos,
    ) -> bool {
        // Half-open: the last sample and line are rejected
        let max_x = (self.metadata.source_width - 1) as f64;
        let max_y = (self.metadata.source_height - 1) as f64;
        if range_index < 0.0 || range_index >= max_x || azimuth_index < 0.0 || azimuth_index >= max_y
        {
            return false;
        }

        let tp = self.tie_points.geo_pos(range_index, azimuth_index);
        let to_tie_point = (lat - tp.lat).abs() + longitude_difference(lon, tp.lon);
        let to_sensor = (lat - sensor_pos.lat).abs() + longitude_difference(lon, sensor_pos.lon);
        to_tie_point <= to_sensor
    }

    /// Terrain correct `source` onto `grid`, tile by tile.
    ///
    /// Setting `cancel` stops before the next tile; the image then holds the completed tiles.
    pub fn geocode(
        &self,
        dem: &dyn ElevationModel,
        source: &dyn SourceRaster,
        grid: &TargetGrid,
        calibrator: Option<&dyn Calibrator>,
        cancel: &AtomicBool,
    ) -> SarResult<GeocodedImage> {
        if source.width() != self.metadata.source_width
            || source.height() != self.metadata.source_height
        {
            return Err(SarError::Configuration(format!(
                "Source raster is {}x{} but metadata describes {}x{}",
                source.width(),
                source.height(),
                self.metadata.source_width,
                self.metadata.source_height
            )));
        }
        let bands = TargetBand::from_source_bands(source.bands())?;
        let dem_no_data = if self.config.use_average_scene_height {
            DEFAULT_DEM_NO_DATA
        } else {
            dem.no_data_value()
        };

        let mut outputs: Vec<OutputBand> = bands
            .iter()
            .map(|b| OutputBand::new(&b.name, b.unit, b.no_data_value, grid))
            .collect();
        if self.config.save_dem {
            outputs.push(OutputBand::new("elevation", BandUnit::Meters, dem_no_data, grid));
        }
        for (enabled, name) in [
            (self.config.save_local_incidence_angle, "localIncidenceAngle"),
            (
                self.config.save_projected_local_incidence_angle,
                "projectedLocalIncidenceAngle",
            ),
            (
                self.config.save_incidence_angle_from_ellipsoid,
                "incidenceAngleFromEllipsoid",
            ),
        ] {
            if enabled {
                outputs.push(OutputBand::new(
                    name,
                    BandUnit::Degrees,
                    NON_VALID_INCIDENCE_ANGLE,
                    grid,
                ));
            }
        }
        if self.config.save_lat_lon {
            for name in ["latitude", "longitude"] {
                outputs.push(OutputBand::new(
                    name,
                    BandUnit::Degrees,
                    NON_VALID_INCIDENCE_ANGLE,
                    grid,
                ));
            }
        }
        let layover_shadow_mask = if self.config.save_layover_shadow_mask {
            outputs.push(OutputBand::new("layoverShadowMask", BandUnit::Bit, 0.0, grid));
            self.layover_shadow_mask(dem, cancel)?
        } else {
            None
        };

        let num_outputs = outputs.len();
        let tiles = split_tiles(grid.width, grid.height, self.config.tile_size);
        log::info!(
            "Geocoding {} band(s) onto {}x{} grid in {} tiles",
            bands.len(),
            grid.width,
            grid.height,
            tiles.len()
        );

        let run = |tile: &TileRect| {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            Some(self.process_tile(
                tile,
                dem,
                dem_no_data,
                source,
                &bands,
                grid,
                calibrator,
                layover_shadow_mask.as_ref(),
                num_outputs,
            ))
        };

        #[cfg(feature = "parallel")]
        let results: Vec<Option<(TileRect, Vec<Array2<f32>>)>> = {
            use rayon::prelude::*;
            tiles.par_iter().map(run).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let results: Vec<Option<(TileRect, Vec<Array2<f32>>)>> = tiles.iter().map(run).collect();

        let mut completed_tiles = 0;
        for (rect, tile_bands) in results.into_iter().flatten() {
            for (output, data) in outputs.iter_mut().zip(tile_bands) {
                output
                    .data
                    .slice_mut(s![
                        rect.y0..rect.y0 + rect.height,
                        rect.x0..rect.x0 + rect.width
                    ])
                    .assign(&data);
            }
            completed_tiles += 1;
        }

        let cancelled = completed_tiles < tiles.len();
        if cancelled {
            log::warn!(
                "Terrain correction cancelled after {}/{} tiles",
                completed_tiles,
                tiles.len()
            );
        }

        let coverage = outputs[0].valid_fraction() * 100.0;
        if coverage == 0.0 && !cancelled {
            log::warn!("Terrain correction produced no valid output cell");
        } else {
            log::info!("Terrain correction completed: {:.1}% coverage", coverage);
        }

        Ok(GeocodedImage {
            grid: *grid,
            bands: outputs,
            completed_tiles,
            total_tiles: tiles.len(),
            cancelled,
        })
    }

    /// Layover/shadow mask in source geometry, built once by the simulator
    fn layover_shadow_mask(
        &self,
        dem: &dyn ElevationModel,
        cancel: &AtomicBool,
    ) -> SarResult<Option<Array2<u8>>> {
        let config = SimulationConfig {
            tile_size: self.config.tile_size,
            save_layover_shadow_mask: true,
            srgr_tolerance: self.config.srgr_tolerance,
            ..Default::default()
        };
        let simulator =
            SarSimulator::new(self.metadata.clone(), self.tie_points.clone(), config)?;
        log::info!("Creating layover/shadow mask");
        let image = simulator.simulate(dem, cancel)?;
        Ok(image.layover_shadow_mask)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_tile(
        &self,
        rect: &TileRect,
        dem: &dyn ElevationModel,
        dem_no_data: f64,
        source: &dyn SourceRaster,
        bands: &[TargetBand],
        grid: &TargetGrid,
        calibrator: Option<&dyn Calibrator>,
        layover_shadow_mask: Option<&Array2<u8>>,
        num_outputs: usize,
    ) -> (TileRect, Vec<Array2<f32>>) {
        // Local DEM with a one cell margin for the incidence stencil
        let local_dem = Array2::from_shape_fn((rect.height + 2, rect.width + 2), |(r, c)| {
            if self.config.use_average_scene_height {
                return self.metadata.avg_scene_height;
            }
            let row = rect.y0 as f64 + r as f64 - 1.0;
            let col = rect.x0 as f64 + c as f64 - 1.0;
            dem.elevation(grid.latitude(row), grid.longitude(col))
        });
        let with_neighbourhood = self.needs_incidence(calibrator.is_some());

        let mut tile_bands: Vec<Array2<f32>> = Vec::with_capacity(num_outputs);
        for band in bands {
            tile_bands.push(Array2::from_elem(
                (rect.height, rect.width),
                band.no_data_value as f32,
            ));
        }
        let diagnostics_no_data = [
            (self.config.save_dem, dem_no_data),
            (self.config.save_local_incidence_angle, NON_VALID_INCIDENCE_ANGLE),
            (
                self.config.save_projected_local_incidence_angle,
                NON_VALID_INCIDENCE_ANGLE,
            ),
            (
                self.config.save_incidence_angle_from_ellipsoid,
                NON_VALID_INCIDENCE_ANGLE,
            ),
            (self.config.save_lat_lon, NON_VALID_INCIDENCE_ANGLE),
            (self.config.save_lat_lon, NON_VALID_INCIDENCE_ANGLE),
            (self.config.save_layover_shadow_mask, 0.0),
        ];
        for (enabled, no_data) in diagnostics_no_data {
            if enabled {
                tile_bands.push(Array2::from_elem(
                    (rect.height, rect.width),
                    no_data as f32,
                ));
            }
        }

        for r in 0..rect.height {
            for c in 0..rect.width {
                let neighbourhood = if with_neighbourhood {
                    let mut heights = [[0.0; 3]; 3];
                    for (dr, row) in heights.iter_mut().enumerate() {
                        for (dc, h) in row.iter_mut().enumerate() {
                            *h = local_dem[[r + dr, c + dc]];
                        }
                    }
                    Some(heights)
                } else {
                    None
                };
                let cell = TargetCell {
                    lat: grid.latitude((rect.y0 + r) as f64),
                    lon: grid.longitude((rect.x0 + c) as f64),
                    elevation: local_dem[[r + 1, c + 1]],
                    dem_no_data,
                    neighbourhood,
                    del_lat: grid.del_lat,
                    del_lon: grid.del_lon,
                };

                let result = self.compute_cell(&cell, source, bands, calibrator);
                for (k, value) in result.values.iter().enumerate() {
                    tile_bands[k][[r, c]] = *value as f32;
                }

                let mut k = bands.len();
                if self.config.save_dem {
                    if let Some(alt) = result.elevation {
                        if result.state >= CellState::Validated {
                            tile_bands[k][[r, c]] = alt as f32;
                        }
                    }
                    k += 1;
                }
                if self.config.save_local_incidence_angle {
                    if let Some(angles) = &result.incidence {
                        tile_bands[k][[r, c]] = angles.local as f32;
                    }
                    k += 1;
                }
                if self.config.save_projected_local_incidence_angle {
                    if let Some(angles) = &result.incidence {
                        tile_bands[k][[r, c]] = angles.projected as f32;
                    }
                    k += 1;
                }
                if self.config.save_incidence_angle_from_ellipsoid {
                    if let Some(angle) = result.incidence_angle_from_ellipsoid {
                        tile_bands[k][[r, c]] = angle as f32;
                    }
                    k += 1;
                }
                let validated = result.state >= CellState::Validated;
                if self.config.save_lat_lon {
                    if validated {
                        tile_bands[k][[r, c]] = cell.lat as f32;
                        tile_bands[k + 1][[r, c]] = cell.lon as f32;
                    }
                    k += 2;
                }
                if self.config.save_layover_shadow_mask {
                    if let (Some(mask), Some(index), true) =
                        (layover_shadow_mask, result.source_index, validated)
                    {
                        let row = (index.azimuth_index + 0.5) as usize;
                        let col = (index.range_index + 0.5) as usize;
                        if let Some(&flags) = mask.get((row, col)) {
                            tile_bands[k][[r, c]] = flags as f32;
                        }
                    }
                }
            }
        }

        log::debug!(
            "Tile at ({}, {}) {}x{} done",
            rect.x0,
            rect.y0,
            rect.width,
            rect.height
        );
        (*rect, tile_bands)
    }

    /// Sensor position at a source line, for callers inspecting cell geometry
    pub fn sensor_position(&self, azimuth_index: f64) -> Vector3 {
        self.interpolator
            .position(self.ephemeris.first_line_time() + azimuth_index * self.line_time_interval)
    }
}
