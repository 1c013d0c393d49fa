mod common;

use approx::assert_abs_diff_eq;
use common::*;
use ndarray::{s, Array2};
use num_complex::Complex;
use sargeo::core::calibrate::{CalibrationContext, Calibrator};
use sargeo::core::geodesy::cartesian_to_geodetic;
use sargeo::core::simulation::LAYOVER;
use sargeo::core::terrain_correction::{
    CellState, GeocodedImage, TargetCell, TargetGrid, TerrainCorrectionConfig, TerrainCorrector,
};
use sargeo::io::dem::{ConstantGeoid, ElevationModel};
use sargeo::io::BandInfo;
use sargeo::types::{BandUnit, Polarization, SarError, DTOR};
use sargeo::{ComplexRaster, Geolocator, ResamplingMethod, SourceRaster};
use std::sync::atomic::{AtomicBool, Ordering};

fn nearest_config() -> TerrainCorrectionConfig {
    TerrainCorrectionConfig {
        resampling: ResamplingMethod::NearestNeighbour,
        pixel_spacing: Some(15.0),
        tile_size: 32,
        ..Default::default()
    }
}

fn create_corrector(config: TerrainCorrectionConfig) -> TerrainCorrector {
    let metadata = create_scene_metadata(true);
    let tie_points = create_tie_points(&metadata);
    TerrainCorrector::new(metadata, tie_points, config).unwrap()
}

fn cell(grid: &TargetGrid, dem: &dyn ElevationModel, row: usize, col: usize) -> TargetCell {
    let lat = grid.latitude(row as f64);
    let lon = grid.longitude(col as f64);
    TargetCell {
        lat,
        lon,
        elevation: dem.elevation(lat, lon),
        dem_no_data: dem.no_data_value(),
        neighbourhood: None,
        del_lat: grid.del_lat,
        del_lon: grid.del_lon,
    }
}

fn geocode(
    corrector: &TerrainCorrector,
    dem: &dyn ElevationModel,
    source: &dyn SourceRaster,
    grid: &TargetGrid,
) -> GeocodedImage {
    let cancel = AtomicBool::new(false);
    corrector.geocode(dem, source, grid, None, &cancel).unwrap()
}

#[test]
fn test_flat_dem_checkerboard_remap() {
    init_logging();

    let corrector = create_corrector(nearest_config());
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let board = checkerboard();
    let source = amplitude_raster(board.clone());
    let grid = corrector.target_grid().unwrap();
    println!("Target grid {}x{}", grid.width, grid.height);

    let image = geocode(&corrector, &dem, &source, &grid);
    assert_eq!(image.completed_tiles, image.total_tiles);
    assert!(!image.cancelled);

    let band = image.band("Amplitude_VV").unwrap();
    let bands = sargeo::core::TargetBand::from_source_bands(source.bands()).unwrap();

    let mut valid = 0;
    for row in 0..grid.height {
        for col in 0..grid.width {
            let result = corrector.compute_cell(&cell(&grid, &dem, row, col), &source, &bands, None);
            assert_eq!(band.data[[row, col]], result.values[0] as f32);
            if result.state != CellState::Resampled {
                assert_eq!(result.values[0], NO_DATA);
                continue;
            }

            let index = result.source_index.unwrap();
            let expected = board[[
                index.azimuth_index.round() as usize,
                index.range_index.round() as usize,
            ]];
            assert_eq!(result.values[0] as f32, expected);
            valid += 1;
        }
    }

    let fraction = valid as f64 / (grid.width * grid.height) as f64;
    println!("Valid output fraction {:.3}", fraction);
    assert!(fraction > 0.5);
    assert_abs_diff_eq!(band.valid_fraction(), fraction, epsilon = 1e-12);
}

#[test]
fn test_geocoding_is_deterministic() {
    let corrector = create_corrector(nearest_config());
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let grid = corrector.target_grid().unwrap();

    let first = geocode(&corrector, &dem, &source, &grid);
    let second = geocode(&corrector, &dem, &source, &grid);
    assert_eq!(first.bands[0].data, second.bands[0].data);
}

#[test]
fn test_forward_geolocation_inverts_geocoding() {
    let metadata = create_scene_metadata(true);
    let geolocator = Geolocator::new(&metadata, None).unwrap();
    let corrector = create_corrector(nearest_config());
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let bands = sargeo::core::TargetBand::from_source_bands(source.bands()).unwrap();

    for &(range_index, azimuth_index) in &[(10.3, 20.7), (40.0, 33.2), (55.5, 50.25)] {
        let pos = geolocator
            .pixel_to_geo(range_index, azimuth_index, TERRAIN_HEIGHT)
            .unwrap();
        let target = TargetCell {
            lat: pos.lat,
            lon: pos.lon,
            elevation: TERRAIN_HEIGHT,
            dem_no_data: dem.no_data_value(),
            neighbourhood: None,
            del_lat: 1e-4,
            del_lon: 1e-4,
        };
        let result = corrector.compute_cell(&target, &source, &bands, None);
        assert_eq!(result.state, CellState::Resampled);
        let index = result.source_index.unwrap();
        assert_abs_diff_eq!(index.range_index, range_index, epsilon = 1e-3);
        assert_abs_diff_eq!(index.azimuth_index, azimuth_index, epsilon = 1e-3);
    }
}

#[test]
fn test_validity_check_rejects_mirror_point() {
    let corrector = create_corrector(nearest_config());
    let (sensor, _) = cartesian_to_geodetic(&corrector.sensor_position(10.0));
    let true_pos = corrector.tie_points().geo_pos(10.0, 10.0);

    assert!(corrector.is_valid_cell(10.0, 10.0, true_pos.lat, true_pos.lon, &sensor));
    // Same range on the other side of the ground track
    assert!(!corrector.is_valid_cell(10.0, 10.0, true_pos.lat, -true_pos.lon, &sensor));
    // Outside the image
    assert!(!corrector.is_valid_cell(63.0, 10.0, true_pos.lat, true_pos.lon, &sensor));
    assert!(!corrector.is_valid_cell(10.0, -0.5, true_pos.lat, true_pos.lon, &sensor));
}

#[test]
fn test_flipped_orientation_gives_same_image() {
    let corrector = create_corrector(nearest_config());
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let board = checkerboard();
    let grid = corrector.target_grid().unwrap();
    let image = geocode(&corrector, &dem, &amplitude_raster(board.clone()), &grid);

    let flipped_metadata = create_scene_metadata(false);
    let flipped_tie_points = create_tie_points(&flipped_metadata);
    let flipped =
        TerrainCorrector::new(flipped_metadata, flipped_tie_points, nearest_config()).unwrap();
    let mirrored = board.slice(s![.., ..;-1]).to_owned();
    let flipped_image = geocode(&flipped, &dem, &amplitude_raster(mirrored), &grid);

    let a = &image.bands[0].data;
    let b = &flipped_image.bands[0].data;
    let nodata = NO_DATA as f32;
    let mut both = 0;
    for (va, vb) in a.iter().zip(b.iter()) {
        if *va != nodata && *vb != nodata {
            assert_eq!(va, vb);
            both += 1;
        }
    }
    let valid_a = a.iter().filter(|&&v| v != nodata).count();
    assert!(both as f64 > 0.9 * valid_a as f64);
}

#[test]
fn test_cancellation_leaves_no_data() {
    let corrector = create_corrector(nearest_config());
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let grid = corrector.target_grid().unwrap();

    let cancel = AtomicBool::new(true);
    let image = corrector.geocode(&dem, &source, &grid, None, &cancel).unwrap();
    assert!(image.cancelled);
    assert_eq!(image.completed_tiles, 0);
    assert!(image.total_tiles > 1);
    assert_eq!(image.bands[0].valid_fraction(), 0.0);
}

#[test]
fn test_missing_elevation_masked_or_filled_by_geoid() {
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let void = plateau_dem(-32768.0);
    let source = amplitude_raster(checkerboard());

    let masked = create_corrector(nearest_config());
    let grid = masked.target_grid().unwrap();
    let reference = geocode(&masked, &dem, &source, &grid);
    let image = geocode(&masked, &void, &source, &grid);
    assert_eq!(image.bands[0].valid_fraction(), 0.0);

    let filled = create_corrector(TerrainCorrectionConfig {
        mask_no_elevation: false,
        ..nearest_config()
    })
    .with_geoid(Box::new(ConstantGeoid(TERRAIN_HEIGHT)));
    let image = geocode(&filled, &void, &source, &grid);
    assert_eq!(image.bands[0].data, reference.bands[0].data);
}

#[test]
fn test_average_scene_height_matches_flat_dem() {
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let void = plateau_dem(-32768.0);
    let source = amplitude_raster(checkerboard());

    let corrector = create_corrector(nearest_config());
    let grid = corrector.target_grid().unwrap();
    let reference = geocode(&corrector, &dem, &source, &grid);

    let average = create_corrector(TerrainCorrectionConfig {
        use_average_scene_height: true,
        save_dem: true,
        ..nearest_config()
    });
    assert!(!average.config().save_dem);
    let image = geocode(&average, &void, &source, &grid);
    assert_eq!(image.bands.len(), 1);

    let no_mask = create_corrector(TerrainCorrectionConfig {
        use_average_scene_height: true,
        save_layover_shadow_mask: true,
        ..nearest_config()
    });
    assert!(!no_mask.config().save_layover_shadow_mask);
    assert_eq!(image.bands[0].data, reference.bands[0].data);
}

#[test]
fn test_diagnostics_bands_on_flat_terrain() {
    let corrector = create_corrector(TerrainCorrectionConfig {
        resampling: ResamplingMethod::Bilinear,
        save_dem: true,
        save_local_incidence_angle: true,
        save_projected_local_incidence_angle: true,
        save_incidence_angle_from_ellipsoid: true,
        ..nearest_config()
    });
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let grid = corrector.target_grid().unwrap();
    let image = geocode(&corrector, &dem, &source, &grid);

    assert_eq!(image.bands.len(), 5);
    let elevation = image.band("elevation").unwrap();
    let local = image.band("localIncidenceAngle").unwrap();
    let projected = image.band("projectedLocalIncidenceAngle").unwrap();
    let ellipsoid = image.band("incidenceAngleFromEllipsoid").unwrap();

    let (row, col) = (grid.height / 2, grid.width / 2);
    assert_ne!(image.bands[0].data[[row, col]], NO_DATA as f32);
    assert_abs_diff_eq!(elevation.data[[row, col]], TERRAIN_HEIGHT as f32, epsilon = 1e-3);

    let lia = local.data[[row, col]] as f64;
    let plia = projected.data[[row, col]] as f64;
    let iae = ellipsoid.data[[row, col]] as f64;
    println!("LIA {:.3}, projected {:.3}, ellipsoid {:.3}", lia, plia, iae);
    assert!(lia > 20.0 && lia < 40.0);
    assert_abs_diff_eq!(lia, iae, epsilon = 0.5);
    assert_abs_diff_eq!(plia, lia, epsilon = 0.5);
}

#[test]
fn test_calibrator_sees_projected_incidence_angle() {
    let corrector = create_corrector(nearest_config());
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let grid = corrector.target_grid().unwrap();
    let plain = geocode(&corrector, &dem, &source, &grid);

    let sigma_to_gamma = |value: f64, ctx: &CalibrationContext| {
        value / (ctx.projected_local_incidence_angle * DTOR).cos()
    };
    let cancel = AtomicBool::new(false);
    let calibrated = corrector
        .geocode(&dem, &source, &grid, Some(&sigma_to_gamma as &dyn Calibrator), &cancel)
        .unwrap();

    let (row, col) = (grid.height / 2, grid.width / 2);
    let raw = plain.bands[0].data[[row, col]];
    let scaled = calibrated.bands[0].data[[row, col]];
    assert_ne!(raw, NO_DATA as f32);
    // cos of an incidence angle between 20 and 40 degrees
    let ratio = raw / scaled;
    assert!(ratio > 0.76 && ratio < 0.94);
}

#[test]
fn test_unknown_kernel_and_empty_srgr_list_are_setup_errors() {
    let kernel = "LANCZOS".parse::<ResamplingMethod>();
    assert!(matches!(kernel, Err(SarError::UnknownResampling(_))));

    let metadata = create_scene_metadata(true);
    let tie_points = create_tie_points(&metadata);
    let mut ground_range = metadata.clone();
    ground_range.srgr_flag = true;
    let result = TerrainCorrector::new(ground_range, tie_points, nearest_config());
    assert!(matches!(result, Err(SarError::Configuration(_))));
}

/// Raster raising the cancel flag on its first read
struct CancellingRaster<'a> {
    inner: &'a dyn SourceRaster,
    cancel: &'a AtomicBool,
}

impl SourceRaster for CancellingRaster<'_> {
    fn width(&self) -> usize {
        self.inner.width()
    }

    fn height(&self) -> usize {
        self.inner.height()
    }

    fn bands(&self) -> &[BandInfo] {
        self.inner.bands()
    }

    fn sample(&self, band: usize, x: usize, y: usize) -> f64 {
        self.cancel.store(true, Ordering::Relaxed);
        self.inner.sample(band, x, y)
    }
}

#[test]
fn test_cancellation_keeps_completed_tiles() {
    let tile_size = 16;
    let corrector = create_corrector(TerrainCorrectionConfig {
        tile_size,
        ..nearest_config()
    });
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let grid = corrector.target_grid().unwrap();
    let reference = geocode(&corrector, &dem, &source, &grid);

    let cancel = AtomicBool::new(false);
    let cancelling = CancellingRaster {
        inner: &source,
        cancel: &cancel,
    };
    // One worker so tiles run in order
    let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
    let image = pool
        .install(|| corrector.geocode(&dem, &cancelling, &grid, None, &cancel))
        .unwrap();

    println!("Completed {}/{} tiles", image.completed_tiles, image.total_tiles);
    assert!(image.cancelled);
    assert!(image.completed_tiles >= 1);
    assert!(image.completed_tiles < image.total_tiles);

    let tiles_across = (grid.width + tile_size - 1) / tile_size;
    let data = &image.bands[0].data;
    let mut valid = 0;
    for row in 0..grid.height {
        for col in 0..grid.width {
            let tile = (row / tile_size) * tiles_across + col / tile_size;
            if tile < image.completed_tiles {
                assert_eq!(data[[row, col]], reference.bands[0].data[[row, col]]);
                if data[[row, col]] != NO_DATA as f32 {
                    valid += 1;
                }
            } else {
                assert_eq!(data[[row, col]], NO_DATA as f32);
            }
        }
    }
    assert!(valid > 0);
}

#[test]
fn test_complex_raster_geocoded_as_intensity() {
    let corrector = create_corrector(TerrainCorrectionConfig {
        resampling: ResamplingMethod::Bilinear,
        ..nearest_config()
    });
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let data = Array2::from_elem((HEIGHT, WIDTH), Complex::new(3.0f32, 4.0));
    let source = ComplexRaster::new(data, Some(Polarization::VV), NO_DATA);
    let grid = corrector.target_grid().unwrap();
    let image = geocode(&corrector, &dem, &source, &grid);

    assert_eq!(image.bands.len(), 1);
    let band = image.band("Intensity_VV").unwrap();
    assert_eq!(band.unit, BandUnit::Intensity);
    assert!(band.valid_fraction() > 0.5);
    for &v in band.data.iter().filter(|&&v| v != NO_DATA as f32) {
        assert_abs_diff_eq!(v, 25.0, epsilon = 1e-4);
    }
}

#[test]
fn test_ground_range_product_geocoding() {
    let metadata = create_ground_range_metadata();
    let geolocator = Geolocator::new(&metadata, None).unwrap();
    let tie_points = create_tie_points(&metadata);
    let corrector = TerrainCorrector::new(metadata, tie_points, nearest_config()).unwrap();
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let bands = sargeo::core::TargetBand::from_source_bands(source.bands()).unwrap();

    for &(range_index, azimuth_index) in &[(10.3, 20.7), (40.0, 33.2), (55.5, 50.25)] {
        let pos = geolocator
            .pixel_to_geo(range_index, azimuth_index, TERRAIN_HEIGHT)
            .unwrap();
        let target = TargetCell {
            lat: pos.lat,
            lon: pos.lon,
            elevation: TERRAIN_HEIGHT,
            dem_no_data: dem.no_data_value(),
            neighbourhood: None,
            del_lat: 1e-4,
            del_lon: 1e-4,
        };
        let result = corrector.compute_cell(&target, &source, &bands, None);
        assert_eq!(result.state, CellState::Resampled);
        let index = result.source_index.unwrap();
        assert_abs_diff_eq!(index.range_index, range_index, epsilon = 1e-2);
        assert_abs_diff_eq!(index.azimuth_index, azimuth_index, epsilon = 1e-3);
    }

    let grid = corrector.target_grid().unwrap();
    let image = geocode(&corrector, &dem, &source, &grid);
    println!("Ground range coverage {:.3}", image.bands[0].valid_fraction());
    assert!(image.bands[0].valid_fraction() > 0.5);
}

#[test]
fn test_no_data_samples_are_never_blended() {
    let corrector = create_corrector(TerrainCorrectionConfig {
        resampling: ResamplingMethod::Bilinear,
        ..nearest_config()
    });
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let grid = corrector.target_grid().unwrap();

    let blended = geocode(&corrector, &dem, &amplitude_raster(checkerboard()), &grid);
    assert!(blended.bands[0].data.iter().any(|&v| v > 10.0 && v < 20.0));

    // The 10 blocks now hold no-data
    let source = amplitude_raster_with_no_data(checkerboard(), 10.0);
    let image = geocode(&corrector, &dem, &source, &grid);
    let band = &image.bands[0];
    assert_eq!(band.no_data_value, 10.0);
    assert!(band.data.iter().all(|&v| v == 10.0 || v == 20.0));
    assert!(band.data.iter().any(|&v| v == 20.0));
}

#[test]
fn test_lat_lon_bands() {
    let corrector = create_corrector(TerrainCorrectionConfig {
        save_lat_lon: true,
        ..nearest_config()
    });
    let dem = plateau_dem(TERRAIN_HEIGHT as f32);
    let source = amplitude_raster(checkerboard());
    let grid = corrector.target_grid().unwrap();
    let image = geocode(&corrector, &dem, &source, &grid);

    assert_eq!(image.bands.len(), 3);
    let lat = image.band("latitude").unwrap();
    let lon = image.band("longitude").unwrap();
    assert_eq!(lat.unit, BandUnit::Degrees);

    for row in 0..grid.height {
        for col in 0..grid.width {
            if image.bands[0].data[[row, col]] == NO_DATA as f32 {
                assert_eq!(lat.data[[row, col]], lat.no_data_value as f32);
                assert_eq!(lon.data[[row, col]], lon.no_data_value as f32);
            } else {
                let expected_lat = grid.latitude(row as f64) as f32;
                let expected_lon = grid.longitude(col as f64) as f32;
                assert_abs_diff_eq!(lat.data[[row, col]], expected_lat, epsilon = 1e-6);
                assert_abs_diff_eq!(lon.data[[row, col]], expected_lon, epsilon = 1e-6);
            }
        }
    }
}

#[test]
fn test_layover_shadow_mask_band() {
    init_logging();

    let corrector = create_corrector(TerrainCorrectionConfig {
        save_layover_shadow_mask: true,
        ..nearest_config()
    });
    let source = amplitude_raster(checkerboard());
    let grid = corrector.target_grid().unwrap();

    let flat = geocode(&corrector, &plateau_dem(TERRAIN_HEIGHT as f32), &source, &grid);
    assert_eq!(flat.bands.len(), 2);
    let mask = flat.band("layoverShadowMask").unwrap();
    assert_eq!(mask.unit, BandUnit::Bit);
    assert!(mask.data.iter().all(|&v| v == 0.0));

    let steep = geocode(&corrector, &ramp_dem(), &source, &grid);
    let mask = steep.band("layoverShadowMask").unwrap();
    assert!(mask.data.iter().all(|&v| (0.0..=3.0).contains(&v)));
    let layover = mask
        .data
        .iter()
        .filter(|&&v| (v as u8) & LAYOVER != 0)
        .count();
    println!("{} cells in layover", layover);
    assert!(layover > 0);
}
