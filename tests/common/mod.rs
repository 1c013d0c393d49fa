//! Synthetic scene shared by the integration tests.
//!
//! A sensor flies north along a straight line 700 km above the equator at
//! longitude 0 and looks east at a flat 100 m plateau around longitude 3.

#![allow(dead_code)]

use ndarray::Array2;
use sargeo::core::geodesy::geodetic_to_cartesian;
use sargeo::io::{ArrayDem, BandInfo};
use sargeo::types::{
    wgs84, BandUnit, GeoPos, GeoTransform, OrbitStateVector, Polarization, SrgrCoefficients,
    SECONDS_IN_DAY,
};
use sargeo::{ArrayRaster, Geolocator, SarMetadata, Vector3};

pub const WIDTH: usize = 64;
pub const HEIGHT: usize = 64;
pub const TERRAIN_HEIGHT: f64 = 100.0;
pub const NO_DATA: f64 = 0.0;

const T0: f64 = 0.25;
const ALTITUDE: f64 = 700_000.0;
const SPEED: f64 = 7000.0;
const LINE_TIME_INTERVAL: f64 = 0.002;
const RANGE_SPACING: f64 = 20.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sensor_at(seconds: f64) -> Vector3 {
    Vector3::new(wgs84::SEMI_MAJOR_AXIS + ALTITUDE, 0.0, -140_000.0 + SPEED * seconds)
}

pub fn create_scene_metadata(near_range_on_left: bool) -> SarMetadata {
    let orbit_state_vectors = (0..5)
        .map(|k| {
            let seconds = 10.0 * k as f64;
            let p = sensor_at(seconds);
            OrbitStateVector::new(
                T0 + seconds / SECONDS_IN_DAY,
                [p.x, p.y, p.z],
                [0.0, 0.0, SPEED],
            )
        })
        .collect();

    // Scene centre at range sample 32; the zero-Doppler plane of a straight
    // northbound track is z = const.
    let reference = geodetic_to_cartesian(0.004, 3.0, TERRAIN_HEIGHT);
    let sensor = Vector3::new(wgs84::SEMI_MAJOR_AXIS + ALTITUDE, 0.0, reference.z);
    let near_edge_slant_range = sensor.distance(&reference) - 32.0 * RANGE_SPACING;

    let first_line_time = T0 + 20.0 / SECONDS_IN_DAY;
    SarMetadata {
        mission: "ERS2".to_string(),
        polarizations: vec![Polarization::VV],
        orbit_state_vectors,
        radar_frequency: 5300.0,
        range_spacing: RANGE_SPACING,
        azimuth_spacing: 12.7,
        first_line_time,
        last_line_time: first_line_time
            + (HEIGHT - 1) as f64 * LINE_TIME_INTERVAL / SECONDS_IN_DAY,
        line_time_interval: LINE_TIME_INTERVAL,
        near_edge_slant_range,
        srgr_flag: false,
        srgr_coefficients: vec![],
        near_range_on_left,
        bistatic_correction_applied: false,
        avg_scene_height: TERRAIN_HEIGHT,
        scene_centre: GeoPos::new(0.004, 3.0),
        source_width: WIDTH,
        source_height: HEIGHT,
    }
}

/// Ground range variant of the scene; the SRGR polynomial drifts 5 m over the scene
pub fn create_ground_range_metadata() -> SarMetadata {
    let mut metadata = create_scene_metadata(true);
    let near = metadata.near_edge_slant_range;
    metadata.srgr_flag = true;
    metadata.srgr_coefficients = vec![
        SrgrCoefficients {
            time_mjd: metadata.first_line_time,
            ground_range_origin: 0.0,
            coefficients: vec![near, 0.5, 2e-6],
        },
        SrgrCoefficients {
            time_mjd: metadata.last_line_time,
            ground_range_origin: 0.0,
            coefficients: vec![near + 5.0, 0.5, 2e-6],
        },
    ];
    metadata
}

pub fn create_tie_points(metadata: &SarMetadata) -> sargeo::io::TiePointGeometry {
    Geolocator::new(metadata, None)
        .unwrap()
        .tie_point_geometry(WIDTH, HEIGHT, 8, TERRAIN_HEIGHT)
        .unwrap()
}

/// 8x8 pixel blocks of 10 and 20, `[azimuth, range]`
pub fn checkerboard() -> Array2<f32> {
    Array2::from_shape_fn((HEIGHT, WIDTH), |(r, c)| {
        if (r / 8 + c / 8) % 2 == 0 {
            10.0
        } else {
            20.0
        }
    })
}

pub fn amplitude_raster(data: Array2<f32>) -> ArrayRaster<f32> {
    amplitude_raster_with_no_data(data, NO_DATA)
}

pub fn amplitude_raster_with_no_data(data: Array2<f32>, no_data: f64) -> ArrayRaster<f32> {
    ArrayRaster::new(WIDTH, HEIGHT)
        .with_band(
            BandInfo::new("Amplitude_VV", BandUnit::Amplitude, no_data)
                .with_polarization(Polarization::VV),
            data,
        )
        .unwrap()
}

/// DEM over the scene, `height` everywhere
pub fn plateau_dem(height: f32) -> ArrayDem {
    dem_from(Array2::from_elem((100, 200), height))
}

/// Plateau stepping up 200 m across one DEM cell east of longitude 3.0005, a slope
/// facing the sensor steeper than the incidence angle
pub fn ramp_dem() -> ArrayDem {
    let base = TERRAIN_HEIGHT as f32;
    dem_from(Array2::from_shape_fn((100, 200), |(_, c)| {
        if c <= 100 {
            base
        } else {
            base + 200.0
        }
    }))
}

fn dem_from(data: Array2<f32>) -> ArrayDem {
    let transform = GeoTransform {
        top_left_x: 2.9,
        pixel_width: 0.001,
        rotation_x: 0.0,
        top_left_y: 0.05,
        rotation_y: 0.0,
        pixel_height: -0.001,
    };
    ArrayDem::new(data, transform, -32768.0).unwrap()
}
