//! sargeo: Range-Doppler geocoding of SAR imagery
//!
//! Terrain corrects radar-geometry images onto a lat/lon grid using precise
//! orbits and a DEM, simulates SAR images from a DEM, and geolocates radar
//! pixels on the ground.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandUnit, GeoPos, OrbitStateVector, Polarization, SarError, SarImage, SarRealImage,
    SarResult, SrgrCoefficients, Vector3,
};

pub use crate::core::{
    Calibrator, Geolocator, ResamplingMethod, SarSimulator, SimulationConfig,
    TerrainCorrectionConfig, TerrainCorrector,
};
pub use io::{ArrayDem, ArrayRaster, ComplexRaster, ElevationModel, SarMetadata, SourceRaster};
