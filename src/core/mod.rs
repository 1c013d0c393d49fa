//! Core geocoding modules

pub mod calibrate;
pub mod doppler;
pub mod geodesy;
pub mod geolocation;
pub mod incidence;
pub mod orbit;
pub mod range;
pub mod resampling;
pub mod simulation;
pub mod terrain_correction;

// Re-export main types
pub use calibrate::{CalibrationContext, Calibrator, IdentityCalibrator};
pub use doppler::ZeroDopplerSolver;
pub use geolocation::Geolocator;
pub use incidence::{IncidenceAngles, LocalGeometry};
pub use orbit::{EphemerisTable, OrbitInterpolator, SensorState};
pub use range::{RangeGeometry, RangeIndexMapper};
pub use resampling::{ResamplingMethod, ResamplingWindow, WindowRect};
pub use simulation::{SarSimulator, SimulatedImage, SimulationConfig, TileMargin};
pub use terrain_correction::{
    CellResult, CellState, GeocodedImage, OutputBand, TargetBand, TargetCell, TargetGrid,
    TerrainCorrectionConfig, TerrainCorrector,
};
