use chrono::{DateTime, Utc};
use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// Complex-valued SAR data type (I + jQ)
pub type SarComplex = Complex<f32>;

/// Real-valued intensity or amplitude data
pub type SarReal = f32;

/// 2D complex SAR data array (azimuth x range)
pub type SarImage = Array2<SarComplex>;

/// 2D real SAR data array (azimuth x range)
pub type SarRealImage = Array2<SarReal>;

/// Speed of light in vacuum (m/s)
pub const LIGHT_SPEED: f64 = 299_792_458.0;

/// Seconds per day, used for MJD <-> seconds conversions
pub const SECONDS_IN_DAY: f64 = 86_400.0;

/// Distance travelled by light in one day (m)
pub const LIGHT_SPEED_IN_METERS_PER_DAY: f64 = LIGHT_SPEED * SECONDS_IN_DAY;

/// Degrees to radians
pub const DTOR: f64 = std::f64::consts::PI / 180.0;

/// Radians to degrees
pub const RTOD: f64 = 180.0 / std::f64::consts::PI;

/// MJD of the unix epoch (1970-01-01T00:00:00Z)
const MJD_UNIX_EPOCH: f64 = 40_587.0;

/// WGS84 reference ellipsoid
pub mod wgs84 {
    /// Semi-major axis (m)
    pub const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
    /// Inverse flattening
    pub const INVERSE_FLATTENING: f64 = 298.257_223_563;
    /// Semi-minor axis (m)
    pub const SEMI_MINOR_AXIS: f64 = 6_356_752.314_245_179;
    /// First eccentricity squared
    pub const E2: f64 = 0.006_694_379_990_14;
}

/// Earth-fixed Cartesian vector (m)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn dot(&self, other: &Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(&self, other: &Vector3) -> f64 {
        (*self - *other).norm()
    }

    /// Unit vector in the same direction; the zero vector is returned unchanged
    pub fn normalized(&self) -> Vector3 {
        let n = self.norm();
        if n > 0.0 {
            *self * (1.0 / n)
        } else {
            *self
        }
    }
}

impl Add for Vector3 {
    type Output = Vector3;
    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;
    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Vector3;
    fn mul(self, rhs: f64) -> Vector3 {
        Vector3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;
    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}

/// Geodetic position on the WGS84 ellipsoid (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite() && self.lat.abs() <= 90.0
    }
}

/// Polarization channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::Metadata(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Physical unit of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandUnit {
    Amplitude,
    Intensity,
    IntensityDb,
    /// In-phase component of a complex pair
    Real,
    /// Quadrature component of a complex pair
    Imaginary,
    Phase,
    Meters,
    Degrees,
    /// Bit flags, e.g. the layover/shadow mask
    Bit,
}

/// Orbit state vector, time in Modified Julian Date (days)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitStateVector {
    pub time_mjd: f64,
    pub position: Vector3, // [x, y, z] in meters
    pub velocity: Vector3, // [vx, vy, vz] in m/s
}

impl OrbitStateVector {
    pub fn new(time_mjd: f64, position: [f64; 3], velocity: [f64; 3]) -> Self {
        Self {
            time_mjd,
            position: Vector3::from_array(position),
            velocity: Vector3::from_array(velocity),
        }
    }

    /// Build from a UTC timestamp as found in orbit files and annotations
    pub fn from_utc(time: DateTime<Utc>, position: [f64; 3], velocity: [f64; 3]) -> Self {
        Self::new(utc_to_mjd(time), position, velocity)
    }
}

/// Convert a UTC timestamp to Modified Julian Date
pub fn utc_to_mjd(time: DateTime<Utc>) -> f64 {
    let seconds = time.timestamp() as f64 + time.timestamp_subsec_nanos() as f64 * 1e-9;
    seconds / SECONDS_IN_DAY + MJD_UNIX_EPOCH
}

/// Slant-range to ground-range conversion polynomial valid from `time_mjd`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrgrCoefficients {
    pub time_mjd: f64,
    /// Ground range origin (m)
    pub ground_range_origin: f64,
    /// Slant range = c0 + c1*x + c2*x^2 + ... with x the ground range in meters
    pub coefficients: Vec<f64>,
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Error types for SAR geocoding
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown resampling method: {0}")]
    UnknownResampling(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Geolocation error: {0}")]
    Geolocation(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;
