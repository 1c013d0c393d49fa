//! Elevation and geoid models

use crate::types::{GeoTransform, SarError, SarResult};
use ndarray::Array2;

/// Default no-data value of SRTM style elevation models
pub const DEFAULT_DEM_NO_DATA: f64 = -32768.0;

/// Elevation source queried by latitude/longitude.
///
/// `elevation` returns `no_data_value()` where no height is available.
pub trait ElevationModel: Send + Sync {
    fn elevation(&self, lat: f64, lon: f64) -> f64;
    fn no_data_value(&self) -> f64;
}

/// Fallback heights used where the elevation model has no data
pub trait GeoidModel: Send + Sync {
    fn geoid_height(&self, lat: f64, lon: f64) -> f64;
}

/// Geoid approximated by a constant offset from the ellipsoid
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantGeoid(pub f64);

impl GeoidModel for ConstantGeoid {
    fn geoid_height(&self, _lat: f64, _lon: f64) -> f64 {
        self.0
    }
}

/// Constant height everywhere, used for average scene height processing
#[derive(Debug, Clone, Copy)]
pub struct ConstantElevation {
    pub height: f64,
}

impl ElevationModel for ConstantElevation {
    fn elevation(&self, _lat: f64, _lon: f64) -> f64 {
        self.height
    }

    fn no_data_value(&self) -> f64 {
        DEFAULT_DEM_NO_DATA
    }
}

/// In-memory DEM on a north-up lat/lon grid, bilinearly interpolated
#[derive(Debug, Clone)]
pub struct ArrayDem {
    data: Array2<f32>,
    transform: GeoTransform,
    no_data: f32,
}

impl ArrayDem {
    /// `transform` follows the GDAL convention: pixel (0, 0) covers
    /// `[top_left_x, top_left_x + pixel_width]` and `pixel_height` is negative.
    pub fn new(data: Array2<f32>, transform: GeoTransform, no_data: f32) -> SarResult<Self> {
        if data.is_empty() {
            return Err(SarError::Configuration("DEM array is empty".to_string()));
        }
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(SarError::Configuration(format!(
                "Invalid DEM pixel size: {} x {}",
                transform.pixel_width, transform.pixel_height
            )));
        }
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            return Err(SarError::Configuration(
                "Rotated DEM grids are not supported".to_string(),
            ));
        }
        log::debug!(
            "DEM grid {}x{} at ({:.4}, {:.4})",
            data.ncols(),
            data.nrows(),
            transform.top_left_y,
            transform.top_left_x
        );
        Ok(Self {
            data,
            transform,
            no_data,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }
}

impl ElevationModel for ArrayDem {
    fn elevation(&self, lat: f64, lon: f64) -> f64 {
        let nodata = self.no_data as f64;

        // Pixel centre coordinates
        let x = (lon - self.transform.top_left_x) / self.transform.pixel_width - 0.5;
        let y = (lat - self.transform.top_left_y) / self.transform.pixel_height - 0.5;
        let (rows, cols) = self.data.dim();
        if !(x >= -0.5 && y >= -0.5 && x <= cols as f64 - 0.5 && y <= rows as f64 - 0.5) {
            return nodata;
        }
        // Half a pixel around the border is held at the edge value
        let x = x.clamp(0.0, (cols - 1) as f64);
        let y = y.clamp(0.0, (rows - 1) as f64);

        let x1 = x.floor() as usize;
        let y1 = y.floor() as usize;
        let x2 = (x1 + 1).min(cols - 1);
        let y2 = (y1 + 1).min(rows - 1);
        let dx = x - x1 as f64;
        let dy = y - y1 as f64;

        let v11 = self.data[[y1, x1]];
        let v12 = self.data[[y2, x1]];
        let v21 = self.data[[y1, x2]];
        let v22 = self.data[[y2, x2]];
        if [v11, v12, v21, v22]
            .iter()
            .any(|&v| v == self.no_data || v.is_nan())
        {
            return nodata;
        }

        v11 as f64 * (1.0 - dx) * (1.0 - dy)
            + v21 as f64 * dx * (1.0 - dy)
            + v12 as f64 * (1.0 - dx) * dy
            + v22 as f64 * dx * dy
    }

    fn no_data_value(&self) -> f64 {
        self.no_data as f64
    }
}
