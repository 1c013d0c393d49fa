//! Tie-point grids: sub-sampled geolocation of the source image

use crate::types::{GeoPos, SarError, SarResult};
use ndarray::Array2;

/// Sub-sampled grid over the source image, bilinearly interpolated.
///
/// Node `(i, j)` sits at source pixel `(offset_x + i * sub_sampling_x, offset_y + j * sub_sampling_y)`.
/// Positions beyond the outer nodes are linearly extrapolated.
#[derive(Debug, Clone)]
pub struct TiePointGrid {
    offset_x: f64,
    offset_y: f64,
    sub_sampling_x: f64,
    sub_sampling_y: f64,
    data: Array2<f64>,
    /// Values are longitudes and may wrap at the date line
    cyclic: bool,
}

impl TiePointGrid {
    pub fn new(
        offset_x: f64,
        offset_y: f64,
        sub_sampling_x: f64,
        sub_sampling_y: f64,
        data: Array2<f64>,
    ) -> SarResult<Self> {
        let (rows, cols) = data.dim();
        if rows < 2 || cols < 2 {
            return Err(SarError::Configuration(format!(
                "Tie-point grid needs at least 2x2 nodes, got {}x{}",
                cols, rows
            )));
        }
        if !(sub_sampling_x > 0.0 && sub_sampling_y > 0.0) {
            return Err(SarError::Configuration(format!(
                "Invalid tie-point sub-sampling {} x {}",
                sub_sampling_x, sub_sampling_y
            )));
        }
        Ok(Self {
            offset_x,
            offset_y,
            sub_sampling_x,
            sub_sampling_y,
            data,
            cyclic: false,
        })
    }

    /// Longitude grid, interpolated across the date line
    pub fn longitudes(
        offset_x: f64,
        offset_y: f64,
        sub_sampling_x: f64,
        sub_sampling_y: f64,
        data: Array2<f64>,
    ) -> SarResult<Self> {
        let mut grid = Self::new(offset_x, offset_y, sub_sampling_x, sub_sampling_y, data)?;
        grid.cyclic = true;
        Ok(grid)
    }

    pub fn pixel_value(&self, x: f64, y: f64) -> f64 {
        let (rows, cols) = self.data.dim();
        let gx = (x - self.offset_x) / self.sub_sampling_x;
        let gy = (y - self.offset_y) / self.sub_sampling_y;

        let i0 = (gx.floor().max(0.0) as usize).min(cols - 2);
        let j0 = (gy.floor().max(0.0) as usize).min(rows - 2);
        let wx = gx - i0 as f64;
        let wy = gy - j0 as f64;

        let v00 = self.data[[j0, i0]];
        let mut v01 = self.data[[j0, i0 + 1]];
        let mut v10 = self.data[[j0 + 1, i0]];
        let mut v11 = self.data[[j0 + 1, i0 + 1]];
        if self.cyclic {
            v01 = unwrap_longitude(v00, v01);
            v10 = unwrap_longitude(v00, v10);
            v11 = unwrap_longitude(v00, v11);
        }

        let value = v00 * (1.0 - wx) * (1.0 - wy)
            + v01 * wx * (1.0 - wy)
            + v10 * (1.0 - wx) * wy
            + v11 * wx * wy;

        if self.cyclic {
            normalize_longitude(value)
        } else {
            value
        }
    }
}

fn unwrap_longitude(reference: f64, lon: f64) -> f64 {
    if lon - reference > 180.0 {
        lon - 360.0
    } else if reference - lon > 180.0 {
        lon + 360.0
    } else {
        lon
    }
}

fn normalize_longitude(lon: f64) -> f64 {
    if lon >= 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Latitude, longitude and ellipsoid incidence angle grids of a source image
#[derive(Debug, Clone)]
pub struct TiePointGeometry {
    pub latitude: TiePointGrid,
    pub longitude: TiePointGrid,
    pub incidence_angle: TiePointGrid,
}

impl TiePointGeometry {
    pub fn geo_pos(&self, x: f64, y: f64) -> GeoPos {
        GeoPos::new(self.latitude.pixel_value(x, y), self.longitude.pixel_value(x, y))
    }

    /// Incidence angle from the ellipsoid (degrees)
    pub fn incidence_angle(&self, x: f64, y: f64) -> f64 {
        self.incidence_angle.pixel_value(x, y)
    }

    /// Near range is on the left when the incidence angle grows with the range sample
    pub fn is_near_range_on_left(&self, source_width: usize) -> bool {
        let first = self.incidence_angle(0.0, 0.0);
        let last = self.incidence_angle((source_width - 1) as f64, 0.0);
        first < last
    }
}
