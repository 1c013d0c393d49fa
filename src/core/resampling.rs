//! Interpolation kernels used to read source samples at fractional positions.
//!
//! Coordinates are pixel indices: sample `(i, j)` sits exactly at `x = i, y = j`.
//! A [`ResamplingWindow`] holds the samples around the requested position together
//! with their absolute origin, so kernels address samples by absolute index.

use crate::io::raster::SourceRaster;
use crate::types::SarError;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const BISINC_HALF_WIDTH: f64 = 3.0;
const CUBIC_CONVOLUTION_A: f64 = -0.5;

/// Image resampling kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResamplingMethod {
    NearestNeighbour,
    Bilinear,
    CubicConvolution,
    Bicubic,
    BiSinc,
}

impl Default for ResamplingMethod {
    fn default() -> Self {
        ResamplingMethod::Bilinear
    }
}

impl std::str::FromStr for ResamplingMethod {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace(['-', ' '], "_").as_str() {
            "NEAREST_NEIGHBOUR" | "NEAREST_NEIGHBOR" | "NEAREST" => Ok(ResamplingMethod::NearestNeighbour),
            "BILINEAR_INTERPOLATION" | "BILINEAR" => Ok(ResamplingMethod::Bilinear),
            "CUBIC_CONVOLUTION" => Ok(ResamplingMethod::CubicConvolution),
            "BICUBIC_INTERPOLATION" | "BICUBIC" => Ok(ResamplingMethod::Bicubic),
            "BISINC_INTERPOLATION" | "BISINC" => Ok(ResamplingMethod::BiSinc),
            _ => Err(SarError::UnknownResampling(s.to_string())),
        }
    }
}

impl std::fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResamplingMethod::NearestNeighbour => "NEAREST_NEIGHBOUR",
            ResamplingMethod::Bilinear => "BILINEAR_INTERPOLATION",
            ResamplingMethod::CubicConvolution => "CUBIC_CONVOLUTION",
            ResamplingMethod::Bicubic => "BICUBIC_INTERPOLATION",
            ResamplingMethod::BiSinc => "BISINC_INTERPOLATION",
        };
        write!(f, "{}", name)
    }
}

/// Source rectangle `(x0, y0, width, height)`, origin may be negative near the border
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRect {
    pub x0: i64,
    pub y0: i64,
    pub width: usize,
    pub height: usize,
}

impl ResamplingMethod {
    /// Side length of the square sample window the kernel reads
    pub fn window_size(&self) -> usize {
        match self {
            ResamplingMethod::NearestNeighbour => 1,
            ResamplingMethod::Bilinear => 3,
            ResamplingMethod::CubicConvolution | ResamplingMethod::Bicubic => 5,
            ResamplingMethod::BiSinc => 6,
        }
    }

    /// Window covering every tap needed at `(x, y)`
    pub fn window_rect(&self, x: f64, y: f64) -> WindowRect {
        let size = self.window_size();
        let (x0, y0) = match self {
            ResamplingMethod::BiSinc => (x.floor() as i64 - 2, y.floor() as i64 - 2),
            _ => {
                let half = (size / 2) as i64;
                (x.round() as i64 - half, y.round() as i64 - half)
            }
        };
        WindowRect {
            x0,
            y0,
            width: size,
            height: size,
        }
    }

    /// Interpolated value at `(x, y)`, `None` when the nearest sample is missing
    pub fn resample(
        &self,
        window: &ResamplingWindow,
        x: f64,
        y: f64,
        src_width: usize,
        src_height: usize,
    ) -> Option<f64> {
        let taps = Taps {
            window,
            max_x: src_width as i64 - 1,
            max_y: src_height as i64 - 1,
        };
        let nearest = taps.get(x.round() as i64, y.round() as i64)?;

        let value = match self {
            ResamplingMethod::NearestNeighbour => Some(nearest),
            ResamplingMethod::Bilinear => bilinear(&taps, x, y),
            ResamplingMethod::CubicConvolution => cubic_convolution(&taps, x, y),
            ResamplingMethod::Bicubic => bicubic(&taps, x, y),
            ResamplingMethod::BiSinc => bisinc(&taps, x, y),
        };
        Some(value.unwrap_or(nearest))
    }
}

/// Samples of a source sub-window; missing samples are stored as NaN
#[derive(Debug, Clone)]
pub struct ResamplingWindow {
    x0: i64,
    y0: i64,
    samples: Array2<f64>,
}

impl ResamplingWindow {
    /// Wrap samples (`[row, col]`) whose first element sits at `(x0, y0)`
    pub fn new(x0: i64, y0: i64, samples: Array2<f64>) -> Self {
        Self { x0, y0, samples }
    }

    /// Read a window from a raster band; samples equal to `no_data` become missing.
    ///
    /// With a `quadrature` band the I/Q pair is combined into intensity `I^2 + Q^2`.
    pub fn from_raster(
        raster: &dyn SourceRaster,
        band: usize,
        quadrature: Option<usize>,
        rect: WindowRect,
        no_data: f64,
    ) -> Self {
        let width = raster.width() as i64;
        let height = raster.height() as i64;
        let samples = Array2::from_shape_fn((rect.height, rect.width), |(r, c)| {
            let x = rect.x0 + c as i64;
            let y = rect.y0 + r as i64;
            if x < 0 || y < 0 || x >= width || y >= height {
                return f64::NAN;
            }
            let (x, y) = (x as usize, y as usize);
            let i = raster.sample(band, x, y);
            match quadrature {
                Some(q_band) => {
                    let q = raster.sample(q_band, x, y);
                    if (i == no_data && q == no_data) || i.is_nan() || q.is_nan() {
                        f64::NAN
                    } else {
                        i * i + q * q
                    }
                }
                None => {
                    if i == no_data {
                        f64::NAN
                    } else {
                        i
                    }
                }
            }
        });
        Self::new(rect.x0, rect.y0, samples)
    }

    /// Sample at absolute position, `None` if missing or outside the window
    pub fn get(&self, x: i64, y: i64) -> Option<f64> {
        let c = x - self.x0;
        let r = y - self.y0;
        if c < 0 || r < 0 {
            return None;
        }
        let v = *self.samples.get((r as usize, c as usize))?;
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }
}

/// Window accessor cropping tap indices to the source image
struct Taps<'a> {
    window: &'a ResamplingWindow,
    max_x: i64,
    max_y: i64,
}

impl Taps<'_> {
    fn get(&self, x: i64, y: i64) -> Option<f64> {
        self.window
            .get(x.clamp(0, self.max_x), y.clamp(0, self.max_y))
    }

    /// `N x N` block of taps starting at `(x0, y0)`, `None` if any is missing
    fn block<const N: usize>(&self, x0: i64, y0: i64) -> Option<[[f64; N]; N]> {
        let mut out = [[0.0; N]; N];
        for (j, row) in out.iter_mut().enumerate() {
            for (i, v) in row.iter_mut().enumerate() {
                *v = self.get(x0 + i as i64, y0 + j as i64)?;
            }
        }
        Some(out)
    }
}

fn bilinear(taps: &Taps, x: f64, y: f64) -> Option<f64> {
    let x0 = x.floor();
    let y0 = y.floor();
    let wx = x - x0;
    let wy = y - y0;
    let v = taps.block::<2>(x0 as i64, y0 as i64)?;

    Some(
        v[0][0] * (1.0 - wx) * (1.0 - wy)
            + v[0][1] * wx * (1.0 - wy)
            + v[1][0] * (1.0 - wx) * wy
            + v[1][1] * wx * wy,
    )
}

fn keys_weight(s: f64) -> f64 {
    let a = CUBIC_CONVOLUTION_A;
    let s = s.abs();
    if s <= 1.0 {
        (a + 2.0) * s * s * s - (a + 3.0) * s * s + 1.0
    } else if s < 2.0 {
        a * s * s * s - 5.0 * a * s * s + 8.0 * a * s - 4.0 * a
    } else {
        0.0
    }
}

fn cubic_convolution(taps: &Taps, x: f64, y: f64) -> Option<f64> {
    let x0 = x.floor();
    let y0 = y.floor();
    let v = taps.block::<4>(x0 as i64 - 1, y0 as i64 - 1)?;

    let wx: [f64; 4] = std::array::from_fn(|i| keys_weight(x - (x0 + i as f64 - 1.0)));
    let wy: [f64; 4] = std::array::from_fn(|j| keys_weight(y - (y0 + j as f64 - 1.0)));

    let mut sum = 0.0;
    for j in 0..4 {
        for i in 0..4 {
            sum += wy[j] * wx[i] * v[j][i];
        }
    }
    Some(sum)
}

/// Hermite patch over the unit cell using finite-difference derivatives
fn bicubic(taps: &Taps, x: f64, y: f64) -> Option<f64> {
    let x0 = x.floor();
    let y0 = y.floor();
    let v = taps.block::<4>(x0 as i64 - 1, y0 as i64 - 1)?;

    // Corner (c, r) of the cell maps to v[r + 1][c + 1]
    let f = |c: usize, r: usize| v[r + 1][c + 1];
    let fx = |c: usize, r: usize| (v[r + 1][c + 2] - v[r + 1][c]) / 2.0;
    let fy = |c: usize, r: usize| (v[r + 2][c + 1] - v[r][c + 1]) / 2.0;
    let fxy = |c: usize, r: usize| (v[r + 2][c + 2] - v[r + 2][c] - v[r][c + 2] + v[r][c]) / 4.0;

    let corners = [(0, 0), (1, 0), (0, 1), (1, 1)];
    let mut known = [0.0; 16];
    for (k, &(c, r)) in corners.iter().enumerate() {
        known[k] = f(c, r);
        known[4 + k] = fx(c, r);
        known[8 + k] = fy(c, r);
        known[12 + k] = fxy(c, r);
    }

    let mut coeffs = [0.0; 16];
    for (i, row) in BICUBIC_INVERSE.iter().enumerate() {
        coeffs[i] = row.iter().zip(known.iter()).map(|(a, b)| *a as f64 * b).sum();
    }

    let tx = x - x0;
    let ty = y - y0;
    let mut sum = 0.0;
    let mut ypow = 1.0;
    for j in 0..4 {
        let mut xpow = 1.0;
        for i in 0..4 {
            sum += coeffs[j * 4 + i] * xpow * ypow;
            xpow *= tx;
        }
        ypow *= ty;
    }
    Some(sum)
}

/// Maps [f, fx, fy, fxy] at the four corners to patch coefficients a[j*4 + i] of x^i y^j
const BICUBIC_INVERSE: [[i8; 16]; 16] = [
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [-3, 3, 0, 0, -2, -1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, -2, 0, 0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, -3, 3, 0, 0, -2, -1, 0, 0],
    [0, 0, 0, 0, 0, 0, 0, 0, 2, -2, 0, 0, 1, 1, 0, 0],
    [-3, 0, 3, 0, 0, 0, 0, 0, -2, 0, -1, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, -3, 0, 3, 0, 0, 0, 0, 0, -2, 0, -1, 0],
    [9, -9, -9, 9, 6, 3, -6, -3, 6, -6, 3, -3, 4, 2, 2, 1],
    [-6, 6, 6, -6, -3, -3, 3, 3, -4, 4, -2, 2, -2, -2, -1, -1],
    [2, 0, -2, 0, 0, 0, 0, 0, 1, 0, 1, 0, 0, 0, 0, 0],
    [0, 0, 0, 0, 2, 0, -2, 0, 0, 0, 0, 0, 1, 0, 1, 0],
    [-6, 6, 6, -6, -4, -2, 4, 2, -3, 3, -3, 3, -2, -1, -2, -1],
    [4, -4, -4, 4, 2, 2, -2, -2, 2, -2, 2, -2, 1, 1, 1, 1],
];

fn windowed_sinc(t: f64) -> f64 {
    if t.abs() >= BISINC_HALF_WIDTH {
        return 0.0;
    }
    let sinc = if t == 0.0 {
        1.0
    } else {
        (PI * t).sin() / (PI * t)
    };
    let hann = 0.5 * (1.0 + (PI * t / BISINC_HALF_WIDTH).cos());
    sinc * hann
}

fn bisinc(taps: &Taps, x: f64, y: f64) -> Option<f64> {
    let x0 = x.floor();
    let y0 = y.floor();
    let v = taps.block::<6>(x0 as i64 - 2, y0 as i64 - 2)?;

    let wx: [f64; 6] = std::array::from_fn(|i| windowed_sinc(x - (x0 + i as f64 - 2.0)));
    let wy: [f64; 6] = std::array::from_fn(|j| windowed_sinc(y - (y0 + j as f64 - 2.0)));

    let mut sum = 0.0;
    let mut weight = 0.0;
    for j in 0..6 {
        for i in 0..6 {
            let w = wy[j] * wx[i];
            sum += w * v[j][i];
            weight += w;
        }
    }
    if weight == 0.0 {
        return None;
    }
    Some(sum / weight)
}
