//! Source rasters in radar geometry

use crate::types::{BandUnit, Polarization, SarError, SarImage, SarResult};
use ndarray::Array2;
use num_traits::AsPrimitive;

/// Description of one source band
#[derive(Debug, Clone, PartialEq)]
pub struct BandInfo {
    pub name: String,
    pub unit: BandUnit,
    pub no_data_value: f64,
    pub polarization: Option<Polarization>,
}

impl BandInfo {
    pub fn new(name: &str, unit: BandUnit, no_data_value: f64) -> Self {
        Self {
            name: name.to_string(),
            unit,
            no_data_value,
            polarization: None,
        }
    }

    pub fn with_polarization(mut self, polarization: Polarization) -> Self {
        self.polarization = Some(polarization);
        self
    }
}

/// Read access to source imagery in radar geometry
pub trait SourceRaster: Send + Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn bands(&self) -> &[BandInfo];
    /// Sample of `band` at range sample `x`, azimuth line `y`
    fn sample(&self, band: usize, x: usize, y: usize) -> f64;
}

/// Multi-band raster over any numeric sample type
#[derive(Debug, Clone)]
pub struct ArrayRaster<T> {
    width: usize,
    height: usize,
    infos: Vec<BandInfo>,
    data: Vec<Array2<T>>,
}

impl<T> ArrayRaster<T>
where
    T: AsPrimitive<f64> + Send + Sync,
{
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            infos: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Add a band stored as `[azimuth, range]`
    pub fn add_band(&mut self, info: BandInfo, data: Array2<T>) -> SarResult<()> {
        if data.dim() != (self.height, self.width) {
            return Err(SarError::Configuration(format!(
                "Band {} has shape {:?}, expected ({}, {})",
                info.name,
                data.dim(),
                self.height,
                self.width
            )));
        }
        self.infos.push(info);
        self.data.push(data);
        Ok(())
    }

    pub fn with_band(mut self, info: BandInfo, data: Array2<T>) -> SarResult<Self> {
        self.add_band(info, data)?;
        Ok(self)
    }
}

impl<T> SourceRaster for ArrayRaster<T>
where
    T: AsPrimitive<f64> + Send + Sync,
{
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn bands(&self) -> &[BandInfo] {
        &self.infos
    }

    fn sample(&self, band: usize, x: usize, y: usize) -> f64 {
        self.data[band][[y, x]].as_()
    }
}

/// Single-look complex image exposed as an I/Q band pair
#[derive(Debug, Clone)]
pub struct ComplexRaster {
    data: SarImage,
    infos: [BandInfo; 2],
}

impl ComplexRaster {
    pub fn new(data: SarImage, polarization: Option<Polarization>, no_data_value: f64) -> Self {
        let suffix = polarization.map(|p| format!("_{}", p)).unwrap_or_default();
        let mut i_band = BandInfo::new(&format!("i{}", suffix), BandUnit::Real, no_data_value);
        let mut q_band = BandInfo::new(&format!("q{}", suffix), BandUnit::Imaginary, no_data_value);
        i_band.polarization = polarization;
        q_band.polarization = polarization;
        Self {
            data,
            infos: [i_band, q_band],
        }
    }
}

impl SourceRaster for ComplexRaster {
    fn width(&self) -> usize {
        self.data.ncols()
    }

    fn height(&self) -> usize {
        self.data.nrows()
    }

    fn bands(&self) -> &[BandInfo] {
        &self.infos
    }

    fn sample(&self, band: usize, x: usize, y: usize) -> f64 {
        let v = self.data[[y, x]];
        if band == 0 {
            v.re as f64
        } else {
            v.im as f64
        }
    }
}
