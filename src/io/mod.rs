//! Collaborators of the geocoding core: elevation, rasters, metadata and tie points

pub mod dem;
pub mod metadata;
pub mod raster;
pub mod tie_point;

pub use dem::{ArrayDem, ConstantElevation, ConstantGeoid, ElevationModel, GeoidModel};
pub use metadata::SarMetadata;
pub use raster::{ArrayRaster, BandInfo, ComplexRaster, SourceRaster};
pub use tie_point::{TiePointGeometry, TiePointGrid};
