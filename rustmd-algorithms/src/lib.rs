//! rustmd-algorithms: Conversion of binned spectra into MD event workspaces.
//!
//! This crate provides:
//! - **Coordinate transforms** - Direct (axes copied through) and Q3D
//!   (momentum transfer in the crystal frame plus energy transfer)
//! - **Orientation matrix** - crystal frame from lattice, goniometer and
//!   reference directions
//! - **Ingestion pipeline** - validated, chunked, parallel conversion with
//!   batched box splitting and cancellation
//!
#![warn(missing_docs)]

mod convert;
mod direct;
pub mod orientation;
mod q3d;
mod transform;
pub mod units;

pub use convert::{
    convert_to_md, ConversionConfig, ConversionReport, ConversionStatus, ConvertToMd,
    ProgressUpdate,
};
pub use direct::DirectTransform;
pub use orientation::transf_matrix;
pub use q3d::Q3dTransform;
pub use transform::{
    build_transform, resolve_extra_dimensions, CoordinateBounds, CoordinateTransform,
    SpectrumStats, SpectrumView, TransformMode, TransformRequest, INCIDENT_ENERGY_PROPERTY,
};
