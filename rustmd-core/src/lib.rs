//! rustmd-core: Core types for multidimensional event workspaces.
//!
//! This crate provides the event types, the adaptive box tree that stores
//! them, the shared splitting policy, the small geometry toolkit used by the
//! momentum-transfer conversion, and the input data model (spectra, detectors,
//! run logs) the conversion reads from.
//!

pub mod box_controller;
pub mod coords;
pub mod dimension;
pub mod error;
pub mod event;
pub mod geometry;
pub mod md_box;
pub mod md_workspace;
pub mod workspace;

pub use box_controller::BoxController;
pub use coords::{Coords, MAX_DIMS};
pub use dimension::MdDimension;
pub use error::{Error, Result};
pub use event::{EventBatch, EventRef, MdEvent};
pub use geometry::{Goniometer, GoniometerAxis, Matrix3, OrientedLattice, V3D};
pub use md_box::{BoxContent, BoxId, MdBox};
pub use md_workspace::{ExperimentInfo, MdEventWorkspace};
pub use workspace::{Detector, Histogram, MatrixWorkspace, Property, Run, Sample, SpectraSource};
