//! Direct mode: spectrum axes copied into MD coordinates.
//!
//! Coordinate 0 is the bin centre, coordinate 1 the spectrum's vertical axis
//! value, and any further coordinates are constants taken from run logs.

use rustmd_core::{Error, EventBatch, Result};

use crate::transform::{emit_bins, CoordinateBounds, CoordinateTransform, SpectrumStats, SpectrumView};

/// Direct (no momentum transfer) transform.
#[derive(Debug, Clone)]
pub struct DirectTransform {
    bounds: CoordinateBounds,
    extras: Vec<f64>,
}

impl DirectTransform {
    /// Creates the transform.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDimension`] for fewer than two dimensions and
    /// [`Error::ConfigurationError`] if `extras` does not fill the rest.
    pub fn new(bounds: CoordinateBounds, extras: Vec<f64>) -> Result<Self> {
        let ndims = bounds.ndims();
        if ndims < 2 {
            return Err(Error::UnsupportedDimension {
                mode: "direct",
                ndims,
            });
        }
        if extras.len() != ndims - 2 {
            return Err(Error::ConfigurationError(format!(
                "direct conversion to {ndims} dimensions needs {} extra values, got {}",
                ndims - 2,
                extras.len()
            )));
        }
        Ok(Self { bounds, extras })
    }
}

impl CoordinateTransform for DirectTransform {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn ndims(&self) -> usize {
        self.bounds.ndims()
    }

    fn convert_spectrum(
        &self,
        spectrum: &SpectrumView<'_>,
        run_index: u16,
        out: &mut EventBatch,
    ) -> SpectrumStats {
        let vertical = spectrum.vertical_axis.unwrap_or(f64::NAN);
        emit_bins(spectrum, &self.bounds, run_index, out, |center, coords| {
            coords[0] = center;
            coords[1] = vertical;
            coords[2..].copy_from_slice(&self.extras);
            true
        })
    }
}
