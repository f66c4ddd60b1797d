//! Coordinate transforms: one binned spectrum in, MD events out.
//!
//! Every mode implements [`CoordinateTransform`]. A transform is resolved
//! once per conversion by [`build_transform`], which performs all the
//! validation that can fail, so converting a spectrum itself never errors:
//! bins are either emitted, skipped (signal at or below
//! [`SIGNAL_EPSILON`]) or dropped (coordinates outside the target bounds).

use std::fmt;
use std::ops::AddAssign;

use rustmd_core::geometry::V3D;
use rustmd_core::{
    Coords, Detector, Error, EventBatch, Histogram, MdDimension, Result, Run, SpectraSource,
    MAX_DIMS,
};

use crate::direct::DirectTransform;
use crate::orientation::transf_matrix;
use crate::q3d::Q3dTransform;
use crate::units::SIGNAL_EPSILON;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Name of the run property holding the incident energy (meV).
pub const INCIDENT_ENERGY_PROPERTY: &str = "Ei";

/// Conversion mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransformMode {
    /// Bin centre and vertical axis copied through unchanged.
    #[default]
    Direct,
    /// Momentum-transfer magnitude. Not available yet.
    ModQ,
    /// Three momentum-transfer components plus energy transfer.
    Q3D,
}

impl TransformMode {
    /// Short mode name used in messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TransformMode::Direct => "direct",
            TransformMode::ModQ => "modq",
            TransformMode::Q3D => "q3d",
        }
    }

    /// Number of coordinates the mode computes itself, before any extra
    /// dimensions taken from run properties.
    #[must_use]
    pub fn base_dims(self) -> usize {
        match self {
            TransformMode::Direct | TransformMode::ModQ => 2,
            TransformMode::Q3D => 4,
        }
    }
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One spectrum together with the detector that recorded it.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumView<'a> {
    /// Binned counts.
    pub histogram: &'a Histogram,
    /// Recording detector.
    pub detector: &'a Detector,
    /// Vertical axis value of the spectrum, if the dataset has one.
    pub vertical_axis: Option<f64>,
}

impl<'a> SpectrumView<'a> {
    /// Borrows spectrum `index` from a source.
    #[must_use]
    pub fn from_source<S: SpectraSource + ?Sized>(source: &'a S, index: usize) -> Self {
        Self {
            histogram: source.histogram(index),
            detector: source.detector(index),
            vertical_axis: source.vertical_axis_value(index),
        }
    }
}

/// Per-spectrum bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpectrumStats {
    /// Events appended to the output batch.
    pub events_emitted: usize,
    /// Bins with negligible signal.
    pub bins_skipped: usize,
    /// Events whose coordinates fell outside the target bounds.
    pub events_dropped: usize,
}

impl AddAssign for SpectrumStats {
    fn add_assign(&mut self, rhs: Self) {
        self.events_emitted += rhs.events_emitted;
        self.bins_skipped += rhs.bins_skipped;
        self.events_dropped += rhs.events_dropped;
    }
}

/// Half-open bounds `[min, max)` of the target dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateBounds {
    min: Coords,
    max: Coords,
}

impl CoordinateBounds {
    /// Collects the bounds of validated dimensions.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an empty or oversized list or
    /// degenerate bounds.
    pub fn from_dimensions(dimensions: &[MdDimension]) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one target dimension is required".to_string(),
            ));
        }
        let mut min = Coords::zeros(dimensions.len())?;
        let mut max = min;
        for (d, dim) in dimensions.iter().enumerate() {
            dim.validate()?;
            min[d] = dim.min;
            max[d] = dim.max;
        }
        Ok(Self { min, max })
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndims(&self) -> usize {
        self.min.ndims()
    }

    /// Lower bounds.
    #[must_use]
    pub fn min(&self) -> &[f64] {
        &self.min
    }

    /// Upper bounds (exclusive).
    #[must_use]
    pub fn max(&self) -> &[f64] {
        &self.max
    }

    /// True if every coordinate lies in its `[min, max)`. `NaN` never does.
    #[inline]
    #[must_use]
    pub fn contains(&self, coords: &[f64]) -> bool {
        coords
            .iter()
            .zip(self.min.iter().zip(self.max.iter()))
            .all(|(&x, (&lo, &hi))| x >= lo && x < hi)
    }
}

/// Maps one spectrum to MD events.
pub trait CoordinateTransform: Send + Sync {
    /// Mode name.
    fn name(&self) -> &'static str;

    /// Number of coordinates per event.
    fn ndims(&self) -> usize;

    /// Incident energy used by the transform, if it needs one.
    fn incident_energy(&self) -> Option<f64> {
        None
    }

    /// Appends the events of one spectrum to `out`.
    fn convert_spectrum(
        &self,
        spectrum: &SpectrumView<'_>,
        run_index: u16,
        out: &mut EventBatch,
    ) -> SpectrumStats;
}

/// Walks the bins of a spectrum and emits the in-bounds events.
///
/// `fill` receives the bin centre and writes the coordinates; returning
/// `false` marks the bin as physically impossible and drops it.
pub(crate) fn emit_bins<F>(
    spectrum: &SpectrumView<'_>,
    bounds: &CoordinateBounds,
    run_index: u16,
    out: &mut EventBatch,
    mut fill: F,
) -> SpectrumStats
where
    F: FnMut(f64, &mut [f64]) -> bool,
{
    let hist = spectrum.histogram;
    let mut stats = SpectrumStats::default();
    let mut coords = bounds.min;
    for j in 0..hist.bins() {
        let signal = hist.y[j];
        if signal.is_nan() || signal <= SIGNAL_EPSILON {
            stats.bins_skipped += 1;
            continue;
        }
        if fill(hist.bin_center(j), &mut coords) && bounds.contains(&coords) {
            let error = hist.e[j];
            out.push_raw(&coords, signal, error * error, run_index, spectrum.detector.id);
            stats.events_emitted += 1;
        } else {
            stats.events_dropped += 1;
        }
    }
    stats
}

/// First values of the named time-series properties, in order.
///
/// # Errors
/// Returns [`Error::ConfigurationError`] if the number of names differs from
/// `expected` or a property is absent or not a numeric time series.
pub fn resolve_extra_dimensions(run: &Run, names: &[String], expected: usize) -> Result<Vec<f64>> {
    if names.len() != expected {
        return Err(Error::ConfigurationError(format!(
            "{expected} extra dimensions need property names, got {}",
            names.len()
        )));
    }
    names
        .iter()
        .map(|name| run.first_time_series_value(name))
        .collect()
}

/// Everything a transform needs besides the spectra.
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    /// Conversion mode.
    pub mode: TransformMode,
    /// Target dimensions.
    pub dimensions: &'a [MdDimension],
    /// Run properties feeding the dimensions beyond the mode's own.
    pub other_dimensions: &'a [String],
    /// Fallback incident energy when the run has no `Ei` property.
    pub incident_energy: Option<f64>,
    /// First crystal reference direction.
    pub u: V3D,
    /// Second crystal reference direction.
    pub v: V3D,
}

/// Resolves the transform for a conversion, validating everything up front.
///
/// # Errors
/// - [`Error::NotImplemented`] for [`TransformMode::ModQ`]
/// - [`Error::UnsupportedDimension`] if the mode cannot fill the dimensions
/// - [`Error::ConfigurationError`] for missing vertical axis or extra properties
/// - [`Error::MissingProperty`] for a missing incident energy or lattice
/// - [`Error::InvalidArgument`] for bad bounds, reference directions or an
///   incident energy below an energy transfer present in the data
pub fn build_transform<S: SpectraSource + ?Sized>(
    request: &TransformRequest<'_>,
    source: &S,
) -> Result<Box<dyn CoordinateTransform>> {
    let mode = request.mode;
    if mode == TransformMode::ModQ {
        return Err(modq_not_implemented());
    }

    let ndims = request.dimensions.len();
    if ndims < mode.base_dims() || ndims > MAX_DIMS {
        return Err(Error::UnsupportedDimension {
            mode: mode.name(),
            ndims,
        });
    }
    let bounds = CoordinateBounds::from_dimensions(request.dimensions)?;
    let extras = resolve_extra_dimensions(
        source.run(),
        request.other_dimensions,
        ndims - mode.base_dims(),
    )?;

    match mode {
        TransformMode::Direct => {
            if let Some(index) =
                (0..source.num_spectra()).find(|&i| source.vertical_axis_value(i).is_none())
            {
                return Err(Error::ConfigurationError(format!(
                    "direct conversion needs a numeric vertical axis, spectrum {index} has none"
                )));
            }
            Ok(Box::new(DirectTransform::new(bounds, extras)?))
        }
        TransformMode::Q3D => {
            let incident_energy = source
                .run()
                .scalar(INCIDENT_ENERGY_PROPERTY)
                .ok()
                .or(request.incident_energy)
                .ok_or_else(|| Error::MissingProperty(INCIDENT_ENERGY_PROPERTY.to_string()))?;
            let lattice = source
                .sample()
                .lattice
                .as_ref()
                .ok_or_else(|| Error::MissingProperty("oriented lattice".to_string()))?;
            let orientation =
                transf_matrix(lattice, &source.run().goniometer, request.u, request.v)?;
            let transform = Q3dTransform::new(bounds, extras, orientation, incident_energy)?;
            transform.check_energy_range(source)?;
            Ok(Box::new(transform))
        }
        TransformMode::ModQ => Err(modq_not_implemented()),
    }
}

fn modq_not_implemented() -> Error {
    Error::NotImplemented("|Q| conversion is not available, use direct or q3d".to_string())
}
