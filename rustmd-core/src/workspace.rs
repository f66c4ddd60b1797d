//! Input data model: per-detector spectra with run and sample metadata.
//!
//! Everything here is what the conversion consumes. The [`SpectraSource`]
//! trait is the seam the pipeline reads through; [`MatrixWorkspace`] is the
//! in-memory implementation used by the CLI and the tests.

use std::collections::BTreeMap;

use crate::geometry::{Goniometer, OrientedLattice, V3D};
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One binned spectrum.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Histogram {
    /// Bin edges (`len = bins + 1`).
    pub x: Vec<f64>,
    /// Signal per bin.
    pub y: Vec<f64>,
    /// Standard deviation per bin.
    pub e: Vec<f64>,
}

impl Histogram {
    /// Creates a histogram, checking array lengths.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `x.len() != y.len() + 1` or `e.len() != y.len()`.
    pub fn new(x: Vec<f64>, y: Vec<f64>, e: Vec<f64>) -> Result<Self> {
        let hist = Self { x, y, e };
        hist.validate()?;
        Ok(hist)
    }

    /// Checks the array lengths.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] on mismatched lengths.
    pub fn validate(&self) -> Result<()> {
        if self.x.len() != self.y.len() + 1 || self.e.len() != self.y.len() {
            return Err(Error::InvalidArgument(format!(
                "histogram needs bins+1 edges: x={}, y={}, e={}",
                self.x.len(),
                self.y.len(),
                self.e.len()
            )));
        }
        Ok(())
    }

    /// Number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.y.len()
    }

    /// Centre of bin `j`.
    #[inline]
    #[must_use]
    pub fn bin_center(&self, j: usize) -> f64 {
        0.5 * (self.x[j] + self.x[j + 1])
    }
}

/// Detector geometry as seen from the sample.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Detector {
    /// Detector id.
    pub id: i32,
    /// Unit vector from the sample towards the detector.
    pub direction: V3D,
}

impl Detector {
    /// Creates a detector, normalising the direction.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for a zero direction.
    pub fn new(id: i32, direction: V3D) -> Result<Self> {
        let direction = direction.normalized().ok_or_else(|| {
            Error::InvalidArgument(format!("detector {id} has a zero direction vector"))
        })?;
        Ok(Self { id, direction })
    }

    /// Builds a detector from secondary flight path and spherical angles
    /// (degrees, polar measured from the beam axis z).
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `l2` is not positive.
    pub fn from_spherical(id: i32, l2: f64, polar: f64, azimuthal: f64) -> Result<Self> {
        if l2 <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "detector {id} has non-positive L2 {l2}"
            )));
        }
        let (sp, cp) = polar.to_radians().sin_cos();
        let (sa, ca) = azimuthal.to_radians().sin_cos();
        Self::new(id, V3D::new(sp * ca, sp * sa, cp))
    }
}

/// A run log property.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "snake_case"))]
pub enum Property {
    /// Single number.
    Number(f64),
    /// Free text.
    Text(String),
    /// Time-stamped numeric log, `(time, value)` pairs.
    TimeSeries(Vec<(f64, f64)>),
}

impl Property {
    /// Interprets the property as a single number.
    ///
    /// Time series yield their first value; text is parsed.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Property::Number(v) => Some(*v),
            Property::Text(s) => s.trim().parse().ok(),
            Property::TimeSeries(series) => series.first().map(|&(_, v)| v),
        }
    }

    /// First value of a time series, `None` for other kinds.
    #[must_use]
    pub fn first_time_series_value(&self) -> Option<f64> {
        match self {
            Property::TimeSeries(series) => series.first().map(|&(_, v)| v),
            _ => None,
        }
    }
}

/// Run metadata: logs and goniometer.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Run {
    /// Named properties.
    pub properties: BTreeMap<String, Property>,
    /// Sample goniometer.
    pub goniometer: Goniometer,
}

impl Run {
    /// Adds or replaces a property.
    pub fn add_property(&mut self, name: impl Into<String>, value: Property) {
        self.properties.insert(name.into(), value);
    }

    /// Looks up a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Reads a required scalar property.
    ///
    /// # Errors
    /// Returns [`Error::MissingProperty`] if the property is absent or not numeric.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        self.property(name)
            .and_then(Property::as_number)
            .ok_or_else(|| Error::MissingProperty(name.to_string()))
    }

    /// First value of a named numeric time series.
    ///
    /// # Errors
    /// Returns [`Error::ConfigurationError`] if the property is absent, not a
    /// time series, or empty.
    pub fn first_time_series_value(&self, name: &str) -> Result<f64> {
        let property = self.property(name).ok_or_else(|| {
            Error::ConfigurationError(format!("run has no property '{name}'"))
        })?;
        property.first_time_series_value().ok_or_else(|| {
            Error::ConfigurationError(format!(
                "property '{name}' is not a non-empty numeric time series"
            ))
        })
    }
}

/// Sample description.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Sample {
    /// Oriented lattice, if the sample is a single crystal.
    pub lattice: Option<OrientedLattice>,
}

/// Read access to a detector-indexed dataset.
///
/// Implementors must be shareable across worker threads: spectra are read
/// concurrently while the index is filled on one thread.
pub trait SpectraSource: Sync {
    /// Number of spectra.
    fn num_spectra(&self) -> usize;

    /// Number of detectors; must equal [`Self::num_spectra`].
    fn num_detectors(&self) -> usize;

    /// Spectrum `index`.
    fn histogram(&self, index: usize) -> &Histogram;

    /// Detector that recorded spectrum `index`.
    fn detector(&self, index: usize) -> &Detector;

    /// Value of the numeric vertical axis for spectrum `index`, if any.
    fn vertical_axis_value(&self, index: usize) -> Option<f64>;

    /// Run metadata.
    fn run(&self) -> &Run;

    /// Sample metadata.
    fn sample(&self) -> &Sample;
}

/// In-memory dataset of histograms, one detector per spectrum.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatrixWorkspace {
    /// Unit of the x axis (e.g. `DeltaE`).
    pub x_unit: String,
    /// Spectra.
    pub histograms: Vec<Histogram>,
    /// One detector per spectrum.
    pub detectors: Vec<Detector>,
    /// Optional numeric vertical axis, one value per spectrum.
    pub vertical_axis: Option<Vec<f64>>,
    /// Run metadata.
    pub run: Run,
    /// Sample metadata.
    pub sample: Sample,
}

impl MatrixWorkspace {
    /// Checks that every array is consistently sized.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        if self.detectors.len() != self.histograms.len() {
            return Err(Error::InvalidArgument(format!(
                "{} spectra but {} detectors",
                self.histograms.len(),
                self.detectors.len()
            )));
        }
        if let Some(axis) = &self.vertical_axis {
            if axis.len() != self.histograms.len() {
                return Err(Error::InvalidArgument(format!(
                    "vertical axis has {} values for {} spectra",
                    axis.len(),
                    self.histograms.len()
                )));
            }
        }
        for (i, hist) in self.histograms.iter().enumerate() {
            hist.validate()
                .map_err(|e| Error::InvalidArgument(format!("spectrum {i}: {e}")))?;
        }
        Ok(())
    }

    /// Smallest and largest bin edge over all spectra.
    #[must_use]
    pub fn x_range(&self) -> Option<(f64, f64)> {
        self.histograms
            .iter()
            .flat_map(|h| h.x.iter().copied())
            .fold(None, |acc, x| match acc {
                None => Some((x, x)),
                Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            })
    }

    /// Total number of bins.
    #[must_use]
    pub fn total_bins(&self) -> usize {
        self.histograms.iter().map(Histogram::bins).sum()
    }
}

impl SpectraSource for MatrixWorkspace {
    fn num_spectra(&self) -> usize {
        self.histograms.len()
    }

    fn num_detectors(&self) -> usize {
        self.detectors.len()
    }

    fn histogram(&self, index: usize) -> &Histogram {
        &self.histograms[index]
    }

    fn detector(&self, index: usize) -> &Detector {
        &self.detectors[index]
    }

    fn vertical_axis_value(&self, index: usize) -> Option<f64> {
        self.vertical_axis
            .as_ref()
            .and_then(|axis| axis.get(index).copied())
    }

    fn run(&self) -> &Run {
        &self.run
    }

    fn sample(&self) -> &Sample {
        &self.sample
    }
}
