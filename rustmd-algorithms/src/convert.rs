//! Spectrum-to-MD ingestion pipeline.
//!
//! [`ConvertToMd`] validates the whole configuration against the input
//! before touching the target workspace, then walks the detectors in chunks.
//! Spectra of a chunk are transformed on the rayon pool into private
//! batches; insertion into the box tree happens on the calling thread in
//! detector order. Splitting is batched: once more than
//! `batch_split_level` events were inserted since the last pass the whole
//! tree is split, and one final pass plus a cache refresh always runs at
//! the end, including after cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rustmd_core::geometry::V3D;
use rustmd_core::{
    BoxController, Error, EventBatch, ExperimentInfo, MdDimension, MdEventWorkspace, Result,
    SpectraSource,
};

use crate::transform::{
    build_transform, CoordinateTransform, SpectrumStats, SpectrumView, TransformMode,
    TransformRequest,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration of one conversion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConversionConfig {
    /// Coordinate transform.
    pub mode: TransformMode,
    /// Target dimensions, in coordinate order.
    pub dimensions: Vec<MdDimension>,
    /// Time-series run properties feeding the dimensions past the mode's own.
    pub other_dimensions: Vec<String>,
    /// Box tree splitting policy.
    pub box_controller: BoxController,
    /// Events inserted between two split passes over the whole tree.
    pub batch_split_level: usize,
    /// Incident energy (meV) used when the run has no `Ei` property.
    pub incident_energy: Option<f64>,
    /// First crystal reference direction (Q3D).
    pub u: V3D,
    /// Second crystal reference direction (Q3D).
    pub v: V3D,
    /// Transform spectra on the rayon pool.
    pub parallel: bool,
    /// Spectra transformed per parallel chunk.
    pub chunk_size: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            mode: TransformMode::Direct,
            dimensions: Vec::new(),
            other_dimensions: Vec::new(),
            box_controller: BoxController::default(),
            batch_split_level: 1024,
            incident_energy: None,
            u: V3D::new(1.0, 0.0, 0.0),
            v: V3D::new(0.0, 1.0, 0.0),
            parallel: true,
            chunk_size: 256,
        }
    }
}

impl ConversionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transform mode.
    #[must_use]
    pub fn with_mode(mut self, mode: TransformMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the target dimensions.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: Vec<MdDimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Creates target dimensions from `(min, max)` pairs.
    ///
    /// Names and units follow the mode: `Q_x, Q_y, Q_z, DeltaE` for Q3D and
    /// `X, Y` for direct conversion. Further dimensions take the names of
    /// [`Self::other_dimensions`], so set those first.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for degenerate bounds.
    pub fn with_dimension_bounds(mut self, bounds: &[(f64, f64)]) -> Result<Self> {
        let base: &[(&str, &str)] = match self.mode {
            TransformMode::Q3D => &[
                ("Q_x", "Angstrom^-1"),
                ("Q_y", "Angstrom^-1"),
                ("Q_z", "Angstrom^-1"),
                ("DeltaE", "meV"),
            ],
            TransformMode::ModQ => &[("|Q|", "Angstrom^-1"), ("DeltaE", "meV")],
            TransformMode::Direct => &[("X", ""), ("Y", "")],
        };
        self.dimensions = bounds
            .iter()
            .enumerate()
            .map(|(d, &(min, max))| {
                let (name, units) = match base.get(d) {
                    Some(&(name, units)) => (name.to_string(), units),
                    None => (
                        self.other_dimensions
                            .get(d - base.len())
                            .cloned()
                            .unwrap_or_else(|| format!("D{d}")),
                        "",
                    ),
                };
                MdDimension::new(name, units, min, max)
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    /// Sets the run properties feeding extra dimensions.
    #[must_use]
    pub fn with_other_dimensions(mut self, names: Vec<String>) -> Self {
        self.other_dimensions = names;
        self
    }

    /// Sets the splitting policy.
    #[must_use]
    pub fn with_box_controller(mut self, controller: BoxController) -> Self {
        self.box_controller = controller;
        self
    }

    /// Sets the number of insertions between split passes.
    #[must_use]
    pub fn with_batch_split_level(mut self, level: usize) -> Self {
        self.batch_split_level = level;
        self
    }

    /// Sets the fallback incident energy (meV).
    #[must_use]
    pub fn with_incident_energy(mut self, energy: f64) -> Self {
        self.incident_energy = Some(energy);
        self
    }

    /// Sets the crystal reference directions.
    #[must_use]
    pub fn with_reference_directions(mut self, u: V3D, v: V3D) -> Self {
        self.u = u;
        self.v = v;
        self
    }

    /// Enables or disables parallel transforms.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the parallel chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Checks bounds, policy and chunking.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(Error::InvalidArgument(
                "no target dimensions configured".to_string(),
            ));
        }
        for dim in &self.dimensions {
            dim.validate()?;
        }
        self.box_controller.validate()?;
        if self.chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk_size must be at least 1".to_string()));
        }
        Ok(())
    }

    fn transform_request(&self) -> TransformRequest<'_> {
        TransformRequest {
            mode: self.mode,
            dimensions: &self.dimensions,
            other_dimensions: &self.other_dimensions,
            incident_energy: self.incident_energy,
            u: self.u,
            v: self.v,
        }
    }
}

/// How a conversion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConversionStatus {
    /// Every detector was processed.
    Completed,
    /// The cancel flag stopped the loop; the workspace holds a valid prefix.
    Cancelled,
}

/// Summary of a conversion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionReport {
    /// Completion status.
    pub status: ConversionStatus,
    /// Detectors whose events were inserted.
    pub detectors_processed: usize,
    /// Events inserted into the workspace.
    pub events_added: usize,
    /// Events outside the target bounds.
    pub events_dropped: usize,
    /// Bins with negligible signal.
    pub bins_skipped: usize,
    /// Box splits performed.
    pub splits: usize,
    /// Incident energy actually used (Q3D only).
    pub incident_energy: Option<f64>,
}

impl ConversionReport {
    fn new(incident_energy: Option<f64>) -> Self {
        Self {
            status: ConversionStatus::Completed,
            detectors_processed: 0,
            events_added: 0,
            events_dropped: 0,
            bins_skipped: 0,
            splits: 0,
            incident_energy,
        }
    }

    fn record(&mut self, stats: SpectrumStats) {
        self.detectors_processed += 1;
        self.events_added += stats.events_emitted;
        self.events_dropped += stats.events_dropped;
        self.bins_skipped += stats.bins_skipped;
    }
}

/// Progress of a running conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Detectors processed so far.
    pub done: usize,
    /// Detectors in the input.
    pub total: usize,
}

impl ProgressUpdate {
    /// Completed fraction in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done as f64 / self.total as f64
        }
    }
}

/// Converts spectra into MD events.
#[derive(Debug, Clone)]
pub struct ConvertToMd {
    config: ConversionConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl ConvertToMd {
    /// Creates a converter.
    #[must_use]
    pub fn new(config: ConversionConfig) -> Self {
        Self {
            config,
            cancel_flag: None,
        }
    }

    /// Attaches a flag that stops the conversion between detectors.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Creates an empty workspace shaped by the configuration.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an invalid configuration.
    pub fn create_workspace(&self) -> Result<MdEventWorkspace> {
        self.config.validate()?;
        MdEventWorkspace::new(
            self.config.dimensions.clone(),
            Arc::new(self.config.box_controller.clone()),
        )
    }

    /// Runs the conversion into `workspace`.
    ///
    /// # Errors
    /// See [`Self::execute_with_progress`].
    pub fn execute<S: SpectraSource + ?Sized>(
        &self,
        source: &S,
        workspace: &mut MdEventWorkspace,
    ) -> Result<ConversionReport> {
        self.execute_with_progress(source, workspace, |_| {})
    }

    /// Runs the conversion, reporting progress after every detector.
    ///
    /// Nothing is inserted unless every check passes.
    ///
    /// # Errors
    /// - [`Error::InvalidArgument`] for bad bounds, a workspace spanning other
    ///   bounds than configured, inconsistent input or an incident energy
    ///   below the data's energy transfer
    /// - [`Error::CastError`] if the workspace has a different dimension count
    /// - [`Error::UnsupportedDimension`], [`Error::NotImplemented`],
    ///   [`Error::MissingProperty`], [`Error::ConfigurationError`] from the
    ///   transform set-up
    /// - [`Error::InvariantViolation`] if the tree breaks while splitting
    pub fn execute_with_progress<S, F>(
        &self,
        source: &S,
        workspace: &mut MdEventWorkspace,
        mut progress: F,
    ) -> Result<ConversionReport>
    where
        S: SpectraSource + ?Sized,
        F: FnMut(ProgressUpdate),
    {
        let start = Instant::now();
        let config = &self.config;
        config.validate()?;
        if workspace.ndims() != config.dimensions.len() {
            return Err(Error::CastError {
                expected: config.dimensions.len(),
                actual: workspace.ndims(),
            });
        }
        check_target_bounds(&config.dimensions, workspace.dimensions())?;
        check_source(source)?;
        let transform = build_transform(&config.transform_request(), source)?;

        let run_index = workspace.add_experiment_info(ExperimentInfo {
            run: source.run().clone(),
            sample: source.sample().clone(),
        })?;
        let total = source.num_spectra();
        log::info!(
            "converting {total} spectra to {} dimensions ({} mode, run index {run_index})",
            transform.ndims(),
            transform.name()
        );

        let mut report = ConversionReport::new(transform.incident_energy());
        let mut pending = 0usize;
        let mut chunk_start = 0;
        'chunks: while chunk_start < total {
            if self.is_cancelled() {
                report.status = ConversionStatus::Cancelled;
                break;
            }
            let chunk_end = (chunk_start + config.chunk_size).min(total);
            let batches = self.transform_chunk(transform.as_ref(), source, chunk_start..chunk_end, run_index);

            for (index, (batch, stats)) in (chunk_start..).zip(batches) {
                if self.is_cancelled() {
                    report.status = ConversionStatus::Cancelled;
                    break 'chunks;
                }
                pending += workspace.add_events(&batch)?;
                report.record(stats);
                progress(ProgressUpdate {
                    done: index + 1,
                    total,
                });
                if pending > config.batch_split_level {
                    report.splits += workspace.split_all_if_needed()?;
                    pending = 0;
                }
            }
            chunk_start = chunk_end;
        }

        if pending > 0 {
            report.splits += workspace.split_all_if_needed()?;
        }
        workspace.refresh_cache();

        if report.status == ConversionStatus::Cancelled {
            log::warn!(
                "conversion cancelled after {} of {total} detectors",
                report.detectors_processed
            );
        }
        log::info!(
            "added {} events ({} dropped, {} bins skipped), {} splits, {} boxes in {:.2?}",
            report.events_added,
            report.events_dropped,
            report.bins_skipped,
            report.splits,
            workspace.num_boxes(),
            start.elapsed()
        );
        Ok(report)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn transform_chunk<S: SpectraSource + ?Sized>(
        &self,
        transform: &dyn CoordinateTransform,
        source: &S,
        range: std::ops::Range<usize>,
        run_index: u16,
    ) -> Vec<(EventBatch, SpectrumStats)> {
        let convert = |index: usize| {
            let spectrum = SpectrumView::from_source(source, index);
            let mut batch = EventBatch::with_capacity(transform.ndims(), spectrum.histogram.bins());
            let stats = transform.convert_spectrum(&spectrum, run_index, &mut batch);
            (batch, stats)
        };
        if self.config.parallel {
            range.into_par_iter().map(convert).collect()
        } else {
            range.map(convert).collect()
        }
    }
}

/// Checks that the workspace spans exactly the configured `[min, max)` ranges.
#[allow(clippy::float_cmp)]
fn check_target_bounds(configured: &[MdDimension], target: &[MdDimension]) -> Result<()> {
    for (d, (want, have)) in configured.iter().zip(target).enumerate() {
        if want.min != have.min || want.max != have.max {
            return Err(Error::InvalidArgument(format!(
                "target dimension {d} spans [{}, {}), conversion is configured for [{}, {})",
                have.min, have.max, want.min, want.max
            )));
        }
    }
    Ok(())
}

/// Checks that spectra and detectors line up and every histogram is well formed.
fn check_source<S: SpectraSource + ?Sized>(source: &S) -> Result<()> {
    if source.num_spectra() != source.num_detectors() {
        return Err(Error::InvalidArgument(format!(
            "{} spectra but {} detectors",
            source.num_spectra(),
            source.num_detectors()
        )));
    }
    for index in 0..source.num_spectra() {
        source
            .histogram(index)
            .validate()
            .map_err(|e| Error::InvalidArgument(format!("spectrum {index}: {e}")))?;
    }
    Ok(())
}

/// Creates a workspace from `config` and converts `source` into it.
///
/// # Errors
/// See [`ConvertToMd::execute_with_progress`].
pub fn convert_to_md<S: SpectraSource + ?Sized>(
    source: &S,
    config: &ConversionConfig,
) -> Result<(MdEventWorkspace, ConversionReport)> {
    let converter = ConvertToMd::new(config.clone());
    let mut workspace = converter.create_workspace()?;
    let report = converter.execute(source, &mut workspace)?;
    Ok((workspace, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ConversionConfig::default();
        assert_eq!(config.batch_split_level, 1024);
        assert_eq!(config.box_controller, BoxController::default());
        assert!(config.parallel);
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_dimension_bounds_names() {
        let config = ConversionConfig::new()
            .with_mode(TransformMode::Q3D)
            .with_other_dimensions(vec!["temperature".to_string()])
            .with_dimension_bounds(&[(-5.0, 5.0), (-5.0, 5.0), (-5.0, 5.0), (-10.0, 20.0), (0.0, 300.0)])
            .unwrap();
        let names: Vec<&str> = config.dimensions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Q_x", "Q_y", "Q_z", "DeltaE", "temperature"]);
        assert_eq!(config.dimensions[3].units, "meV");
        assert!(config.validate().is_ok());

        assert!(ConversionConfig::new()
            .with_dimension_bounds(&[(1.0, 1.0), (0.0, 1.0)])
            .is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = ConversionConfig::new()
            .with_dimension_bounds(&[(0.0, 1.0), (0.0, 1.0)])
            .unwrap()
            .with_chunk_size(0);
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_progress_fraction() {
        let update = ProgressUpdate { done: 1, total: 4 };
        assert!((update.fraction() - 0.25).abs() < f64::EPSILON);
        assert!((ProgressUpdate { done: 0, total: 0 }.fraction() - 1.0).abs() < f64::EPSILON);
    }
}
