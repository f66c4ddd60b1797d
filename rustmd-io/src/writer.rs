//! JSON writers for conversion results.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rustmd_algorithms::ConversionReport;
use rustmd_core::MdEventWorkspace;
use serde::Serialize;

use crate::Result;

/// Summary of a finished conversion as written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary<'a> {
    /// Pipeline report.
    pub report: &'a ConversionReport,
    /// Dimension names in coordinate order.
    pub dimensions: Vec<&'a str>,
    /// Events held by the workspace.
    pub num_events: usize,
    /// Boxes in the tree.
    pub num_boxes: usize,
    /// Deepest leaf.
    pub max_depth: usize,
    /// Total signal.
    pub signal: f64,
    /// Total squared error.
    pub error_squared: f64,
}

impl<'a> ConversionSummary<'a> {
    /// Collects the summary of a converted workspace.
    #[must_use]
    pub fn new(report: &'a ConversionReport, workspace: &'a MdEventWorkspace) -> Self {
        Self {
            report,
            dimensions: workspace.dimensions().iter().map(|d| d.name.as_str()).collect(),
            num_events: workspace.num_events(),
            num_boxes: workspace.num_boxes(),
            max_depth: workspace.max_leaf_depth(),
            signal: workspace.root_signal(),
            error_squared: workspace.root_error_squared(),
        }
    }
}

/// Writes a conversion summary as pretty-printed JSON.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_summary<P: AsRef<Path>>(path: P, summary: &ConversionSummary<'_>) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
