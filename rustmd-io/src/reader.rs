//! JSON readers for spectra datasets and conversion settings.
//!
//! A dataset document lists one entry per spectrum together with its
//! detector. Detectors are given either by spherical position
//! (`l2`, `polar`, `azimuthal` in degrees) or by a direction vector:
//!
//! ```json
//! {
//!   "x_unit": "DeltaE",
//!   "spectra": [
//!     { "detector": { "id": 1, "l2": 4.0, "polar": 30.0 },
//!       "x": [-1.0, 0.0, 1.0], "y": [3.0, 5.0], "vertical_axis": 0.5 }
//!   ],
//!   "run": { "properties": { "Ei": { "type": "number", "value": 25.0 } } },
//!   "sample": { "lattice": { "lengths": [5.0, 5.0, 5.0], "angles": [90.0, 90.0, 90.0] } }
//! }
//! ```
//!
//! Missing errors default to `sqrt(|y|)`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustmd_algorithms::ConversionConfig;
use rustmd_core::geometry::V3D;
use rustmd_core::{Detector, Histogram, MatrixWorkspace, Run, Sample};
use serde::Deserialize;

use crate::{Error, Result};

#[derive(Deserialize)]
struct JsonWorkspace {
    #[serde(default)]
    x_unit: String,
    spectra: Vec<JsonSpectrum>,
    #[serde(default)]
    run: Run,
    #[serde(default)]
    sample: Sample,
}

#[derive(Deserialize)]
struct JsonSpectrum {
    detector: JsonDetector,
    x: Vec<f64>,
    y: Vec<f64>,
    #[serde(default)]
    e: Option<Vec<f64>>,
    #[serde(default)]
    vertical_axis: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonDetector {
    Spherical {
        id: i32,
        l2: f64,
        polar: f64,
        #[serde(default)]
        azimuthal: f64,
    },
    Direction {
        id: i32,
        direction: [f64; 3],
    },
}

impl JsonDetector {
    fn into_detector(self) -> rustmd_core::Result<Detector> {
        match self {
            JsonDetector::Spherical {
                id,
                l2,
                polar,
                azimuthal,
            } => Detector::from_spherical(id, l2, polar, azimuthal),
            JsonDetector::Direction { id, direction } => {
                Detector::new(id, V3D::new(direction[0], direction[1], direction[2]))
            }
        }
    }
}

/// Loads a spectra dataset from a JSON file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or if its content
/// is inconsistent.
pub fn load_workspace<P: AsRef<Path>>(path: P) -> Result<MatrixWorkspace> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let json: JsonWorkspace = serde_json::from_reader(BufReader::new(file))?;
    let workspace = from_json_workspace(json)?;
    log::debug!(
        "loaded {} spectra ({} bins) from {}",
        workspace.histograms.len(),
        workspace.total_bins(),
        path.display()
    );
    Ok(workspace)
}

/// Parses a spectra dataset from a JSON string.
///
/// # Errors
/// Returns an error if the document cannot be parsed or is inconsistent.
pub fn workspace_from_json(json: &str) -> Result<MatrixWorkspace> {
    from_json_workspace(serde_json::from_str(json)?)
}

fn from_json_workspace(json: JsonWorkspace) -> Result<MatrixWorkspace> {
    let with_axis = json
        .spectra
        .iter()
        .filter(|s| s.vertical_axis.is_some())
        .count();
    if with_axis != 0 && with_axis != json.spectra.len() {
        return Err(Error::InvalidFormat(format!(
            "{with_axis} of {} spectra have a vertical axis value, expected all or none",
            json.spectra.len()
        )));
    }

    let mut histograms = Vec::with_capacity(json.spectra.len());
    let mut detectors = Vec::with_capacity(json.spectra.len());
    let mut vertical_axis = Vec::with_capacity(with_axis);
    for (index, spectrum) in json.spectra.into_iter().enumerate() {
        let e = spectrum
            .e
            .unwrap_or_else(|| spectrum.y.iter().map(|y| y.abs().sqrt()).collect());
        let histogram = Histogram::new(spectrum.x, spectrum.y, e)
            .map_err(|err| Error::InvalidFormat(format!("spectrum {index}: {err}")))?;
        let detector = spectrum
            .detector
            .into_detector()
            .map_err(|err| Error::InvalidFormat(format!("spectrum {index}: {err}")))?;
        histograms.push(histogram);
        detectors.push(detector);
        vertical_axis.extend(spectrum.vertical_axis);
    }

    let workspace = MatrixWorkspace {
        x_unit: json.x_unit,
        histograms,
        detectors,
        vertical_axis: (with_axis > 0).then_some(vertical_axis),
        run: json.run,
        sample: json.sample,
    };
    workspace.validate()?;
    Ok(workspace)
}

/// Loads conversion settings from a JSON file.
///
/// Every field is optional; omitted fields keep their defaults.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or if a dimension
/// or the box controller is invalid.
pub fn load_conversion_config<P: AsRef<Path>>(path: P) -> Result<ConversionConfig> {
    let file = File::open(path)?;
    let config: ConversionConfig = serde_json::from_reader(BufReader::new(file))?;
    finish_config(config)
}

/// Parses conversion settings from a JSON string.
///
/// # Errors
/// Returns an error if the document cannot be parsed or a dimension or the
/// box controller is invalid.
pub fn conversion_config_from_json(json: &str) -> Result<ConversionConfig> {
    finish_config(serde_json::from_str(json)?)
}

fn finish_config(mut config: ConversionConfig) -> Result<ConversionConfig> {
    for dim in &mut config.dimensions {
        dim.validate()?;
        if dim.id.is_empty() {
            dim.id.clone_from(&dim.name);
        }
    }
    config.box_controller.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustmd_algorithms::TransformMode;
    use rustmd_core::Property;

    #[test]
    fn test_minimal_workspace() {
        let json = r#"{
            "spectra": [
                { "detector": { "id": 3, "direction": [0.0, 0.0, 2.0] },
                  "x": [0.0, 1.0, 2.0], "y": [4.0, 9.0] }
            ]
        }"#;
        let ws = workspace_from_json(json).unwrap();
        assert_eq!(ws.histograms.len(), 1);
        assert_eq!(ws.histograms[0].e, vec![2.0, 3.0]);
        assert_eq!(ws.detectors[0].id, 3);
        assert!((ws.detectors[0].direction.z - 1.0).abs() < 1e-12);
        assert!(ws.vertical_axis.is_none());
        assert!(ws.sample.lattice.is_none());
    }

    #[test]
    fn test_spherical_detector_and_properties() {
        let json = r#"{
            "x_unit": "DeltaE",
            "spectra": [
                { "detector": { "id": 1, "l2": 4.0, "polar": 90.0, "azimuthal": 90.0 },
                  "x": [0.0, 1.0], "y": [1.0], "e": [0.5], "vertical_axis": 2.5 }
            ],
            "run": {
                "properties": {
                    "Ei": { "type": "number", "value": 25.0 },
                    "temperature": { "type": "time_series", "value": [[0.0, 4.2], [10.0, 4.3]] }
                }
            }
        }"#;
        let ws = workspace_from_json(json).unwrap();
        assert!((ws.detectors[0].direction.y - 1.0).abs() < 1e-12);
        assert_eq!(ws.vertical_axis, Some(vec![2.5]));
        assert_eq!(ws.run.property("Ei"), Some(&Property::Number(25.0)));
        assert!((ws.run.first_time_series_value("temperature").unwrap() - 4.2).abs() < 1e-12);
    }

    #[test]
    fn test_partial_vertical_axis_rejected() {
        let json = r#"{
            "spectra": [
                { "detector": { "id": 1, "direction": [0, 0, 1] }, "x": [0, 1], "y": [1], "vertical_axis": 1.0 },
                { "detector": { "id": 2, "direction": [0, 1, 0] }, "x": [0, 1], "y": [1] }
            ]
        }"#;
        assert!(matches!(workspace_from_json(json), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_bad_histogram_rejected() {
        let json = r#"{
            "spectra": [ { "detector": { "id": 1, "direction": [0, 0, 1] }, "x": [0, 1], "y": [1, 2] } ]
        }"#;
        assert!(matches!(workspace_from_json(json), Err(Error::InvalidFormat(_))));
        assert!(matches!(workspace_from_json("{"), Err(Error::Json(_))));
    }

    #[test]
    fn test_partial_conversion_config() {
        let json = r#"{
            "mode": "q3d",
            "dimensions": [
                { "name": "Q_x", "units": "Angstrom^-1", "min": -5.0, "max": 5.0 },
                { "name": "Q_y", "min": -5.0, "max": 5.0 },
                { "name": "Q_z", "min": -5.0, "max": 5.0 },
                { "name": "DeltaE", "units": "meV", "min": -2.0, "max": 20.0 }
            ],
            "box_controller": { "split_into": 4 },
            "incident_energy": 25.0
        }"#;
        let config = conversion_config_from_json(json).unwrap();
        assert_eq!(config.mode, TransformMode::Q3D);
        assert_eq!(config.dimensions[1].id, "Q_y");
        assert_eq!(config.box_controller.split_into, 4);
        assert_eq!(config.box_controller.split_threshold, 1500);
        assert_eq!(config.batch_split_level, 1024);
        assert_eq!(config.incident_energy, Some(25.0));
    }

    #[test]
    fn test_invalid_conversion_config() {
        let json = r#"{ "dimensions": [ { "name": "X", "min": 1.0, "max": 1.0 } ] }"#;
        assert!(matches!(
            conversion_config_from_json(json),
            Err(Error::CoreError(rustmd_core::Error::InvalidArgument(_)))
        ));
        let json = r#"{ "box_controller": { "split_threshold": 0 } }"#;
        assert!(matches!(conversion_config_from_json(json), Err(Error::CoreError(_))));
    }
}
