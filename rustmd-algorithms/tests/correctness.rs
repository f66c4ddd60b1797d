#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use rustmd_algorithms::{
    convert_to_md, ConversionConfig, ConversionStatus, ConvertToMd, ProgressUpdate, TransformMode,
};
use rustmd_core::geometry::V3D;
use rustmd_core::{BoxController, Detector, Histogram, MatrixWorkspace, Property};

/// Spectra with bin edges `0, 2, 4, ...` and unit errors, one detector each.
fn direct_source(signals: &[Vec<f64>], vertical_axis: Vec<f64>) -> MatrixWorkspace {
    let histograms = signals
        .iter()
        .map(|y| {
            let x = (0..=y.len()).map(|i| 2.0 * i as f64).collect();
            Histogram::new(x, y.clone(), vec![1.0; y.len()]).unwrap()
        })
        .collect();
    let detectors = (0..signals.len())
        .map(|i| Detector::new(i as i32 + 1, V3D::new(0.0, 0.0, 1.0)).unwrap())
        .collect();
    MatrixWorkspace {
        x_unit: "DeltaE".to_string(),
        histograms,
        detectors,
        vertical_axis: Some(vertical_axis),
        ..Default::default()
    }
}

fn direct_config(split_into: usize, threshold: usize, max_depth: usize) -> ConversionConfig {
    ConversionConfig::new()
        .with_mode(TransformMode::Direct)
        .with_dimension_bounds(&[(0.0, 10.0), (0.0, 10.0)])
        .unwrap()
        .with_box_controller(BoxController::new(split_into, threshold, max_depth).unwrap())
}

/// Deterministic pseudo-random signals in `[0, 1)`.
fn noisy_signals(detectors: usize, bins: usize) -> Vec<Vec<f64>> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..detectors)
        .map(|_| {
            (0..bins)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    (state % 1000) as f64 / 1000.0
                })
                .collect()
        })
        .collect()
}

#[test]
fn test_two_detectors_three_bins() {
    let source = direct_source(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], vec![2.0, 7.0]);
    let (ws, report) = convert_to_md(&source, &direct_config(2, 1, 3)).unwrap();

    assert_eq!(report.status, ConversionStatus::Completed);
    assert_eq!(report.detectors_processed, 2);
    assert_eq!(report.events_added, 6);
    assert_eq!(report.events_dropped, 0);
    assert_eq!(report.bins_skipped, 0);
    assert!(report.splits >= 1);
    assert_eq!(report.incident_energy, None);

    assert_eq!(ws.num_events(), 6);
    assert_relative_eq!(ws.root_signal(), 21.0);
    assert_relative_eq!(ws.root_error_squared(), 6.0);
    assert!(!ws.root().is_leaf());
    assert_eq!(ws.experiment_infos().len(), 1);
    ws.check_invariants().unwrap();

    let mut coords: Vec<(f64, f64, i32)> = ws
        .events()
        .map(|e| (e.coords[0], e.coords[1], e.detector_id))
        .collect();
    coords.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(
        coords,
        vec![
            (1.0, 2.0, 1),
            (1.0, 7.0, 2),
            (3.0, 2.0, 1),
            (3.0, 7.0, 2),
            (5.0, 2.0, 1),
            (5.0, 7.0, 2),
        ]
    );
    assert!(ws.events().all(|e| e.run_index == 0));
}

#[test]
fn test_negligible_signal_skipped() {
    let eps = f64::from(f32::EPSILON);
    let source = direct_source(&[vec![0.0, 1e-8, 1.0], vec![eps, 2e-7, -1.0]], vec![2.0, 7.0]);
    let (ws, report) = convert_to_md(&source, &direct_config(2, 100, 3)).unwrap();

    assert_eq!(report.events_added, 2);
    assert_eq!(report.bins_skipped, 4);
    assert_eq!(ws.num_events(), 2);
    assert_relative_eq!(ws.root_signal(), 1.0 + 2e-7);
}

#[test]
fn test_event_count_conserved_with_drops() {
    // second spectrum sits above the vertical bound, last bins run past x = 10
    let signals = vec![vec![1.0; 6], vec![1.0; 6], vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0]];
    let source = direct_source(&signals, vec![1.0, 12.0, 9.0]);
    let (ws, report) = convert_to_md(&source, &direct_config(3, 2, 4)).unwrap();

    let total_bins: usize = signals.iter().map(Vec::len).sum();
    assert_eq!(
        report.events_added + report.events_dropped + report.bins_skipped,
        total_bins
    );
    assert_eq!(report.events_dropped, 6 + 1 + 1);
    assert_eq!(report.bins_skipped, 2);
    assert_eq!(ws.num_events(), report.events_added);
    assert_eq!(ws.root().num_events(), report.events_added);
    ws.check_invariants().unwrap();
}

#[test]
fn test_leaves_respect_threshold_or_depth() {
    let signals = noisy_signals(40, 5);
    let axis = (0..40).map(|i| f64::from(i) * 0.25).collect();
    let source = direct_source(&signals, axis);
    let config = direct_config(2, 4, 6).with_batch_split_level(16);
    let (ws, report) = convert_to_md(&source, &config).unwrap();

    assert!(report.events_added > 100);
    for (_, leaf) in ws.leaves() {
        assert!(
            leaf.num_events() <= 4 || leaf.depth() == 6,
            "leaf at depth {} holds {} events",
            leaf.depth(),
            leaf.num_events()
        );
    }
    ws.check_invariants().unwrap();
}

#[test]
fn test_split_is_idempotent_after_conversion() {
    let source = direct_source(&noisy_signals(10, 5), (0..10).map(f64::from).collect());
    let (mut ws, _) = convert_to_md(&source, &direct_config(2, 3, 5)).unwrap();

    let boxes = ws.num_boxes();
    assert_eq!(ws.split_all_if_needed().unwrap(), 0);
    assert_eq!(ws.num_boxes(), boxes);
}

#[test]
fn test_serial_and_parallel_agree() {
    let source = direct_source(&noisy_signals(30, 5), (0..30).map(|i| f64::from(i) / 3.0).collect());
    let config = direct_config(2, 3, 5).with_chunk_size(7);

    let (parallel, parallel_report) = convert_to_md(&source, &config).unwrap();
    let (serial, serial_report) = convert_to_md(&source, &config.clone().with_parallel(false)).unwrap();

    assert_eq!(parallel_report, serial_report);
    assert_eq!(parallel.num_boxes(), serial.num_boxes());
    assert_eq!(parallel.num_events(), serial.num_events());
    assert_relative_eq!(parallel.root_signal(), serial.root_signal(), max_relative = 1e-12);
}

#[test]
fn test_progress_reports_every_detector() {
    let source = direct_source(&noisy_signals(5, 3), (0..5).map(f64::from).collect());
    let converter = ConvertToMd::new(direct_config(2, 10, 3).with_chunk_size(2));
    let mut ws = converter.create_workspace().unwrap();

    let mut updates: Vec<ProgressUpdate> = Vec::new();
    converter
        .execute_with_progress(&source, &mut ws, |update| updates.push(update))
        .unwrap();

    let done: Vec<usize> = updates.iter().map(|u| u.done).collect();
    assert_eq!(done, vec![1, 2, 3, 4, 5]);
    assert!(updates.iter().all(|u| u.total == 5));
}

#[test]
fn test_cancellation_leaves_valid_partial_index() {
    let source = direct_source(&[vec![1.0; 3], vec![1.0; 3], vec![1.0; 3]], vec![1.0, 2.0, 3.0]);
    let flag = Arc::new(AtomicBool::new(false));
    let converter = ConvertToMd::new(direct_config(2, 1, 3)).with_cancel_flag(Arc::clone(&flag));
    let mut ws = converter.create_workspace().unwrap();

    let report = converter
        .execute_with_progress(&source, &mut ws, |update| {
            if update.done == 1 {
                flag.store(true, Ordering::SeqCst);
            }
        })
        .unwrap();

    assert_eq!(report.status, ConversionStatus::Cancelled);
    assert_eq!(report.detectors_processed, 1);
    assert_eq!(ws.num_events(), 3);
    assert_relative_eq!(ws.root_signal(), 3.0);
    assert!(!ws.root().is_leaf());
    ws.check_invariants().unwrap();
}

#[test]
fn test_cancelled_before_start() {
    let source = direct_source(&[vec![1.0; 3]], vec![1.0]);
    let converter = ConvertToMd::new(direct_config(2, 1, 3))
        .with_cancel_flag(Arc::new(AtomicBool::new(true)));
    let mut ws = converter.create_workspace().unwrap();

    let report = converter.execute(&source, &mut ws).unwrap();
    assert_eq!(report.status, ConversionStatus::Cancelled);
    assert_eq!(report.detectors_processed, 0);
    assert_eq!(ws.num_events(), 0);
}

#[test]
fn test_extra_dimension_from_run_log() {
    let mut source = direct_source(&[vec![1.0, 1.0]], vec![3.0]);
    source.run.add_property(
        "temperature",
        Property::TimeSeries(vec![(0.0, 4.2), (60.0, 4.4)]),
    );
    let config = ConversionConfig::new()
        .with_other_dimensions(vec!["temperature".to_string()])
        .with_dimension_bounds(&[(0.0, 10.0), (0.0, 10.0), (0.0, 300.0)])
        .unwrap();
    let (ws, report) = convert_to_md(&source, &config).unwrap();

    assert_eq!(report.events_added, 2);
    assert_eq!(ws.dimensions()[2].name, "temperature");
    assert!(ws.events().all(|e| (e.coords[2] - 4.2).abs() < 1e-12));
}

#[test]
fn test_second_run_gets_next_index() {
    let converter = ConvertToMd::new(direct_config(2, 10, 3));
    let mut ws = converter.create_workspace().unwrap();
    let first = direct_source(&[vec![1.0]], vec![1.0]);
    let second = direct_source(&[vec![2.0]], vec![5.0]);

    converter.execute(&first, &mut ws).unwrap();
    converter.execute(&second, &mut ws).unwrap();

    assert_eq!(ws.experiment_infos().len(), 2);
    let mut runs: Vec<u16> = ws.events().map(|e| e.run_index).collect();
    runs.sort_unstable();
    assert_eq!(runs, vec![0, 1]);
    assert_relative_eq!(ws.root_signal(), 3.0);
}

#[test]
fn test_coincident_events_with_deep_policy() {
    // both detectors put their events on the same points
    let source = direct_source(&[vec![1.0, 2.0], vec![3.0, 4.0]], vec![7.5, 7.5]);
    let (ws, report) = convert_to_md(&source, &direct_config(2, 1, 64)).unwrap();

    assert_eq!(report.status, ConversionStatus::Completed);
    assert_eq!(report.events_added, 4);
    assert_eq!(ws.num_events(), 4);
    assert_relative_eq!(ws.root_signal(), 10.0);
    assert!(ws.max_leaf_depth() < 64);
    ws.check_invariants().unwrap();
}
