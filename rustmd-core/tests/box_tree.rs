#![allow(clippy::cast_precision_loss)]

use std::sync::Arc;

use approx::assert_relative_eq;
use rustmd_core::{BoxController, Coords, EventBatch, MdDimension, MdEventWorkspace, MdEvent};

fn cube_workspace(split_into: usize, threshold: usize, max_depth: usize) -> MdEventWorkspace {
    let dims = vec![
        MdDimension::new("x", "", -1.0, 1.0).unwrap(),
        MdDimension::new("y", "", 0.0, 3.0).unwrap(),
        MdDimension::new("z", "", 10.0, 10.7).unwrap(),
    ];
    let controller = BoxController::new(split_into, threshold, max_depth).unwrap();
    MdEventWorkspace::new(dims, Arc::new(controller)).unwrap()
}

/// Deterministic points spread over the cube workspace, with signal `i + 1`.
fn scattered_events(n: usize) -> EventBatch {
    let mut batch = EventBatch::with_capacity(3, n);
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 1_000_000) as f64 / 1_000_000.0
    };
    for i in 0..n {
        let coords = [-1.0 + 2.0 * next(), 3.0 * next(), 10.0 + 0.7 * next()];
        let signal = (i + 1) as f64;
        batch.push_raw(&coords, signal, signal * 0.5, 0, i32::try_from(i).unwrap());
    }
    batch
}

#[test]
fn test_bulk_insert_split_and_cache() {
    let mut ws = cube_workspace(3, 10, 6);
    let batch = scattered_events(2000);
    assert_eq!(ws.add_events(&batch).unwrap(), 2000);

    let splits = ws.split_all_if_needed().unwrap();
    assert!(splits > 1);
    ws.refresh_cache();

    assert_eq!(ws.num_events(), 2000);
    assert_eq!(ws.root().num_events(), 2000);
    let (signal, error_sq) = batch.totals();
    assert_relative_eq!(ws.root_signal(), signal, max_relative = 1e-9);
    assert_relative_eq!(ws.root_error_squared(), error_sq, max_relative = 1e-9);
    ws.check_invariants().unwrap();

    for (_, leaf) in ws.leaves() {
        assert!(leaf.num_events() <= 10 || leaf.depth() == 6);
    }
}

#[test]
fn test_split_is_idempotent() {
    let mut ws = cube_workspace(2, 5, 8);
    ws.add_events(&scattered_events(500)).unwrap();
    ws.split_all_if_needed().unwrap();

    let boxes = ws.num_boxes();
    assert_eq!(ws.split_all_if_needed().unwrap(), 0);
    assert_eq!(ws.num_boxes(), boxes);
}

#[test]
fn test_incremental_inserts_match_bulk() {
    let batch = scattered_events(800);

    let mut bulk = cube_workspace(2, 8, 7);
    bulk.add_events(&batch).unwrap();
    bulk.split_all_if_needed().unwrap();
    bulk.refresh_cache();

    let mut incremental = cube_workspace(2, 8, 7);
    for (i, event) in batch.iter().enumerate() {
        let coords = Coords::from_slice(event.coords).unwrap();
        incremental
            .add_event(&MdEvent::new(coords, event.signal, event.error_sq, 0, event.detector_id))
            .unwrap();
        if i % 100 == 99 {
            incremental.split_all_if_needed().unwrap();
        }
    }
    incremental.split_all_if_needed().unwrap();
    incremental.refresh_cache();

    assert_eq!(incremental.num_events(), bulk.num_events());
    assert_relative_eq!(incremental.root_signal(), bulk.root_signal(), max_relative = 1e-12);
    incremental.check_invariants().unwrap();
    for (_, leaf) in incremental.leaves() {
        assert!(leaf.num_events() <= 8 || leaf.depth() == 7);
    }
}

#[test]
fn test_region_query_matches_scan() {
    let mut ws = cube_workspace(2, 6, 6);
    let batch = scattered_events(1000);
    ws.add_events(&batch).unwrap();
    ws.split_all_if_needed().unwrap();
    ws.refresh_cache();

    let min = [-0.3, 0.5, 10.1];
    let max = [0.6, 2.25, 10.5];
    let inside = |c: &[f64]| c.iter().zip(min.iter().zip(max.iter())).all(|(&x, (&lo, &hi))| x >= lo && x < hi);

    let expected: Vec<i32> = batch.iter().filter(|e| inside(e.coords)).map(|e| e.detector_id).collect();
    let mut found: Vec<i32> = ws
        .events_in_region(&min, &max)
        .unwrap()
        .iter()
        .map(|e| e.detector_id)
        .collect();
    found.sort_unstable();
    assert_eq!(found, expected);

    let expected_signal: f64 = batch.iter().filter(|e| inside(e.coords)).map(|e| e.signal).sum();
    let (signal, _) = ws.integrate_region(&min, &max).unwrap();
    assert_relative_eq!(signal, expected_signal, max_relative = 1e-9);

    // whole space integrates through cached totals
    let (all, _) = ws.integrate_region(&[-1.0, 0.0, 10.0], &[1.0, 3.0, 10.7]).unwrap();
    assert_relative_eq!(all, ws.root_signal(), max_relative = 1e-12);
}

#[test]
fn test_events_on_upper_child_edges() {
    let mut ws = cube_workspace(2, 1, 4);
    // exact child boundaries of the root split: x = 0, y = 1.5, z = 10.35
    let mut batch = EventBatch::new(3);
    batch.push_raw(&[0.0, 1.5, 10.35], 1.0, 1.0, 0, 1);
    batch.push_raw(&[-1.0, 0.0, 10.0], 1.0, 1.0, 0, 2);
    batch.push_raw(&[0.999_999, 2.999_999, 10.699_999], 1.0, 1.0, 0, 3);
    ws.add_events(&batch).unwrap();
    ws.split_all_if_needed().unwrap();
    ws.refresh_cache();

    assert_eq!(ws.num_events(), 3);
    ws.check_invariants().unwrap();
}
