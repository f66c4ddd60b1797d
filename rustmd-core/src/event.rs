//! MD event types.
//!
//! Single events are represented by [`MdEvent`]. Leaves of the box tree keep
//! their events in an [`EventBatch`], which stores every field in its own
//! column (`SoA` layout) with the coordinates flattened `ndims` at a time.

use crate::coords::Coords;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A weighted point in N-dimensional space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MdEvent {
    /// Event coordinates.
    pub coords: Coords,
    /// Signal (weight).
    pub signal: f64,
    /// Squared error of the signal.
    pub error_sq: f64,
    /// Index of the run this event came from.
    pub run_index: u16,
    /// Originating detector id.
    pub detector_id: i32,
}

impl MdEvent {
    /// Creates a new event.
    #[inline]
    #[must_use]
    pub fn new(coords: Coords, signal: f64, error_sq: f64, run_index: u16, detector_id: i32) -> Self {
        Self {
            coords,
            signal,
            error_sq,
            run_index,
            detector_id,
        }
    }

    /// Number of dimensions.
    #[inline]
    #[must_use]
    pub fn ndims(&self) -> usize {
        self.coords.ndims()
    }
}

/// Borrowed view of one event inside an [`EventBatch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRef<'a> {
    /// Event coordinates.
    pub coords: &'a [f64],
    /// Signal (weight).
    pub signal: f64,
    /// Squared error of the signal.
    pub error_sq: f64,
    /// Index of the run this event came from.
    pub run_index: u16,
    /// Originating detector id.
    pub detector_id: i32,
}

/// A batch of events stored in Structure of Arrays (`SoA`) format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventBatch {
    ndims: usize,
    /// Flattened coordinates, `ndims` values per event.
    pub coords: Vec<f64>,
    /// Columnar storage for signals.
    pub signal: Vec<f64>,
    /// Columnar storage for squared errors.
    pub error_sq: Vec<f64>,
    /// Columnar storage for run indices.
    pub run_index: Vec<u16>,
    /// Columnar storage for detector ids.
    pub detector_id: Vec<i32>,
}

impl EventBatch {
    /// Creates an empty batch for `ndims`-dimensional events.
    #[must_use]
    pub fn new(ndims: usize) -> Self {
        Self::with_capacity(ndims, 0)
    }

    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(ndims: usize, capacity: usize) -> Self {
        Self {
            ndims,
            coords: Vec::with_capacity(capacity * ndims),
            signal: Vec::with_capacity(capacity),
            error_sq: Vec::with_capacity(capacity),
            run_index: Vec::with_capacity(capacity),
            detector_id: Vec::with_capacity(capacity),
        }
    }

    /// Number of dimensions of the stored events.
    #[must_use]
    pub fn ndims(&self) -> usize {
        self.ndims
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Clears all columns.
    pub fn clear(&mut self) {
        self.coords.clear();
        self.signal.clear();
        self.error_sq.clear();
        self.run_index.clear();
        self.detector_id.clear();
    }

    /// Pushes a single event given as raw fields.
    pub fn push_raw(
        &mut self,
        coords: &[f64],
        signal: f64,
        error_sq: f64,
        run_index: u16,
        detector_id: i32,
    ) {
        debug_assert_eq!(coords.len(), self.ndims, "coordinate count mismatch");
        self.coords.extend_from_slice(coords);
        self.signal.push(signal);
        self.error_sq.push(error_sq);
        self.run_index.push(run_index);
        self.detector_id.push(detector_id);
    }

    /// Pushes a single event.
    pub fn push(&mut self, event: &MdEvent) {
        self.push_raw(
            &event.coords,
            event.signal,
            event.error_sq,
            event.run_index,
            event.detector_id,
        );
    }

    /// Appends all events from another batch to this one.
    pub fn append(&mut self, other: &EventBatch) {
        debug_assert_eq!(other.ndims, self.ndims, "coordinate count mismatch");
        self.coords.extend_from_slice(&other.coords);
        self.signal.extend_from_slice(&other.signal);
        self.error_sq.extend_from_slice(&other.error_sq);
        self.run_index.extend_from_slice(&other.run_index);
        self.detector_id.extend_from_slice(&other.detector_id);
    }

    /// Coordinates of event `idx`.
    #[inline]
    #[must_use]
    pub fn coords_of(&self, idx: usize) -> &[f64] {
        &self.coords[idx * self.ndims..(idx + 1) * self.ndims]
    }

    /// Borrowed view of event `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> EventRef<'_> {
        EventRef {
            coords: self.coords_of(idx),
            signal: self.signal[idx],
            error_sq: self.error_sq[idx],
            run_index: self.run_index[idx],
            detector_id: self.detector_id[idx],
        }
    }

    /// Iterates over all events.
    pub fn iter(&self) -> impl Iterator<Item = EventRef<'_>> + '_ {
        (0..self.len()).map(move |idx| self.get(idx))
    }

    /// Copies event `idx` of `src` into this batch.
    pub fn push_from(&mut self, src: &EventBatch, idx: usize) {
        self.push_raw(
            src.coords_of(idx),
            src.signal[idx],
            src.error_sq[idx],
            src.run_index[idx],
            src.detector_id[idx],
        );
    }

    /// Sum of signals and squared errors over the batch.
    #[must_use]
    pub fn totals(&self) -> (f64, f64) {
        (self.signal.iter().sum(), self.error_sq.iter().sum())
    }
}
