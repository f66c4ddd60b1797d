//! Boxes of the MD event tree.

use crate::coords::Coords;
use crate::event::EventBatch;

/// Index of a box inside its workspace's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoxId(pub usize);

impl BoxId {
    /// The root box.
    pub const ROOT: BoxId = BoxId(0);
}

/// What a box holds.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxContent {
    /// Events held directly.
    Leaf(EventBatch),
    /// Contiguous run of child boxes in the arena.
    Interior {
        /// Arena index of the first child.
        first_child: usize,
        /// Number of children (`split_into^ndims`).
        count: usize,
    },
}

/// Axis-aligned hyper-rectangle with half-open `[min, max)` extents.
#[derive(Debug, Clone, PartialEq)]
pub struct MdBox {
    min: Coords,
    max: Coords,
    depth: usize,
    pub(crate) content: BoxContent,
    pub(crate) signal: f64,
    pub(crate) error_sq: f64,
    pub(crate) num_events: usize,
}

impl MdBox {
    pub(crate) fn new_leaf(min: Coords, max: Coords, depth: usize) -> Self {
        let ndims = min.ndims();
        Self {
            min,
            max,
            depth,
            content: BoxContent::Leaf(EventBatch::new(ndims)),
            signal: 0.0,
            error_sq: 0.0,
            num_events: 0,
        }
    }

    /// Lower corner.
    #[must_use]
    pub fn min(&self) -> &[f64] {
        &self.min
    }

    /// Upper corner (exclusive).
    #[must_use]
    pub fn max(&self) -> &[f64] {
        &self.max
    }

    pub(crate) fn min_coords(&self) -> Coords {
        self.min
    }

    pub(crate) fn max_coords(&self) -> Coords {
        self.max
    }

    /// Depth in the tree (root is 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Box content.
    #[must_use]
    pub fn content(&self) -> &BoxContent {
        &self.content
    }

    /// True while the box holds events directly.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.content, BoxContent::Leaf(_))
    }

    /// Events of a leaf, `None` for interior boxes.
    #[must_use]
    pub fn events(&self) -> Option<&EventBatch> {
        match &self.content {
            BoxContent::Leaf(events) => Some(events),
            BoxContent::Interior { .. } => None,
        }
    }

    /// Child ids of an interior box (empty for leaves).
    pub fn children(&self) -> impl Iterator<Item = BoxId> {
        let range = match self.content {
            BoxContent::Interior { first_child, count } => first_child..first_child + count,
            BoxContent::Leaf(_) => 0..0,
        };
        range.map(BoxId)
    }

    /// Cached aggregate signal (valid after `refresh_cache`).
    #[must_use]
    pub fn signal(&self) -> f64 {
        self.signal
    }

    /// Cached aggregate squared error (valid after `refresh_cache`).
    #[must_use]
    pub fn error_squared(&self) -> f64 {
        self.error_sq
    }

    /// Number of events below this box.
    ///
    /// Exact for leaves; cached for interior boxes.
    #[must_use]
    pub fn num_events(&self) -> usize {
        match &self.content {
            BoxContent::Leaf(events) => events.len(),
            BoxContent::Interior { .. } => self.num_events,
        }
    }

    /// Half-open containment test.
    #[inline]
    #[must_use]
    pub fn contains(&self, coords: &[f64]) -> bool {
        contains(&self.min, &self.max, coords)
    }

    /// True if the box intersects the region `[min, max)`.
    #[must_use]
    pub fn overlaps(&self, min: &[f64], max: &[f64]) -> bool {
        self.min
            .iter()
            .zip(self.max.iter())
            .zip(min.iter().zip(max.iter()))
            .all(|((&lo, &hi), (&rlo, &rhi))| lo < rhi && rlo < hi)
    }

    /// True if the box lies completely inside the region `[min, max)`.
    #[must_use]
    pub fn is_within(&self, min: &[f64], max: &[f64]) -> bool {
        self.min
            .iter()
            .zip(self.max.iter())
            .zip(min.iter().zip(max.iter()))
            .all(|((&lo, &hi), (&rlo, &rhi))| lo >= rlo && hi <= rhi)
    }

    /// Geometric centre.
    #[must_use]
    pub fn center(&self) -> Coords {
        let mut center = self.min;
        for (c, &hi) in center.iter_mut().zip(self.max.iter()) {
            *c = 0.5 * (*c + hi);
        }
        center
    }

    /// Product of the box widths.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.min
            .iter()
            .zip(self.max.iter())
            .map(|(lo, hi)| hi - lo)
            .product()
    }
}

/// Half-open containment of `coords` in `[min, max)`.
#[inline]
pub(crate) fn contains(min: &[f64], max: &[f64], coords: &[f64]) -> bool {
    coords.len() == min.len()
        && coords
            .iter()
            .zip(min.iter().zip(max.iter()))
            .all(|(&x, (&lo, &hi))| x >= lo && x < hi)
}

/// Edge `i` of an interval `[lo, hi)` cut into `n` equal parts.
///
/// The last edge is `hi` itself so children tile the parent exactly.
#[inline]
#[allow(clippy::cast_precision_loss)]
pub(crate) fn grid_edge(lo: f64, hi: f64, n: usize, i: usize) -> f64 {
    if i >= n {
        hi
    } else {
        lo + (hi - lo) * (i as f64) / (n as f64)
    }
}

/// True if every dimension of `[min, max)` can be cut into `n` non-empty parts.
pub(crate) fn divisible(min: &[f64], max: &[f64], n: usize) -> bool {
    min.iter()
        .zip(max.iter())
        .all(|(&lo, &hi)| (0..n).all(|i| grid_edge(lo, hi, n, i) < grid_edge(lo, hi, n, i + 1)))
}

/// Which of the `n` equal parts of `[lo, hi)` holds `x`.
///
/// Agrees with [`grid_edge`] exactly, so a value assigned to cell `i`
/// satisfies `grid_edge(i) <= x < grid_edge(i + 1)` whenever `lo <= x < hi`.
#[inline]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub(crate) fn grid_cell(lo: f64, hi: f64, n: usize, x: f64) -> usize {
    let guess = ((x - lo) / (hi - lo) * n as f64).floor();
    let mut i = if guess.is_finite() && guess > 0.0 {
        (guess as usize).min(n - 1)
    } else {
        0
    };
    while i > 0 && x < grid_edge(lo, hi, n, i) {
        i -= 1;
    }
    while i + 1 < n && x >= grid_edge(lo, hi, n, i + 1) {
        i += 1;
    }
    i
}

/// Linear child index of `coords` inside a box split `n` ways per dimension.
///
/// Dimension 0 varies fastest.
pub(crate) fn child_offset(min: &[f64], max: &[f64], n: usize, coords: &[f64]) -> usize {
    let mut offset = 0;
    let mut stride = 1;
    for ((&lo, &hi), &x) in min.iter().zip(max.iter()).zip(coords.iter()) {
        offset += grid_cell(lo, hi, n, x) * stride;
        stride *= n;
    }
    offset
}
