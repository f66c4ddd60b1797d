//! The MD event workspace: an adaptive box tree over N-dimensional events.
//!
//! Boxes live in an arena (`Vec<MdBox>`) and refer to their children by
//! index. A split appends all children of a box in one contiguous run, so
//! children always sit after their parent; `refresh_cache` relies on this to
//! aggregate bottom-up with a single reverse sweep.
//!
//! Splitting is lazy: `add_event` only appends to the owning leaf, and the
//! caller decides when to run [`MdEventWorkspace::split_all_if_needed`].

use std::sync::Arc;

use crate::box_controller::BoxController;
use crate::coords::{Coords, MAX_DIMS};
use crate::dimension::MdDimension;
use crate::event::{EventBatch, EventRef, MdEvent};
use crate::md_box::{child_offset, contains, divisible, grid_edge, BoxContent, BoxId, MdBox};
use crate::workspace::{Run, Sample};
use crate::{Error, Result};

/// Relative tolerance used when checking cached sums.
const CACHE_TOLERANCE: f64 = 1e-9;

/// Metadata of one run whose events were added to the workspace.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExperimentInfo {
    /// Run logs and goniometer.
    pub run: Run,
    /// Sample description.
    pub sample: Sample,
}

/// Multidimensional event workspace.
#[derive(Debug, Clone)]
pub struct MdEventWorkspace {
    dimensions: Vec<MdDimension>,
    controller: Arc<BoxController>,
    boxes: Vec<MdBox>,
    experiment_infos: Vec<ExperimentInfo>,
}

impl MdEventWorkspace {
    /// Creates an empty workspace whose root leaf spans the given dimensions.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] for an unusable dimension list,
    /// degenerate bounds, or an invalid box controller.
    pub fn new(dimensions: Vec<MdDimension>, controller: Arc<BoxController>) -> Result<Self> {
        if dimensions.is_empty() || dimensions.len() > MAX_DIMS {
            return Err(Error::InvalidArgument(format!(
                "an MD workspace needs 1..={MAX_DIMS} dimensions, got {}",
                dimensions.len()
            )));
        }
        for dim in &dimensions {
            dim.validate()?;
        }
        controller.validate()?;
        controller.children_per_split(dimensions.len())?;

        let mut min = Coords::zeros(dimensions.len())?;
        let mut max = min;
        for (d, dim) in dimensions.iter().enumerate() {
            min[d] = dim.min;
            max[d] = dim.max;
        }

        Ok(Self {
            dimensions,
            controller,
            boxes: vec![MdBox::new_leaf(min, max, 0)],
            experiment_infos: Vec::new(),
        })
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndims(&self) -> usize {
        self.dimensions.len()
    }

    /// Dimension descriptions.
    #[must_use]
    pub fn dimensions(&self) -> &[MdDimension] {
        &self.dimensions
    }

    /// Shared splitting policy.
    #[must_use]
    pub fn box_controller(&self) -> &Arc<BoxController> {
        &self.controller
    }

    /// Registers a run and returns the index its events should carry.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] once `u16::MAX` runs are registered.
    pub fn add_experiment_info(&mut self, info: ExperimentInfo) -> Result<u16> {
        let index = u16::try_from(self.experiment_infos.len()).map_err(|_| {
            Error::InvalidArgument("too many runs in one MD workspace".to_string())
        })?;
        self.experiment_infos.push(info);
        Ok(index)
    }

    /// Registered runs, in run-index order.
    #[must_use]
    pub fn experiment_infos(&self) -> &[ExperimentInfo] {
        &self.experiment_infos
    }

    /// The root box.
    #[must_use]
    pub fn root(&self) -> &MdBox {
        &self.boxes[0]
    }

    /// Box by id.
    #[must_use]
    pub fn get_box(&self, id: BoxId) -> Option<&MdBox> {
        self.boxes.get(id.0)
    }

    /// Total number of boxes (leaf and interior).
    #[must_use]
    pub fn num_boxes(&self) -> usize {
        self.boxes.len()
    }

    /// Number of events, counted directly from the leaves.
    #[must_use]
    pub fn num_events(&self) -> usize {
        self.boxes
            .iter()
            .filter_map(MdBox::events)
            .map(EventBatch::len)
            .sum()
    }

    /// Cached total signal (valid after [`Self::refresh_cache`]).
    #[must_use]
    pub fn root_signal(&self) -> f64 {
        self.boxes[0].signal
    }

    /// Cached total squared error (valid after [`Self::refresh_cache`]).
    #[must_use]
    pub fn root_error_squared(&self) -> f64 {
        self.boxes[0].error_sq
    }

    /// Deepest leaf depth.
    #[must_use]
    pub fn max_leaf_depth(&self) -> usize {
        self.leaves().map(|(_, b)| b.depth()).max().unwrap_or(0)
    }

    /// Iterates over all leaves.
    pub fn leaves(&self) -> impl Iterator<Item = (BoxId, &MdBox)> + '_ {
        self.boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_leaf())
            .map(|(i, b)| (BoxId(i), b))
    }

    /// Iterates over every event in the workspace.
    pub fn events(&self) -> impl Iterator<Item = EventRef<'_>> + '_ {
        self.boxes
            .iter()
            .filter_map(MdBox::events)
            .flat_map(EventBatch::iter)
    }

    /// Adds one event to the leaf that owns its coordinates.
    ///
    /// Bounds are the caller's responsibility; they are checked again when
    /// the owning leaf splits.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the event has the wrong number of dimensions.
    pub fn add_event(&mut self, event: &MdEvent) -> Result<()> {
        self.check_ndims(event.ndims())?;
        self.insert_raw(
            &event.coords,
            event.signal,
            event.error_sq,
            event.run_index,
            event.detector_id,
        );
        Ok(())
    }

    /// Adds every event of a batch; returns how many were added.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the batch has the wrong number of dimensions.
    pub fn add_events(&mut self, batch: &EventBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.check_ndims(batch.ndims())?;
        for idx in 0..batch.len() {
            self.insert_raw(
                batch.coords_of(idx),
                batch.signal[idx],
                batch.error_sq[idx],
                batch.run_index[idx],
                batch.detector_id[idx],
            );
        }
        Ok(batch.len())
    }

    fn check_ndims(&self, ndims: usize) -> Result<()> {
        if ndims == self.ndims() {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "event has {ndims} coordinates, workspace has {} dimensions",
                self.ndims()
            )))
        }
    }

    fn insert_raw(
        &mut self,
        coords: &[f64],
        signal: f64,
        error_sq: f64,
        run_index: u16,
        detector_id: i32,
    ) {
        debug_assert!(
            self.boxes[0].contains(coords),
            "event {coords:?} outside workspace bounds"
        );
        let leaf = self.leaf_for(coords);
        if let BoxContent::Leaf(events) = &mut self.boxes[leaf].content {
            events.push_raw(coords, signal, error_sq, run_index, detector_id);
        }
    }

    /// Arena index of the leaf whose cell holds `coords`.
    fn leaf_for(&self, coords: &[f64]) -> usize {
        let split_into = self.controller.split_into;
        let mut id = 0;
        loop {
            let md_box = &self.boxes[id];
            match md_box.content {
                BoxContent::Leaf(_) => return id,
                BoxContent::Interior { first_child, .. } => {
                    id = first_child + child_offset(md_box.min(), md_box.max(), split_into, coords);
                }
            }
        }
    }

    /// Splits box `id` and its descendants wherever the controller says so.
    ///
    /// Interior boxes are never re-split; their children are visited. A leaf
    /// that splits has its new children visited as well, so one call can
    /// cascade several levels. A leaf too narrow to cut into distinct
    /// floating-point intervals stays a leaf. Returns the number of splits
    /// performed.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if a split would create a
    /// degenerate child or finds an event outside its leaf.
    pub fn split_box_if_needed(&mut self, id: BoxId) -> Result<usize> {
        if id.0 >= self.boxes.len() {
            return Err(Error::InvalidArgument(format!("no box with id {}", id.0)));
        }
        let mut splits = 0;
        let mut stack = vec![id.0];
        while let Some(current) = stack.pop() {
            let md_box = &self.boxes[current];
            let children = match &md_box.content {
                BoxContent::Interior { first_child, count } => Some((*first_child, *count)),
                BoxContent::Leaf(events)
                    if self.controller.will_split(events.len(), md_box.depth())
                        && divisible(md_box.min(), md_box.max(), self.controller.split_into) =>
                {
                    splits += 1;
                    Some(self.split_box(current)?)
                }
                BoxContent::Leaf(_) => None,
            };
            if let Some((first_child, count)) = children {
                stack.extend(first_child..first_child + count);
            }
        }
        Ok(splits)
    }

    /// Runs [`Self::split_box_if_needed`] from the root.
    ///
    /// # Errors
    /// See [`Self::split_box_if_needed`].
    pub fn split_all_if_needed(&mut self) -> Result<usize> {
        let splits = self.split_box_if_needed(BoxId::ROOT)?;
        if splits > 0 {
            log::debug!(
                "split {splits} boxes, workspace now has {} boxes",
                self.boxes.len()
            );
        }
        Ok(splits)
    }

    /// Turns leaf `id` into an interior box with `split_into^ndims` children.
    ///
    /// Returns the arena range of the new children.
    fn split_box(&mut self, id: usize) -> Result<(usize, usize)> {
        let split_into = self.controller.split_into;
        let ndims = self.ndims();
        let count = self.controller.children_per_split(ndims)?;

        let parent = &self.boxes[id];
        let (pmin, pmax, depth) = (parent.min_coords(), parent.max_coords(), parent.depth());
        let BoxContent::Leaf(events) = &parent.content else {
            return Err(Error::InvariantViolation(format!(
                "box {id} is already split"
            )));
        };

        // validate and bucket events before mutating anything
        let mut targets = Vec::with_capacity(events.len());
        for idx in 0..events.len() {
            let coords = events.coords_of(idx);
            if !contains(&pmin, &pmax, coords) {
                return Err(Error::InvariantViolation(format!(
                    "event {coords:?} lies outside box {id} {:?}..{:?}",
                    pmin.as_slice(),
                    pmax.as_slice()
                )));
            }
            targets.push(child_offset(&pmin, &pmax, split_into, coords));
        }

        let mut children = Vec::with_capacity(count);
        for linear in 0..count {
            let mut cmin = pmin;
            let mut cmax = pmax;
            let mut rem = linear;
            for d in 0..ndims {
                let cell = rem % split_into;
                rem /= split_into;
                cmin[d] = grid_edge(pmin[d], pmax[d], split_into, cell);
                cmax[d] = grid_edge(pmin[d], pmax[d], split_into, cell + 1);
                if cmin[d] >= cmax[d] {
                    return Err(Error::InvariantViolation(format!(
                        "child {linear} of box {id} has min {} >= max {} in dimension {d}",
                        cmin[d], cmax[d]
                    )));
                }
            }
            children.push(MdBox::new_leaf(cmin, cmax, depth + 1));
        }

        for (idx, &target) in targets.iter().enumerate() {
            if let BoxContent::Leaf(child_events) = &mut children[target].content {
                child_events.push_from(events, idx);
            }
        }

        let first_child = self.boxes.len();
        self.boxes[id].content = BoxContent::Interior { first_child, count };
        self.boxes.extend(children);
        Ok((first_child, count))
    }

    /// Recomputes cached signal, squared error and event counts bottom-up.
    pub fn refresh_cache(&mut self) {
        for id in (0..self.boxes.len()).rev() {
            let (signal, error_sq, num_events) = match &self.boxes[id].content {
                BoxContent::Leaf(events) => {
                    let (signal, error_sq) = events.totals();
                    (signal, error_sq, events.len())
                }
                BoxContent::Interior { first_child, count } => self.boxes
                    [*first_child..*first_child + *count]
                    .iter()
                    .fold((0.0, 0.0, 0), |(s, e, n), child| {
                        (s + child.signal, e + child.error_sq, n + child.num_events)
                    }),
            };
            let md_box = &mut self.boxes[id];
            md_box.signal = signal;
            md_box.error_sq = error_sq;
            md_box.num_events = num_events;
        }
    }

    /// Events whose coordinates fall in the region `[min, max)`.
    ///
    /// Only boxes overlapping the region are visited.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the region has the wrong dimensionality.
    pub fn events_in_region(&self, min: &[f64], max: &[f64]) -> Result<Vec<EventRef<'_>>> {
        self.check_region(min, max)?;
        let mut found = Vec::new();
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            let md_box = &self.boxes[id];
            if !md_box.overlaps(min, max) {
                continue;
            }
            match &md_box.content {
                BoxContent::Leaf(events) => {
                    found.extend(events.iter().filter(|e| contains(min, max, e.coords)));
                }
                BoxContent::Interior { first_child, count } => {
                    stack.extend(*first_child..*first_child + *count);
                }
            }
        }
        Ok(found)
    }

    /// Total signal and squared error of the events in `[min, max)`.
    ///
    /// Boxes lying completely inside the region contribute their cached
    /// totals, so the cache must be fresh.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the region has the wrong dimensionality.
    pub fn integrate_region(&self, min: &[f64], max: &[f64]) -> Result<(f64, f64)> {
        self.check_region(min, max)?;
        let (mut signal, mut error_sq) = (0.0, 0.0);
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            let md_box = &self.boxes[id];
            if !md_box.overlaps(min, max) {
                continue;
            }
            if md_box.is_within(min, max) {
                signal += md_box.signal;
                error_sq += md_box.error_sq;
                continue;
            }
            match &md_box.content {
                BoxContent::Leaf(events) => {
                    for event in events.iter().filter(|e| contains(min, max, e.coords)) {
                        signal += event.signal;
                        error_sq += event.error_sq;
                    }
                }
                BoxContent::Interior { first_child, count } => {
                    stack.extend(*first_child..*first_child + *count);
                }
            }
        }
        Ok((signal, error_sq))
    }

    fn check_region(&self, min: &[f64], max: &[f64]) -> Result<()> {
        if min.len() != self.ndims() || max.len() != self.ndims() {
            return Err(Error::InvalidArgument(format!(
                "region has {}/{} bounds, workspace has {} dimensions",
                min.len(),
                max.len(),
                self.ndims()
            )));
        }
        Ok(())
    }

    /// Verifies the structural invariants of the tree.
    ///
    /// Checks that every event lies in its leaf, that children tile their
    /// parent exactly, and that cached totals match their descendants.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] describing the first broken invariant.
    #[allow(clippy::float_cmp)]
    pub fn check_invariants(&self) -> Result<()> {
        let split_into = self.controller.split_into;
        for (id, md_box) in self.boxes.iter().enumerate() {
            match &md_box.content {
                BoxContent::Leaf(events) => {
                    if let Some(event) = events.iter().find(|e| !md_box.contains(e.coords)) {
                        return Err(Error::InvariantViolation(format!(
                            "event {:?} outside leaf {id}",
                            event.coords
                        )));
                    }
                    let (signal, error_sq) = events.totals();
                    check_cached(id, md_box, signal, error_sq, events.len())?;
                }
                BoxContent::Interior { first_child, count } => {
                    let children = &self.boxes[*first_child..*first_child + *count];
                    for (linear, child) in children.iter().enumerate() {
                        let mut rem = linear;
                        for d in 0..self.ndims() {
                            let cell = rem % split_into;
                            rem /= split_into;
                            let lo = grid_edge(md_box.min()[d], md_box.max()[d], split_into, cell);
                            let hi =
                                grid_edge(md_box.min()[d], md_box.max()[d], split_into, cell + 1);
                            if child.min()[d] != lo || child.max()[d] != hi {
                                return Err(Error::InvariantViolation(format!(
                                    "child {linear} of box {id} does not tile dimension {d}"
                                )));
                            }
                        }
                        if child.depth() != md_box.depth() + 1 {
                            return Err(Error::InvariantViolation(format!(
                                "child {linear} of box {id} has depth {}",
                                child.depth()
                            )));
                        }
                    }
                    let (signal, error_sq, n) =
                        children.iter().fold((0.0, 0.0, 0), |(s, e, n), c| {
                            (s + c.signal, e + c.error_sq, n + c.num_events)
                        });
                    check_cached(id, md_box, signal, error_sq, n)?;
                }
            }
        }
        Ok(())
    }
}

fn check_cached(id: usize, md_box: &MdBox, signal: f64, error_sq: f64, n: usize) -> Result<()> {
    let close = |a: f64, b: f64| (a - b).abs() <= CACHE_TOLERANCE * a.abs().max(b.abs()).max(1.0);
    if !close(md_box.signal, signal) || !close(md_box.error_sq, error_sq) || md_box.num_events != n
    {
        return Err(Error::InvariantViolation(format!(
            "stale cache in box {id}: cached ({}, {}, {}), actual ({signal}, {error_sq}, {n})",
            md_box.signal, md_box.error_sq, md_box.num_events
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn workspace_2d(split_into: usize, threshold: usize, max_depth: usize) -> MdEventWorkspace {
        let dims = vec![
            MdDimension::new("x", "m", 0.0, 10.0).unwrap(),
            MdDimension::new("y", "m", 0.0, 10.0).unwrap(),
        ];
        let bc = BoxController::new(split_into, threshold, max_depth).unwrap();
        MdEventWorkspace::new(dims, Arc::new(bc)).unwrap()
    }

    fn event(x: f64, y: f64, signal: f64) -> MdEvent {
        MdEvent::new(Coords::from_slice(&[x, y]).unwrap(), signal, signal, 0, 1)
    }

    #[test]
    fn test_new_workspace_is_single_leaf() {
        let ws = workspace_2d(2, 4, 3);
        assert_eq!(ws.num_boxes(), 1);
        assert!(ws.root().is_leaf());
        assert_eq!(ws.root().min(), &[0.0, 0.0]);
        assert_eq!(ws.root().max(), &[10.0, 10.0]);
    }

    #[test]
    fn test_add_event_dimension_mismatch() {
        let mut ws = workspace_2d(2, 4, 3);
        let bad = MdEvent::new(Coords::from_slice(&[1.0]).unwrap(), 1.0, 1.0, 0, 0);
        assert!(matches!(ws.add_event(&bad), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_split_partitions_events() {
        let mut ws = workspace_2d(2, 2, 5);
        for (x, y) in [(1.0, 1.0), (6.0, 1.0), (1.0, 6.0), (6.0, 6.0), (7.0, 7.0)] {
            ws.add_event(&event(x, y, 1.0)).unwrap();
        }
        let splits = ws.split_all_if_needed().unwrap();
        assert_eq!(splits, 1);
        assert!(!ws.root().is_leaf());
        assert_eq!(ws.num_boxes(), 5);

        let counts: Vec<usize> = ws.root().children().map(|c| ws.get_box(c).unwrap().num_events()).collect();
        assert_eq!(counts, vec![1, 1, 1, 2]);

        ws.refresh_cache();
        ws.check_invariants().unwrap();
    }

    #[test]
    fn test_split_cascades_and_respects_max_depth() {
        let mut ws = workspace_2d(2, 1, 3);
        for i in 0..4 {
            ws.add_event(&event(0.1 + f64::from(i) * 0.01, 0.1, 1.0)).unwrap();
        }
        ws.split_all_if_needed().unwrap();
        assert_eq!(ws.max_leaf_depth(), 3);
        let (_, deepest) = ws.leaves().find(|(_, b)| b.num_events() == 4).unwrap();
        assert_eq!(deepest.depth(), 3);
    }

    #[test]
    fn test_identical_events_stop_at_float_resolution() {
        let mut ws = workspace_2d(2, 1, 200);
        for _ in 0..3 {
            ws.add_event(&event(7.5, 2.5, 1.0)).unwrap();
        }
        let splits = ws.split_all_if_needed().unwrap();
        assert!(splits > 10 && splits < 200);
        ws.refresh_cache();
        ws.check_invariants().unwrap();

        let (_, leaf) = ws.leaves().find(|(_, b)| b.num_events() == 3).unwrap();
        assert!(leaf.depth() < 200);
        assert!(!divisible(leaf.min(), leaf.max(), 2));
        assert_eq!(ws.split_all_if_needed().unwrap(), 0);
    }

    #[test]
    fn test_max_depth_zero_never_splits() {
        let mut ws = workspace_2d(2, 1, 0);
        for i in 0..10 {
            ws.add_event(&event(f64::from(i), 5.0, 1.0)).unwrap();
        }
        assert_eq!(ws.split_all_if_needed().unwrap(), 0);
        assert!(ws.root().is_leaf());
    }

    #[test]
    fn test_split_rejects_out_of_bounds_event() {
        let mut ws = workspace_2d(2, 1, 3);
        ws.add_event(&event(1.0, 1.0, 1.0)).unwrap();
        // bypass the debug containment check by writing to the root leaf directly
        if let BoxContent::Leaf(events) = &mut ws.boxes[0].content {
            events.push_raw(&[11.0, 1.0], 1.0, 1.0, 0, 2);
        }
        assert!(matches!(
            ws.split_all_if_needed(),
            Err(Error::InvariantViolation(_))
        ));
        assert!(ws.root().is_leaf());
    }

    #[test]
    fn test_refresh_cache_sums() {
        let mut ws = workspace_2d(3, 2, 4);
        let mut expected = 0.0;
        for i in 0..50 {
            let v = f64::from(i);
            let signal = 0.5 + v * 0.1;
            expected += signal;
            ws.add_event(&event((v * 0.37) % 10.0, (v * 0.71) % 10.0, signal)).unwrap();
        }
        ws.split_all_if_needed().unwrap();
        ws.refresh_cache();
        assert_relative_eq!(ws.root_signal(), expected, max_relative = 1e-12);
        assert_eq!(ws.root().num_events(), 50);
        ws.check_invariants().unwrap();
    }

    #[test]
    fn test_stale_cache_detected() {
        let mut ws = workspace_2d(2, 10, 3);
        ws.add_event(&event(1.0, 1.0, 2.0)).unwrap();
        assert!(ws.check_invariants().is_err());
        ws.refresh_cache();
        assert!(ws.check_invariants().is_ok());
    }

    #[test]
    fn test_region_queries() {
        let mut ws = workspace_2d(2, 1, 4);
        for (x, y, s) in [(1.0, 1.0, 1.0), (2.0, 2.0, 2.0), (8.0, 8.0, 4.0), (9.0, 1.0, 8.0)] {
            ws.add_event(&event(x, y, s)).unwrap();
        }
        ws.split_all_if_needed().unwrap();
        ws.refresh_cache();

        let found = ws.events_in_region(&[0.0, 0.0], &[5.0, 5.0]).unwrap();
        assert_eq!(found.len(), 2);

        let (signal, _) = ws.integrate_region(&[0.0, 0.0], &[10.0, 5.0]).unwrap();
        assert_relative_eq!(signal, 11.0);
        let (signal, error_sq) = ws.integrate_region(&[0.0, 0.0], &[10.0, 10.0]).unwrap();
        assert_relative_eq!(signal, 15.0);
        assert_relative_eq!(error_sq, 15.0);

        assert!(ws.integrate_region(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_experiment_info_indices() {
        let mut ws = workspace_2d(2, 1, 1);
        assert_eq!(ws.add_experiment_info(ExperimentInfo::default()).unwrap(), 0);
        assert_eq!(ws.add_experiment_info(ExperimentInfo::default()).unwrap(), 1);
        assert_eq!(ws.experiment_infos().len(), 2);
    }
}
