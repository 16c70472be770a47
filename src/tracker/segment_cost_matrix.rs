//! Cost matrix of the second pass: gap closing, splitting and merging
//! candidates between track segments.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use crate::error::Result;
use crate::integration::{Spot, SpotId};
use crate::linking::{CostFunction, CostMatrix, CostMatrixCreator, SparseCostMatrix, SpotCostFunction};
use crate::tracker::segment_splitter::SegmentSplitter;
use crate::tracker::settings::{EventLinking, GapClosing, SegmentLinkingSettings};

/// Kind of link proposed between two segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Segment end to a later segment start.
    GapClosing,
    /// Interior point to a segment start one frame later.
    Splitting,
    /// Segment end to an interior point one frame later.
    Merging,
}

/// Builds the segment linking LAP from a [`SegmentSplitter`].
///
/// Rows are the distinct source spots and columns the distinct target
/// spots, in the order they are first proposed. Every row and column
/// shares the same alternative cost, the blocking value.
pub struct SegmentCostMatrixCreator<'s, 'a> {
    splitter: &'s SegmentSplitter<'a>,
    settings: &'s SegmentLinkingSettings,
}

impl<'s, 'a> SegmentCostMatrixCreator<'s, 'a> {
    pub fn new(splitter: &'s SegmentSplitter<'a>, settings: &'s SegmentLinkingSettings) -> Self {
        Self { splitter, settings }
    }

    /// Family of a link chosen by the solver.
    pub fn classify(&self, source: &Spot, target: &Spot) -> SegmentEvent {
        let is_start = self.splitter.segment_starts().iter().any(|s| s.id == target.id);
        let is_end = self.splitter.segment_ends().iter().any(|s| s.id == source.id);
        match (is_end, is_start) {
            (true, true) => SegmentEvent::GapClosing,
            (false, _) => SegmentEvent::Splitting,
            (true, false) => SegmentEvent::Merging,
        }
    }

    fn starts_by_frame(&self) -> BTreeMap<i32, Vec<&'a Spot>> {
        let mut by_frame: BTreeMap<i32, Vec<&'a Spot>> = BTreeMap::new();
        for &start in self.splitter.segment_starts() {
            by_frame.entry(start.frame).or_default().push(start);
        }
        by_frame
    }

    fn middles_by_frame(&self) -> BTreeMap<i32, Vec<&'a Spot>> {
        let mut by_frame: BTreeMap<i32, Vec<&'a Spot>> = BTreeMap::new();
        for &middle in self.splitter.segment_middles().iter().flatten() {
            by_frame.entry(middle.frame).or_default().push(middle);
        }
        by_frame
    }
}

/// Accumulates candidates, numbering rows and columns on first sight.
#[derive(Default)]
struct Candidates<'a> {
    sources: Vec<&'a Spot>,
    targets: Vec<&'a Spot>,
    rows: HashMap<SpotId, usize>,
    cols: HashMap<SpotId, usize>,
    triplets: Vec<(usize, usize, f64)>,
}

impl<'a> Candidates<'a> {
    fn push(&mut self, source: &'a Spot, target: &'a Spot, cost: f64) {
        let row = *self.rows.entry(source.id).or_insert_with(|| {
            self.sources.push(source);
            self.sources.len() - 1
        });
        let col = *self.cols.entry(target.id).or_insert_with(|| {
            self.targets.push(target);
            self.targets.len() - 1
        });
        self.triplets.push((row, col, cost));
    }

    /// Tries `source → target` for every target of the given frames.
    fn propose<'m>(
        &mut self,
        source: &'a Spot,
        candidates: impl Iterator<Item = (&'m i32, &'m Vec<&'a Spot>)>,
        cost_function: &SpotCostFunction,
        threshold: f64,
    ) where
        'a: 'm,
    {
        for (_, targets) in candidates {
            for &target in targets {
                let cost = cost_function.linking_cost(&source, &target);
                if cost < threshold {
                    self.push(source, target, cost);
                }
            }
        }
    }
}

impl<'a> CostMatrixCreator for SegmentCostMatrixCreator<'_, 'a> {
    type Source = &'a Spot;
    type Target = &'a Spot;

    fn create(&self) -> Result<Option<CostMatrix<&'a Spot, &'a Spot>>> {
        self.settings.validate()?;
        let Some(alternative_cost) = self.settings.alternative_cost() else {
            return Ok(None);
        };
        if self.splitter.is_empty() {
            return Ok(None);
        }

        let starts = self.starts_by_frame();
        let middles = self.middles_by_frame();
        let mut candidates = Candidates::default();
        let (mut n_gap, mut n_split, mut n_merge) = (0, 0, 0);

        if let GapClosing::Enabled {
            max_distance,
            max_frame_gap,
            feature_penalties,
        } = &self.settings.gap_closing
        {
            let cost_function = SpotCostFunction::from_penalties(feature_penalties);
            let threshold = max_distance * max_distance;
            let before = candidates.triplets.len();
            for &end in self.splitter.segment_ends() {
                let Some(next) = end.frame.checked_add(1) else {
                    continue;
                };
                let window = starts.range(next..=end.frame.saturating_add(*max_frame_gap));
                candidates.propose(end, window, &cost_function, threshold);
            }
            n_gap = candidates.triplets.len() - before;
        }

        if let EventLinking::Enabled {
            max_distance,
            feature_penalties,
        } = &self.settings.splitting
        {
            let cost_function = SpotCostFunction::from_penalties(feature_penalties);
            let threshold = max_distance * max_distance;
            let before = candidates.triplets.len();
            for &middle in self.splitter.segment_middles().iter().flatten() {
                let Some(next) = middle.frame.checked_add(1) else {
                    continue;
                };
                let window = starts.range(next..=next);
                candidates.propose(middle, window, &cost_function, threshold);
            }
            n_split = candidates.triplets.len() - before;
        }

        if let EventLinking::Enabled {
            max_distance,
            feature_penalties,
        } = &self.settings.merging
        {
            let cost_function = SpotCostFunction::from_penalties(feature_penalties);
            let threshold = max_distance * max_distance;
            let before = candidates.triplets.len();
            for &end in self.splitter.segment_ends() {
                let Some(next) = end.frame.checked_add(1) else {
                    continue;
                };
                let window = middles.range(next..=next);
                candidates.propose(end, window, &cost_function, threshold);
            }
            n_merge = candidates.triplets.len() - before;
        }

        debug!(
            "{} segments: {} gap closing, {} splitting and {} merging candidates",
            self.splitter.len(),
            n_gap,
            n_split,
            n_merge
        );
        if candidates.triplets.is_empty() {
            return Ok(None);
        }

        let Candidates {
            sources,
            targets,
            triplets,
            ..
        } = candidates;
        let matrix = SparseCostMatrix::from_triplets(sources.len(), targets.len(), triplets)?;
        CostMatrix::with_alternative_cost(matrix, sources, targets, alternative_cost).map(Some)
    }
}
