//! Second pass: gap closing, splitting and merging between track segments.

use log::{debug, info, warn};

use crate::error::Result;
use crate::integration::{
    CancellationToken, Edge, EdgeCreator, EdgeSink, LinkingReport, NoProgress, Outcome,
    ProgressListener, Spot, SpotCollection,
};
use crate::linking::JaqamanLinker;
use crate::tracker::segment_cost_matrix::{SegmentCostMatrixCreator, SegmentEvent};
use crate::tracker::segment_splitter::SegmentSplitter;
use crate::tracker::settings::{FrameRange, SegmentLinkingSettings};

/// Links the segments already present in the graph with one global LAP.
/// All accepted links are written in a single batch.
///
/// Only links whose two spots lie within the frame range take part in the
/// segments.
pub struct SegmentLinker<'a, G> {
    spots: &'a SpotCollection,
    graph: &'a G,
    settings: SegmentLinkingSettings,
    frame_range: FrameRange,
    cancel: CancellationToken,
    progress: &'a dyn ProgressListener,
}

impl<'a, G: EdgeCreator> SegmentLinker<'a, G> {
    pub fn new(spots: &'a SpotCollection, graph: &'a G, settings: SegmentLinkingSettings) -> Self {
        Self {
            spots,
            graph,
            settings,
            frame_range: FrameRange::default(),
            cancel: CancellationToken::default(),
            progress: &NoProgress,
        }
    }

    pub fn with_frame_range(mut self, frame_range: FrameRange) -> Self {
        self.frame_range = frame_range;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressListener) -> Self {
        self.progress = progress;
        self
    }

    pub fn process(&self) -> Result<Outcome<LinkingReport>> {
        self.settings.validate()?;
        self.frame_range.validate()?;
        if !self.settings.any_enabled() {
            warn!("Segment linking skipped: gap closing, splitting and merging are all disabled");
            return Ok(Outcome::Completed(LinkingReport::default()));
        }
        if self.cancel.is_canceled() {
            warn!("Segment linking canceled before start");
            return Ok(self.cancel.canceled_outcome());
        }

        let spots = self.spots.read();
        let edges: Vec<Edge> = match self.frame_range.resolve(spots.frame_range()) {
            Some(range) => {
                let in_range = |id| spots.get(id).is_some_and(|s: &Spot| range.contains(&s.frame));
                self.graph
                    .edges()
                    .into_iter()
                    .filter(|e| in_range(e.source) && in_range(e.target))
                    .collect()
            }
            None => Vec::new(),
        };
        let find_middle_points =
            self.settings.splitting.is_enabled() || self.settings.merging.is_enabled();
        let splitter = SegmentSplitter::new(&edges, &spots, find_middle_points);
        info!("Segment linking over {} segments", splitter.len());
        self.progress.status("Linking track segments");

        let creator = SegmentCostMatrixCreator::new(&splitter, &self.settings);
        let assignment = JaqamanLinker::new(&creator).process()?;
        self.progress.progress(1, 1);

        if self.cancel.is_canceled() {
            warn!("Segment linking canceled, no link written");
            return Ok(self.cancel.canceled_outcome());
        }

        let mut report = LinkingReport::default();
        let mut sink = self.graph.pre_addition();
        for (source, target, cost) in assignment.iter() {
            if !sink.create_edge(source.id, target.id, cost) {
                debug!("Link {:?} -> {:?} already present", source.id, target.id);
                continue;
            }
            match creator.classify(source, target) {
                SegmentEvent::GapClosing => report.gap_closings += 1,
                SegmentEvent::Splitting => report.splits += 1,
                SegmentEvent::Merging => report.merges += 1,
            }
        }
        drop(sink);

        info!(
            "Segment linking done: {} gap closings, {} splits, {} merges",
            report.gap_closings, report.splits, report.merges
        );
        Ok(Outcome::Completed(report))
    }
}
