//! Two-stage sparse LAP tracker: frame-to-frame linking, then segment
//! linking.

use log::{info, warn};

use crate::error::Result;
use crate::integration::{
    CancellationToken, EdgeCreator, LinkingReport, NoProgress, Outcome, ProgressListener,
    SpotCollection,
};
use crate::tracker::frame_linker::SparseLapFrameLinker;
use crate::tracker::segment_linker::SegmentLinker;
use crate::tracker::settings::LapTrackerSettings;

pub struct SparseLapTracker<'a, G> {
    spots: &'a SpotCollection,
    graph: &'a G,
    settings: LapTrackerSettings,
    cancel: CancellationToken,
    progress: &'a dyn ProgressListener,
}

impl<'a, G: EdgeCreator> SparseLapTracker<'a, G> {
    pub fn new(spots: &'a SpotCollection, graph: &'a G, settings: LapTrackerSettings) -> Self {
        Self {
            spots,
            graph,
            settings,
            cancel: CancellationToken::default(),
            progress: &NoProgress,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressListener) -> Self {
        self.progress = progress;
        self
    }

    /// Runs both stages. The second stage only starts once the first one
    /// has written all its links, and is skipped when no event family is
    /// enabled.
    pub fn process(&self) -> Result<Outcome<LinkingReport>> {
        self.settings.validate()?;

        self.progress.status("Frame to frame linking");
        let links = SparseLapFrameLinker::new(self.spots, self.graph, self.settings.linking.clone())
            .with_cancellation(self.cancel.clone())
            .with_progress(self.progress)
            .process()?;
        let links = match links {
            Outcome::Completed(report) => report,
            Outcome::Canceled(reason) => {
                warn!("Tracking canceled during frame-to-frame linking: {}", reason);
                return Ok(Outcome::Canceled(reason));
            }
        };

        if !self.settings.segments.any_enabled() {
            info!("Tracking done: {} links, segment linking disabled", links.links);
            return Ok(Outcome::Completed(links));
        }

        let events = SegmentLinker::new(self.spots, self.graph, self.settings.segments.clone())
            .with_frame_range(self.settings.linking.frame_range)
            .with_cancellation(self.cancel.clone())
            .with_progress(self.progress)
            .process()?;
        let events = match events {
            Outcome::Completed(report) => report,
            Outcome::Canceled(reason) => {
                warn!("Tracking canceled during segment linking: {}", reason);
                return Ok(Outcome::Canceled(reason));
            }
        };

        let report = links.merge(events);
        info!("Tracking done: {} links in total", report.total());
        Ok(Outcome::Completed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingError;
    use crate::integration::{Spot, SpotId, TrackGraph};
    use crate::tracker::settings::{FrameRange, GapClosing};

    #[test]
    fn test_links_then_closes_gap() {
        // Object A present at every frame, object B missing at frame 2.
        let mut spots = Vec::new();
        for t in 0..5 {
            spots.push(Spot::new(10 + t as u64, t, [t as f64, 0.0, 0.0]));
            if t != 2 {
                spots.push(Spot::new(20 + t as u64, t, [t as f64, 40.0, 0.0]));
            }
        }
        let spots: SpotCollection = spots.into_iter().collect();
        let graph = TrackGraph::new();

        let report = SparseLapTracker::new(&spots, &graph, LapTrackerSettings::default())
            .process()
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.links, 6);
        assert_eq!(report.gap_closings, 1);
        assert!(graph.contains_edge(SpotId(21), SpotId(23)));
        assert_eq!(graph.edge_count(), 7);
    }

    #[test]
    fn test_segment_stage_skipped_when_disabled() {
        let spots: SpotCollection = vec![
            Spot::new(1, 0, [0.0, 0.0, 0.0]),
            Spot::new(2, 2, [1.0, 0.0, 0.0]),
            Spot::new(3, 3, [2.0, 0.0, 0.0]),
            Spot::new(4, 3, [50.0, 0.0, 0.0]),
            Spot::new(5, 5, [50.0, 1.0, 0.0]),
        ]
        .into_iter()
        .collect();
        let graph = TrackGraph::new();
        let mut settings = LapTrackerSettings::default();
        settings.segments.gap_closing = GapClosing::Disabled;
        let report = SparseLapTracker::new(&spots, &graph, settings)
            .process()
            .unwrap()
            .completed()
            .unwrap();
        // Only 2-3 are in consecutive frames; 1-2 and 4-5 would need gap closing.
        assert_eq!(report.links, 1);
        assert_eq!(report.gap_closings, 0);
        assert!(graph.contains_edge(SpotId(2), SpotId(3)));
        assert!(!graph.contains_edge(SpotId(1), SpotId(2)));
        assert!(!graph.contains_edge(SpotId(4), SpotId(5)));
    }

    #[test]
    fn test_invalid_range_fails_before_linking() {
        let spots: SpotCollection = vec![Spot::new(1, 0, [0.0, 0.0, 0.0])].into_iter().collect();
        let graph = TrackGraph::new();
        let mut settings = LapTrackerSettings::default();
        settings.linking.frame_range = FrameRange {
            min: Some(4),
            max: Some(1),
        };
        let res = SparseLapTracker::new(&spots, &graph, settings).process();
        assert!(matches!(res, Err(TrackingError::Config(_))));
        assert_eq!(graph.edge_count(), 0);
    }
}
