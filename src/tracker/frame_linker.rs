//! First pass: LAP linking between consecutive frames, all frame pairs in
//! parallel.

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::error::{Result, TrackingError};
use crate::integration::{
    CancellationToken, EdgeCreator, EdgeSink, LinkingReport, NoProgress, Outcome,
    ProgressListener, Spot, SpotCollection, SpotId,
};
use crate::linking::{JaqamanLinker, LinkingCostMatrixCreator, SpotCostFunction};
use crate::tracker::settings::FrameLinkingSettings;

type FrameLinks = Vec<(SpotId, SpotId, f64)>;

/// Links every spot of frame `t` to at most one spot of frame `t + 1`,
/// solving one LAP per frame pair. Pairs with an empty frame are skipped.
///
/// Nothing is written to the graph unless every frame pair was solved.
pub struct SparseLapFrameLinker<'a, G> {
    spots: &'a SpotCollection,
    graph: &'a G,
    settings: FrameLinkingSettings,
    cancel: CancellationToken,
    progress: &'a dyn ProgressListener,
}

impl<'a, G: EdgeCreator> SparseLapFrameLinker<'a, G> {
    pub fn new(spots: &'a SpotCollection, graph: &'a G, settings: FrameLinkingSettings) -> Self {
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

    pub fn process(&self) -> Result<Outcome<LinkingReport>> {
        self.settings.validate()?;
        if self.cancel.is_canceled() {
            warn!("Frame-to-frame linking canceled before start");
            return Ok(self.cancel.canceled_outcome());
        }

        let Some(batches) = self.solve_frame_pairs()? else {
            warn!("Frame-to-frame linking canceled, no link written");
            return Ok(self.cancel.canceled_outcome());
        };

        let mut report = LinkingReport::default();
        for batch in batches {
            let mut sink = self.graph.pre_addition();
            for (source, target, cost) in batch {
                if sink.create_edge(source, target, cost) {
                    report.links += 1;
                }
            }
        }
        info!("Frame-to-frame linking done: {} links", report.links);
        Ok(Outcome::Completed(report))
    }

    /// Solves every frame pair under one read lock. `None` if the run was
    /// canceled meanwhile.
    fn solve_frame_pairs(&self) -> Result<Option<Vec<FrameLinks>>> {
        let spots = self.spots.read();
        let Some(range) = self.settings.frame_range.resolve(spots.frame_range()) else {
            info!("No spots to link");
            return Ok(Some(Vec::new()));
        };
        let frames: Vec<(i32, Vec<&Spot>)> = spots
            .frames_in(range)
            .map(|(t, s)| (t, s.iter().collect()))
            .collect();
        // Only (t, t + 1) pairs: a missed frame is left to gap closing.
        let pairs: Vec<usize> = (0..frames.len().saturating_sub(1))
            .filter(|&k| frames[k].0.checked_add(1) == Some(frames[k + 1].0))
            .collect();
        let total = pairs.len();
        info!(
            "Frame-to-frame linking of {} spots over {} frame pairs",
            spots.len(),
            total
        );

        let cost_function = SpotCostFunction::from_penalties(&self.settings.feature_penalties);
        let threshold = self.settings.cost_threshold();
        let factor = self.settings.alternative_cost_factor;
        let cutoff = self.settings.cutoff_percentile;
        let cancel = &self.cancel;
        let progress = self.progress;
        let done = AtomicUsize::new(0);

        let link_pair = |k: usize| -> Result<Option<FrameLinks>> {
            if cancel.is_canceled() {
                return Ok(None);
            }
            let (t0, sources) = &frames[k];
            let (t1, targets) = &frames[k + 1];
            let creator = LinkingCostMatrixCreator::new(
                sources,
                targets,
                &cost_function,
                threshold,
                factor,
                cutoff,
            );
            let assignment = JaqamanLinker::new(creator).process()?;
            debug!(
                "Frames {} -> {}: {} links for {} x {} spots",
                t0,
                t1,
                assignment.len(),
                sources.len(),
                targets.len()
            );
            progress.progress(done.fetch_add(1, Ordering::SeqCst) + 1, total);
            Ok(Some(
                assignment
                    .into_iter()
                    .map(|(s, (t, cost))| (s.id, t.id, cost))
                    .collect(),
            ))
        };

        let results: Vec<Option<FrameLinks>> = match self.settings.num_threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| {
                        TrackingError::Config(format!("cannot start {} linking threads: {}", n, e))
                    })?;
                pool.install(|| {
                    pairs
                        .par_iter()
                        .map(|&k| link_pair(k))
                        .collect::<Result<Vec<_>>>()
                })?
            }
            None => pairs
                .par_iter()
                .map(|&k| link_pair(k))
                .collect::<Result<Vec<_>>>()?,
        };

        if self.cancel.is_canceled() {
            return Ok(None);
        }
        Ok(results.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::TrackGraph;
    use crate::tracker::settings::FrameRange;

    fn two_tracks() -> SpotCollection {
        let mut spots = Vec::new();
        let mut id = 0;
        for t in 0..4 {
            for y in [0.0, 20.0] {
                id += 1;
                spots.push(Spot::new(id, t, [t as f64, y, 0.0]));
            }
        }
        spots.into_iter().collect()
    }

    #[test]
    fn test_links_consecutive_frames() {
        let spots = two_tracks();
        let graph = TrackGraph::new();
        let outcome = SparseLapFrameLinker::new(&spots, &graph, FrameLinkingSettings::default())
            .process()
            .unwrap();
        assert_eq!(outcome.completed().map(|r| r.links), Some(6));
        assert!(graph.contains_edge(SpotId(1), SpotId(3)));
        assert!(graph.contains_edge(SpotId(2), SpotId(4)));
        assert!(!graph.contains_edge(SpotId(1), SpotId(4)));
        assert_eq!(graph.weight(SpotId(5), SpotId(7)), Some(1.0));
    }

    #[test]
    fn test_dedicated_pool_gives_same_links() {
        let spots = two_tracks();
        let global = TrackGraph::new();
        SparseLapFrameLinker::new(&spots, &global, FrameLinkingSettings::default())
            .process()
            .unwrap();
        let pooled = TrackGraph::new();
        let settings = FrameLinkingSettings {
            num_threads: Some(2),
            ..Default::default()
        };
        SparseLapFrameLinker::new(&spots, &pooled, settings)
            .process()
            .unwrap();
        let mut a: Vec<_> = global.edges().iter().map(|e| (e.source, e.target)).collect();
        let mut b: Vec<_> = pooled.edges().iter().map(|e| (e.source, e.target)).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_frame_range_restricts_linking() {
        let spots = two_tracks();
        let graph = TrackGraph::new();
        let settings = FrameLinkingSettings {
            frame_range: FrameRange::new(1, 2),
            ..Default::default()
        };
        let report = SparseLapFrameLinker::new(&spots, &graph, settings)
            .process()
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.links, 2);
        assert!(graph.contains_edge(SpotId(3), SpotId(5)));
    }

    #[test]
    fn test_empty_frame_is_not_bridged() {
        let spots: SpotCollection = vec![
            Spot::new(1, 0, [0.0, 0.0, 0.0]),
            Spot::new(2, 1, [1.0, 0.0, 0.0]),
            Spot::new(3, 3, [2.0, 0.0, 0.0]),
            Spot::new(4, 8, [2.0, 1.0, 0.0]),
        ]
        .into_iter()
        .collect();
        let graph = TrackGraph::new();
        let report = SparseLapFrameLinker::new(&spots, &graph, FrameLinkingSettings::default())
            .process()
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.links, 1);
        assert!(graph.contains_edge(SpotId(1), SpotId(2)));
        assert!(!graph.contains_edge(SpotId(2), SpotId(3)));
        assert!(!graph.contains_edge(SpotId(3), SpotId(4)));
    }

    #[test]
    fn test_far_spots_stay_unlinked() {
        let spots: SpotCollection = vec![
            Spot::new(1, 0, [0.0, 0.0, 0.0]),
            Spot::new(2, 1, [100.0, 0.0, 0.0]),
        ]
        .into_iter()
        .collect();
        let graph = TrackGraph::new();
        let report = SparseLapFrameLinker::new(&spots, &graph, FrameLinkingSettings::default())
            .process()
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.links, 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_canceled_run_writes_nothing() {
        let spots = two_tracks();
        let graph = TrackGraph::new();
        let cancel = CancellationToken::new();
        cancel.cancel("stop");
        let outcome = SparseLapFrameLinker::new(&spots, &graph, FrameLinkingSettings::default())
            .with_cancellation(cancel)
            .process()
            .unwrap();
        assert_eq!(outcome, Outcome::Canceled("stop".to_string()));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_invalid_settings_fail_before_linking() {
        let spots = two_tracks();
        let graph = TrackGraph::new();
        let settings = FrameLinkingSettings {
            cutoff_percentile: 1.5,
            ..Default::default()
        };
        let res = SparseLapFrameLinker::new(&spots, &graph, settings).process();
        assert!(matches!(res, Err(TrackingError::Config(_))));
    }
}
