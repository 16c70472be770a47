//! Predictive tracker: one constant-velocity Kalman filter per track, one
//! LAP per frame between predictions and detections.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;

use log::{debug, info, warn};
use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::integration::{
    CancellationToken, EdgeCreator, EdgeSink, LinkingReport, NoProgress, Outcome,
    ProgressListener, Spot, SpotCollection, SpotId,
};
use crate::linking::{
    Assignment, JaqamanLinker, LinkingCostMatrixCreator, Positioned, SquareDistanceCostFunction,
};
use crate::tracker::kalman_filter::{KalmanFilter, KalmanNoise, position_of};
use crate::tracker::settings::KalmanTrackerSettings;
use crate::tracker::track_state::TrackState;

const ALTERNATIVE_COST_FACTOR: f64 = 1.05;
const PERCENTILE: f64 = 1.0;
const MIN_MEASUREMENT_STD: f64 = 1e-3;

/// A live track: filter state plus the last spot it was linked to.
#[derive(Debug, Clone)]
struct Track {
    state: TrackState,
    mean: Array1<f64>,
    covariance: Array2<f64>,
    last_spot: SpotId,
    occlusions: usize,
}

/// Predicted position of a track, used as LAP source.
#[derive(Debug, Clone, Copy)]
struct Prediction {
    track: usize,
    position: [f64; 3],
}

impl Positioned for Prediction {
    fn position(&self) -> [f64; 3] {
        self.position
    }
}

impl PartialEq for Prediction {
    fn eq(&self, other: &Self) -> bool {
        self.track == other.track
    }
}

impl Eq for Prediction {}

impl PartialOrd for Prediction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prediction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.track.cmp(&other.track)
    }
}

type Links = Vec<(SpotId, SpotId, f64)>;

pub struct KalmanTracker<'a, G> {
    spots: &'a SpotCollection,
    graph: &'a G,
    settings: KalmanTrackerSettings,
    cancel: CancellationToken,
    progress: &'a dyn ProgressListener,
}

impl<'a, G: EdgeCreator> KalmanTracker<'a, G> {
    pub fn new(spots: &'a SpotCollection, graph: &'a G, settings: KalmanTrackerSettings) -> Self {
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

    /// Tracks every frame of the range in order. Links are buffered per
    /// frame and only written once the last frame is processed.
    pub fn process(&self) -> Result<Outcome<LinkingReport>> {
        self.settings.validate()?;
        if self.cancel.is_canceled() {
            warn!("Kalman tracking canceled before start");
            return Ok(self.cancel.canceled_outcome());
        }

        let Some(batches) = self.track()? else {
            warn!("Kalman tracking canceled, no link written");
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
        info!("Kalman tracking done: {} links", report.links);
        Ok(Outcome::Completed(report))
    }

    fn noise(&self, mean_radius: Option<f64>) -> KalmanNoise {
        let process_std = self.settings.max_search_radius / 3.0;
        let measurement_std = self
            .settings
            .position_sigma
            .or_else(|| mean_radius.map(|r| r / 10.0))
            .unwrap_or(MIN_MEASUREMENT_STD)
            .max(MIN_MEASUREMENT_STD);
        KalmanNoise {
            position_process_std: process_std,
            velocity_process_std: process_std,
            position_measurement_std: measurement_std,
        }
    }

    fn track(&self) -> Result<Option<Vec<Links>>> {
        let spots = self.spots.read();
        let Some(range) = self.settings.frame_range.resolve(spots.frame_range()) else {
            info!("No spots to track");
            return Ok(Some(Vec::new()));
        };
        let noise = self.noise(spots.mean_radius(range.clone()));
        debug!("Kalman noise: {:?}", noise);
        let filter = KalmanFilter::new(noise);

        let search_threshold = self.settings.max_search_radius.powi(2);
        let initial_threshold = self.settings.initial_search_radius.powi(2);
        let total = frame_count(&range);
        info!(
            "Kalman tracking of {} spots over {} frames",
            spots.len(),
            total
        );

        let mut tracks: BTreeMap<usize, Track> = BTreeMap::new();
        let mut next_track = 0;
        let mut previous_orphans: Vec<&Spot> = Vec::new();
        let mut batches = Vec::new();

        for (k, t) in range.enumerate() {
            if self.cancel.is_canceled() {
                return Ok(None);
            }
            let current: Vec<&Spot> = spots.frame(t).iter().collect();
            let mut links = Links::new();

            // Predict every live track. The stored state is left untouched.
            let predicted: BTreeMap<usize, (Array1<f64>, Array2<f64>)> = tracks
                .iter()
                .map(|(&id, track)| (id, filter.predict(&track.mean, &track.covariance)))
                .collect();
            let sources: Vec<Prediction> = predicted
                .iter()
                .map(|(&track, (mean, _))| Prediction {
                    track,
                    position: position_of(mean),
                })
                .collect();

            let assignment = link(&sources, &current, search_threshold)?;
            let mut absorbed = HashSet::new();
            for (id, (mean, covariance)) in predicted {
                let Some(track) = tracks.get_mut(&id) else {
                    continue;
                };
                let key = Prediction {
                    track: id,
                    position: position_of(&mean),
                };
                match assignment.target(&key) {
                    Some(spot) => {
                        let (mean, covariance) =
                            filter.update(&mean, &covariance, Some(spot.position))?;
                        let cost = assignment.cost(&key).unwrap_or(0.0);
                        links.push((track.last_spot, spot.id, cost));
                        absorbed.insert(spot.id);
                        track.mean = mean;
                        track.covariance = covariance;
                        track.last_spot = spot.id;
                        track.occlusions = 0;
                        track.state = TrackState::Tracking;
                    }
                    None => {
                        let (mean, covariance) = filter.update(&mean, &covariance, None)?;
                        track.mean = mean;
                        track.covariance = covariance;
                        track.occlusions += 1;
                        track.state = if track.occlusions > self.settings.max_frame_gap {
                            TrackState::Dead
                        } else {
                            TrackState::Occluded
                        };
                    }
                }
            }
            let before = tracks.len();
            tracks.retain(|_, track| track.state.is_alive());
            let died = before - tracks.len();

            // Pair last frame's orphans with this frame's into new tracks.
            let mut orphans: Vec<&Spot> = current
                .into_iter()
                .filter(|s| !absorbed.contains(&s.id))
                .collect();
            let nucleations = link(&previous_orphans, &orphans, initial_threshold)?;
            for (source, target, cost) in nucleations.iter() {
                let velocity = [
                    target.position[0] - source.position[0],
                    target.position[1] - source.position[1],
                    target.position[2] - source.position[2],
                ];
                let (mean, covariance) = filter.initiate(target.position, velocity);
                tracks.insert(
                    next_track,
                    Track {
                        state: TrackState::Nucleated,
                        mean,
                        covariance,
                        last_spot: target.id,
                        occlusions: 0,
                    },
                );
                next_track += 1;
                links.push((source.id, target.id, cost));
            }
            orphans.retain(|s| {
                !nucleations
                    .iter()
                    .any(|(_, target, _)| target.id == s.id)
            });

            debug!(
                "Frame {}: {} links, {} new tracks, {} dead tracks, {} live tracks, {} orphans",
                t,
                links.len(),
                nucleations.len(),
                died,
                tracks.len(),
                orphans.len()
            );
            previous_orphans = orphans;
            if !links.is_empty() {
                batches.push(links);
            }
            self.progress.progress(k + 1, total);
        }
        Ok(Some(batches))
    }
}

/// Square-distance LAP between `sources` and `targets`.
/// Number of frames in `range`, saturating on targets where it does not
/// fit a `usize`.
fn frame_count(range: &RangeInclusive<i32>) -> usize {
    let span = i64::from(*range.end()) - i64::from(*range.start()) + 1;
    usize::try_from(span.max(0)).unwrap_or(usize::MAX)
}

fn link<'s, S>(
    sources: &[S],
    targets: &[&'s Spot],
    threshold: f64,
) -> Result<Assignment<S, &'s Spot>>
where
    S: Positioned + Ord + Clone,
{
    if sources.is_empty() || targets.is_empty() {
        return Ok(Assignment::default());
    }
    let creator = LinkingCostMatrixCreator::new(
        sources,
        targets,
        &SquareDistanceCostFunction,
        threshold,
        ALTERNATIVE_COST_FACTOR,
        PERCENTILE,
    );
    JaqamanLinker::new(creator).process()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::TrackGraph;

    fn settings() -> KalmanTrackerSettings {
        KalmanTrackerSettings {
            initial_search_radius: 5.0,
            max_search_radius: 5.0,
            max_frame_gap: 2,
            ..Default::default()
        }
    }

    /// One object moving at (1, 0.5) per frame, detected at frames `frames`.
    fn moving(frames: &[i32]) -> SpotCollection {
        frames
            .iter()
            .map(|&t| Spot::new(t as u64 + 1, t, [t as f64, 0.5 * t as f64, 0.0]))
            .collect()
    }

    fn run(spots: &SpotCollection, settings: KalmanTrackerSettings) -> (LinkingReport, TrackGraph) {
        let graph = TrackGraph::new();
        let report = KalmanTracker::new(spots, &graph, settings)
            .process()
            .unwrap()
            .completed()
            .unwrap();
        (report, graph)
    }

    #[test]
    fn test_follows_constant_velocity() {
        let spots = moving(&[0, 1, 2, 3, 4]);
        let (report, graph) = run(&spots, settings());
        assert_eq!(report.links, 4);
        for id in 1..5 {
            assert!(graph.contains_edge(SpotId(id), SpotId(id + 1)));
        }
    }

    #[test]
    fn test_bridges_gap_up_to_max_frame_gap() {
        // Missing at frames 3 and 4: two missed frames.
        let spots = moving(&[0, 1, 2, 5, 6]);
        let (report, graph) = run(&spots, settings());
        assert_eq!(report.links, 4);
        assert!(graph.contains_edge(SpotId(3), SpotId(6)));
    }

    #[test]
    fn test_track_dies_after_max_frame_gap() {
        // Missing at frames 3, 4 and 5: one frame too many.
        let spots = moving(&[0, 1, 2, 6, 7]);
        let (report, graph) = run(&spots, settings());
        assert!(!graph.contains_edge(SpotId(3), SpotId(7)));
        // The reappearing object nucleates a new track.
        assert!(graph.contains_edge(SpotId(7), SpotId(8)));
        assert_eq!(report.links, 3);
    }

    #[test]
    fn test_two_crossing_objects_keep_identity() {
        // Two objects crossing paths at x = 5 with opposite velocities.
        let mut all = Vec::new();
        for t in 0..10 {
            let x = t as f64;
            all.push(Spot::new(100 + t as u64, t, [x, x, 0.0]));
            all.push(Spot::new(200 + t as u64, t, [x, 10.0 - x, 0.3]));
        }
        let spots: SpotCollection = all.into_iter().collect();
        let (report, graph) = run(&spots, settings());
        assert_eq!(report.links, 18);
        for t in 0..9 {
            assert!(graph.contains_edge(SpotId(100 + t), SpotId(101 + t)));
            assert!(graph.contains_edge(SpotId(200 + t), SpotId(201 + t)));
        }
    }

    #[test]
    fn test_measurement_noise_defaults_to_mean_radius() {
        let spots = moving(&[0, 1]);
        let graph = TrackGraph::new();
        let tracker = KalmanTracker::new(&spots, &graph, settings());
        let noise = tracker.noise(Some(2.0));
        assert_eq!(noise.position_measurement_std, 0.2);
        assert_eq!(noise.position_process_std, 5.0 / 3.0);
        assert_eq!(tracker.noise(Some(0.0)).position_measurement_std, 1e-3);

        let sigma = KalmanTrackerSettings {
            position_sigma: Some(0.7),
            ..settings()
        };
        let tracker = KalmanTracker::new(&spots, &graph, sigma);
        assert_eq!(tracker.noise(Some(2.0)).position_measurement_std, 0.7);
    }

    #[test]
    fn test_frame_count_covers_the_whole_i32_range() {
        assert_eq!(frame_count(&(3..=3)), 1);
        assert_eq!(frame_count(&(-2..=5)), 8);
        let full = i64::from(i32::MAX) - i64::from(i32::MIN) + 1;
        assert_eq!(frame_count(&(i32::MIN..=i32::MAX)) as i64, full);
    }

    #[test]
    fn test_empty_input_and_cancellation() {
        let spots = SpotCollection::new();
        let (report, graph) = run(&spots, settings());
        assert_eq!(report, LinkingReport::default());
        assert_eq!(graph.edge_count(), 0);

        let spots = moving(&[0, 1, 2]);
        let graph = TrackGraph::new();
        let cancel = CancellationToken::new();
        cancel.cancel("stop");
        let outcome = KalmanTracker::new(&spots, &graph, settings())
            .with_cancellation(cancel)
            .process()
            .unwrap();
        assert!(outcome.is_canceled());
        assert_eq!(graph.edge_count(), 0);
    }
}
