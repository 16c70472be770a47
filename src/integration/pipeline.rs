//! TrackingPipeline for running a tracker from a flat settings map.

use log::info;

use crate::error::Result;
use crate::tracker::{KalmanTracker, Settings, SparseLapTracker, TrackerSettings};

use super::{
    CancellationToken, EdgeCreator, LinkingReport, NoProgress, Outcome, ProgressListener,
    SpotCollection,
};

/// Binds a spot source and an edge sink to whichever tracker the settings
/// select.
///
/// The pipeline can be run several times, for instance with different
/// settings on fresh graphs. Cancelling through [`cancellation_token`]
/// stops the current run.
///
/// [`cancellation_token`]: TrackingPipeline::cancellation_token
pub struct TrackingPipeline<'a, G: EdgeCreator> {
    spots: &'a SpotCollection,
    graph: &'a G,
    cancel: CancellationToken,
    progress: &'a dyn ProgressListener,
}

impl<'a, G: EdgeCreator> TrackingPipeline<'a, G> {
    /// Create a new pipeline over the given spots, writing into `graph`.
    pub fn new(spots: &'a SpotCollection, graph: &'a G) -> Self {
        Self {
            spots,
            graph,
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

    /// Token shared with the trackers this pipeline starts.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Parse `settings` and run the selected tracker.
    ///
    /// Configuration errors are returned before any spot is read.
    pub fn run(&self, settings: &Settings) -> Result<Outcome<LinkingReport>> {
        let typed = TrackerSettings::from_settings(settings)?;
        self.run_with(typed)
    }

    /// Run a tracker from already typed settings.
    pub fn run_with(&self, settings: TrackerSettings) -> Result<Outcome<LinkingReport>> {
        settings.validate()?;
        match settings {
            TrackerSettings::SparseLap(settings) => {
                info!("Running the sparse LAP tracker on {} spots", self.spots.len());
                SparseLapTracker::new(self.spots, self.graph, settings)
                    .with_cancellation(self.cancel.clone())
                    .with_progress(self.progress)
                    .process()
            }
            TrackerSettings::Kalman(settings) => {
                info!("Running the Kalman tracker on {} spots", self.spots.len());
                KalmanTracker::new(self.spots, self.graph, settings)
                    .with_cancellation(self.cancel.clone())
                    .with_progress(self.progress)
                    .process()
            }
        }
    }
}
