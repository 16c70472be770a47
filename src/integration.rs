//! Integration module: the objects trackers consume and the graph they write into.
//!
//! This module provides the spot source, the edge sink traits, progress and
//! cancellation plumbing, and a pipeline selecting a tracker from settings.

mod builder;
mod graph;
mod pipeline;
mod progress;
mod spot;

pub use builder::SpotBuilder;
pub use graph::{Edge, EdgeCreator, EdgeSink, GraphWriter, TrackGraph};
pub use pipeline::TrackingPipeline;
pub use progress::{CancellationToken, LinkingReport, NoProgress, Outcome, ProgressListener};
pub use spot::{Spot, SpotCollection, SpotId, SpotsRead};
