//! Sparse linear-assignment particle tracking.
//!
//! Detections (spots) are linked frame to frame by solving a sparse LAP
//! per pair of consecutive frames, then track segments are joined by a
//! second LAP pass that closes gaps and detects splits and merges. A
//! Kalman-filter based tracker uses the same solver once per frame.

pub mod error;
pub mod integration;
pub mod linking;
pub mod tracker;

pub use error::{Result, TrackingError};
pub use integration::{
    CancellationToken, Edge, EdgeCreator, EdgeSink, LinkingReport, NoProgress, Outcome,
    ProgressListener, Spot, SpotBuilder, SpotCollection, SpotId, TrackGraph, TrackingPipeline,
};
pub use linking::{
    Assignment, CostFunction, CostMatrix, CostMatrixCreator, FeaturePenaltyCostFunction,
    JaqamanLinker, LinkingCostMatrixCreator, SparseCostMatrix, SquareDistanceCostFunction,
};
pub use tracker::{
    EventLinking, FrameLinkingSettings, FrameRange, GapClosing, KalmanTracker,
    KalmanTrackerSettings, LapTrackerSettings, SegmentLinker, SegmentLinkingSettings,
    SegmentSplitter, SettingValue, Settings, SparseLapFrameLinker, SparseLapTracker,
    TrackerSettings,
};
