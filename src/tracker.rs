mod frame_linker;
mod kalman_filter;
mod kalman_tracker;
mod lap_tracker;
mod segment_cost_matrix;
mod segment_linker;
mod segment_splitter;
mod settings;
mod track_state;

pub use frame_linker::SparseLapFrameLinker;
pub use kalman_filter::{KalmanFilter, KalmanNoise};
pub use kalman_tracker::KalmanTracker;
pub use lap_tracker::SparseLapTracker;
pub use segment_cost_matrix::{SegmentCostMatrixCreator, SegmentEvent};
pub use segment_linker::SegmentLinker;
pub use segment_splitter::SegmentSplitter;
pub use settings::{
    EventLinking, FrameLinkingSettings, FrameRange, GapClosing, KalmanTrackerSettings,
    LapTrackerSettings, SegmentLinkingSettings, SettingValue, Settings, TrackerSettings, keys,
};
pub use track_state::TrackState;
