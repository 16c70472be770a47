/// Lifecycle of a predictive track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Created from a pair of orphan spots, not yet matched to a prediction
    #[default]
    Nucleated,
    /// Matched to a spot in the current frame
    Tracking,
    /// Missed in one or more consecutive frames
    Occluded,
    /// Missed for longer than the allowed gap, removed from tracking
    Dead,
}

impl TrackState {
    pub fn is_alive(self) -> bool {
        self != TrackState::Dead
    }
}
