use thiserror::Error;

/// Errors raised by the linkers.
///
/// Empty inputs and cancellation are not errors; see
/// [`Outcome`](crate::integration::Outcome).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Cost matrix error: {0}")]
    Matrix(String),
    #[error("Solver error: {0}")]
    Solver(String),
    #[error("Kalman filter error: {0}")]
    Filter(String),
    #[error("Not enough memory: {0}")]
    NotEnoughMemory(String),
}

pub type Result<T> = std::result::Result<T, TrackingError>;
