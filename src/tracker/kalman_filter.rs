//! Constant-velocity Kalman filter in 3-D, using ndarray and a nalgebra-based inverse.

use ndarray::{Array1, Array2};

use crate::error::{Result, TrackingError};

const NDIM: usize = 3;

/// Standard deviations of the process and measurement noise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanNoise {
    pub position_process_std: f64,
    pub velocity_process_std: f64,
    pub position_measurement_std: f64,
}

/// Filter model shared by every track. The per-track state (mean and
/// covariance) is passed in and returned, never stored here.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    process_cov: Array2<f64>,
    measurement_cov: Array2<f64>,
    initial_variance: f64,
}

impl KalmanFilter {
    pub fn new(noise: KalmanNoise) -> Self {
        let mut motion_mat = Array2::eye(2 * NDIM);
        for i in 0..NDIM {
            motion_mat[[i, NDIM + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((NDIM, 2 * NDIM));
        for i in 0..NDIM {
            update_mat[[i, i]] = 1.0;
        }

        let mut process_cov = Array2::zeros((2 * NDIM, 2 * NDIM));
        for i in 0..NDIM {
            process_cov[[i, i]] = noise.position_process_std.powi(2);
            process_cov[[NDIM + i, NDIM + i]] = noise.velocity_process_std.powi(2);
        }

        let measurement_cov =
            Array2::eye(NDIM) * noise.position_measurement_std * noise.position_measurement_std;

        Self {
            motion_mat,
            update_mat,
            process_cov,
            measurement_cov,
            initial_variance: 10.0,
        }
    }

    /// Initial state from a position and a velocity.
    pub fn initiate(&self, position: [f64; 3], velocity: [f64; 3]) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(2 * NDIM);
        for i in 0..NDIM {
            mean[i] = position[i];
            mean[NDIM + i] = velocity[i];
        }
        let covariance = Array2::eye(2 * NDIM) * self.initial_variance;
        (mean, covariance)
    }

    /// One step ahead. Does not touch the inputs.
    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let new_mean = self.motion_mat.dot(mean);
        let new_covariance =
            self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + &self.process_cov;
        (new_mean, new_covariance)
    }

    /// Corrects a prediction with a measured position. Without a
    /// measurement the prediction is returned as the new state.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: Option<[f64; 3]>,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let Some(measurement) = measurement else {
            return Ok((mean.clone(), covariance.clone()));
        };

        let projected_mean = self.update_mat.dot(mean);
        let innovation_cov =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + &self.measurement_cov;
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1, with H = [I 0] so P * H^T is the first 3 columns of P.
        let s_inv = invert_3x3(&innovation_cov)?;
        let kalman_gain = covariance.dot(&self.update_mat.t()).dot(&s_inv);

        let new_mean = mean + &kalman_gain.dot(&innovation);
        let new_covariance = covariance - &kalman_gain.dot(&innovation_cov).dot(&kalman_gain.t());
        Ok((new_mean, new_covariance))
    }
}

/// Position part of a state vector.
pub fn position_of(mean: &Array1<f64>) -> [f64; 3] {
    [mean[0], mean[1], mean[2]]
}

/// Inverts a 3x3 matrix with nalgebra (pure Rust).
fn invert_3x3(m: &Array2<f64>) -> Result<Array2<f64>> {
    let mut nm = nalgebra::Matrix3::zeros();
    for i in 0..NDIM {
        for j in 0..NDIM {
            nm[(i, j)] = m[[i, j]];
        }
    }
    let inv = nm.try_inverse().ok_or_else(|| {
        TrackingError::Filter("innovation covariance is not invertible".to_string())
    })?;
    let mut res = Array2::zeros((NDIM, NDIM));
    for i in 0..NDIM {
        for j in 0..NDIM {
            res[[i, j]] = inv[(i, j)];
        }
    }
    Ok(res)
}
