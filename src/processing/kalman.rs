use nalgebra::{Matrix3, Matrix3x6, Matrix6, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Initial state variance; large so the first measurement dominates
const INITIAL_VARIANCE: f64 = 500.0;

/// Tuning of a [`PositionKalmanFilter`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParameters {
    /// Fixed step between successive updates (seconds)
    pub dt: f64,
    /// Isotropic process noise variance
    pub process_variance: f64,
    /// Isotropic measurement noise variance (m²)
    pub measurement_variance: f64,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            dt: 0.2,
            process_variance: 1e-3,
            measurement_variance: 1e-1,
        }
    }
}

/// Constant-velocity Kalman filter for smoothing tag fixes
/// State vector: [x, y, z, vx, vy, vz] (position and velocity)
///
/// The step `dt` is fixed. The filter must be run exactly once per tag
/// update; irregular update timing is absorbed as model mismatch.
#[derive(Debug, Clone)]
pub struct PositionKalmanFilter {
    /// Current state estimate [position, velocity]
    state: Vector6<f64>,
    /// State covariance matrix
    covariance: Matrix6<f64>,
    /// Constant-velocity state transition
    transition: Matrix6<f64>,
    /// Process noise covariance matrix
    process_noise: Matrix6<f64>,
    /// Measurement noise covariance matrix
    measurement_noise: Matrix3<f64>,
    dt: f64,
}

impl Default for PositionKalmanFilter {
    fn default() -> Self {
        Self::from_parameters(&FilterParameters::default())
    }
}

impl PositionKalmanFilter {
    pub fn new(dt: f64, process_variance: f64, measurement_variance: f64) -> Self {
        Self {
            state: Vector6::zeros(),
            covariance: Matrix6::identity() * INITIAL_VARIANCE,
            transition: Self::create_state_transition_matrix(dt),
            process_noise: Matrix6::identity() * process_variance,
            measurement_noise: Matrix3::identity() * measurement_variance,
            dt,
        }
    }

    pub fn from_parameters(parameters: &FilterParameters) -> Self {
        Self::new(parameters.dt, parameters.process_variance, parameters.measurement_variance)
    }

    /// Advance one step under the constant-velocity model
    pub fn predict(&mut self) -> Vector3<f64> {
        // x_k = F * x_{k-1}
        self.state = self.transition * self.state;
        // P_k = F * P_{k-1} * F^T + Q
        self.covariance = self.transition * self.covariance * self.transition.transpose() + self.process_noise;
        self.position()
    }

    /// Correct the state with a measured position
    pub fn update(&mut self, measurement: &Vector3<f64>) -> Vector3<f64> {
        // Measurement matrix (we observe position directly)
        let h = Matrix3x6::new(
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
        );
        let r = self.measurement_noise;

        // Innovation (measurement residual)
        let innovation = measurement - h * self.state;

        // Innovation covariance
        let s = h * self.covariance * h.transpose() + r;

        // A singular S means the state is already certain; keep the prediction
        if let Some(s_inv) = s.try_inverse() {
            let k = self.covariance * h.transpose() * s_inv;

            self.state += k * innovation;

            // Joseph form keeps the covariance symmetric positive semi-definite
            let i_kh = Matrix6::identity() - k * h;
            self.covariance = i_kh * self.covariance * i_kh.transpose() + k * r * k.transpose();
        }

        self.position()
    }

    /// Predict then update; returns the corrected position
    pub fn filter(&mut self, measurement: &Vector3<f64>) -> Vector3<f64> {
        self.predict();
        self.update(measurement)
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.state[0], self.state[1], self.state[2])
    }

    pub fn velocity(&self) -> Vector3<f64> {
        Vector3::new(self.state[3], self.state[4], self.state[5])
    }

    /// Position standard deviations
    pub fn position_uncertainty(&self) -> Vector3<f64> {
        Vector3::new(
            self.covariance[(0, 0)].sqrt(),
            self.covariance[(1, 1)].sqrt(),
            self.covariance[(2, 2)].sqrt(),
        )
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    fn create_state_transition_matrix(dt: f64) -> Matrix6<f64> {
        Matrix6::new(
            1.0, 0.0, 0.0, dt,  0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, dt,  0.0,
            0.0, 0.0, 1.0, 0.0, 0.0, dt,
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        )
    }
}
