//! The "ESTIMATION" Engine - Constant-Velocity Kalman Filter
//!
//! Each tracked object carries its own filter over the 6-D state
//! `[x, y, z, vx, vy, vz]`. Sensors only measure position, so the filter
//! is what turns a sequence of noisy fixes into a velocity estimate and a
//! prediction of where the object will be on the next cycle.

use nalgebra::{Matrix3, Matrix3x6, Matrix6, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tuning for the constant-velocity filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanConfig {
    /// Per-axis acceleration noise used to build Q(dt) (default: 5, 5, 5)
    pub acceleration_noise: [f64; 3],

    /// Measurement noise variance on each position axis (default: 0.01)
    pub measurement_noise: f64,

    /// Initial position variance: the first fix is trusted (default: 1)
    pub initial_position_variance: f64,

    /// Initial velocity variance: the initial zero velocity is not (default: 1000)
    pub initial_velocity_variance: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            acceleration_noise: [5.0, 5.0, 5.0],
            measurement_noise: 0.01,
            initial_position_variance: 1.0,
            initial_velocity_variance: 1000.0,
        }
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised by the estimation math.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("Innovation covariance is singular")]
    SingularInnovation,
}

// ============================================================================
// KALMAN FILTER (linear core)
// ============================================================================

/// Linear Kalman filter over a 6-D state with 3-D measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalmanFilter {
    /// State estimate x
    state: Vector6<f64>,

    /// Error covariance P
    covariance: Matrix6<f64>,

    /// State transition F
    transition: Matrix6<f64>,

    /// Process noise Q
    process_noise: Matrix6<f64>,
}

impl KalmanFilter {
    /// Create a filter with identity transition and zero process noise.
    pub fn new(state: Vector6<f64>, covariance: Matrix6<f64>) -> Self {
        Self {
            state,
            covariance,
            transition: Matrix6::identity(),
            process_noise: Matrix6::zeros(),
        }
    }

    /// Embed `dt` in the position ← velocity terms of F.
    pub fn set_transition_dt(&mut self, dt: f64) {
        self.transition[(0, 3)] = dt; // x += vx * dt
        self.transition[(1, 4)] = dt; // y += vy * dt
        self.transition[(2, 5)] = dt; // z += vz * dt
    }

    pub fn set_process_noise(&mut self, q: Matrix6<f64>) {
        self.process_noise = q;
    }

    /// Prediction Step
    ///
    /// x' = F x
    /// P' = F P Fᵀ + Q
    pub fn predict(&mut self) {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
    }

    /// Correction Step
    ///
    /// K = P Hᵀ (H P Hᵀ + R)⁻¹
    /// x = x + K (z - H x)
    /// P = (I - K H) P
    ///
    /// Leaves the filter untouched if the innovation covariance cannot be inverted.
    pub fn correct(
        &mut self,
        measurement: &Vector3<f64>,
        observation: &Matrix3x6<f64>,
        measurement_noise: &Matrix3<f64>,
    ) -> Result<(), FilterError> {
        let innovation = measurement - observation * self.state;
        let pht = self.covariance * observation.transpose();
        let s = observation * pht + measurement_noise;

        let s_inv = s.try_inverse().ok_or(FilterError::SingularInnovation)?;
        let gain = pht * s_inv;

        self.state += gain * innovation;
        self.covariance = (Matrix6::identity() - gain * observation) * self.covariance;
        Ok(())
    }

    pub fn state(&self) -> &Vector6<f64> {
        &self.state
    }

    pub fn covariance(&self) -> &Matrix6<f64> {
        &self.covariance
    }
}

// ============================================================================
// MOTION MODEL WRAPPER
// ============================================================================

/// Build the constant-velocity process noise Q(dt).
///
/// Per axis with acceleration noise `a`:
/// ```text
/// [ a·dt⁴/4   a·dt³/2 ]
/// [ a·dt³/2   a·dt²   ]
/// ```
pub fn process_noise(dt: f64, acceleration_noise: &[f64; 3]) -> Matrix6<f64> {
    let dt2 = dt * dt;
    let dt3 = dt2 * dt;
    let dt4 = dt3 * dt;

    let mut q = Matrix6::zeros();
    for (axis, a) in acceleration_noise.iter().enumerate() {
        q[(axis, axis)] = dt4 * a / 4.0;
        q[(axis, axis + 3)] = dt3 * a / 2.0;
        q[(axis + 3, axis)] = dt3 * a / 2.0;
        q[(axis + 3, axis + 3)] = dt2 * a;
    }
    q
}

/// Position-only observation matrix H = [I₃ 0].
pub fn position_observation() -> Matrix3x6<f64> {
    Matrix3x6::new(
        1.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
    )
}

/// A Kalman filter driven by wall-clock time.
///
/// Remembers when it was last predicted or corrected so the next prediction
/// can size F and Q from the elapsed interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantVelocityFilter {
    filter: KalmanFilter,
    timestamp: Duration,
    acceleration_noise: [f64; 3],
    measurement_noise: Matrix3<f64>,
}

impl ConstantVelocityFilter {
    /// Start a filter at `position` with zero velocity.
    pub fn start(position: Vector3<f64>, now: Duration, config: &KalmanConfig) -> Self {
        let state = Vector6::new(position.x, position.y, position.z, 0.0, 0.0, 0.0);
        let p = config.initial_position_variance;
        let v = config.initial_velocity_variance;
        let covariance = Matrix6::from_diagonal(&Vector6::new(p, p, p, v, v, v));

        Self {
            filter: KalmanFilter::new(state, covariance),
            timestamp: now,
            acceleration_noise: config.acceleration_noise,
            measurement_noise: Matrix3::identity() * config.measurement_noise,
        }
    }

    /// Advance the state to `now`.
    pub fn predict(&mut self, now: Duration) {
        let dt = now.saturating_sub(self.timestamp).as_secs_f64();
        self.timestamp = now;

        self.filter.set_transition_dt(dt);
        self.filter
            .set_process_noise(process_noise(dt, &self.acceleration_noise));
        self.filter.predict();
    }

    /// Fold a position measurement taken at `now` into the estimate.
    pub fn update(&mut self, measurement: &Vector3<f64>, now: Duration) -> Result<(), FilterError> {
        self.filter
            .correct(measurement, &position_observation(), &self.measurement_noise)?;
        self.timestamp = now;
        Ok(())
    }

    #[inline]
    pub fn position(&self) -> Vector3<f64> {
        self.filter.state().fixed_rows::<3>(0).into()
    }

    #[inline]
    pub fn velocity(&self) -> Vector3<f64> {
        self.filter.state().fixed_rows::<3>(3).into()
    }

    pub fn covariance(&self) -> &Matrix6<f64> {
        self.filter.covariance()
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }
}
