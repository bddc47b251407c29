//! Circum Core - Multi-Sensor Object Tracking
//!
//! The math behind the fusion service:
//! 1. **World Frame**: sensor-local positions projected through a 6-DOF pose
//! 2. **Persistent Identity**: a track registry that keeps ids stable across cycles
//! 3. **Estimation**: constant-velocity Kalman filters with optimal (Hungarian) assignment

pub mod assignment;
pub mod circum_association;
pub mod circum_kalman;
pub mod circum_tracking;
pub mod circum_transform;

// Re-export key types for convenience
pub use circum_association::{
    Association, AssociationStrategy, KalmanAssociation, NearestNeighbor, TrackerKind,
};
pub use circum_kalman::{ConstantVelocityFilter, FilterError, KalmanConfig, KalmanFilter};
pub use circum_tracking::{
    CycleReport, ObjectTracker, Observation, TrackedObject, TrackerConfig, TrackingEngine,
    TrackingError,
};
pub use circum_transform::{pose_matrix, transform_points, transform_positions};
