//! Collaborator traits: where snapshots and poses come from.

use crate::types::{EndpointSnapshot, Pose};

/// A source of full sensor snapshots.
///
/// # Implementations
///
/// - **Hardware**: vendor drivers (outside this workspace)
/// - **Synthetic**: `circum_node::SimulatedSensor`
///
/// Positions are expressed in the sensor's own frame; the endpoint applies
/// the configured [`Pose`] before publishing.
pub trait SensorSource: Send {
    /// Driver type advertised in discovery metadata (e.g. `"simulator"`).
    fn driver(&self) -> &str;

    /// Returns the newest snapshot, or `None` if nothing changed since the
    /// previous poll.
    fn poll(&mut self) -> Option<EndpointSnapshot>;
}

/// Supplies the sensor's placement in the world frame.
pub trait PoseProvider: Send + Sync {
    fn pose(&self) -> Pose;
}

/// A pose fixed at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPose(pub Pose);

impl StaticPose {
    pub fn new(pose: Pose) -> Self {
        Self(pose)
    }
}

impl PoseProvider for StaticPose {
    fn pose(&self) -> Pose {
        self.0
    }
}
