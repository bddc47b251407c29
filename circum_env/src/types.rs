//! Common types for the Circum environment abstraction.
//!
//! These are the documents carried inside each length-prefixed frame:
//! endpoints publish [`EndpointSnapshot`]s, aggregation services publish
//! [`FusedSnapshot`]s.

use serde::{Deserialize, Serialize};

/// A world-frame position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns the position as an `[x, y, z]` array.
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Position {
    fn from(p: [f64; 3]) -> Self {
        Self::new(p[0], p[1], p[2])
    }
}

/// Placement of a sensor in the world frame.
///
/// Translation in meters, rotations in degrees. `yaw` rotates about X,
/// `pitch` about Y and `roll` about Z; they are applied in that order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Pose {
    /// Builds a pose from `[x, y, z, yaw, pitch, roll]`.
    pub fn from_array(p: [f64; 6]) -> Self {
        Self {
            x: p[0],
            y: p[1],
            z: p[2],
            yaw: p[3],
            pitch: p[4],
            roll: p[5],
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.z, self.yaw, self.pitch, self.roll]
    }
}

/// One full sensor reading as published by an endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub objects: Vec<Position>,
}

impl EndpointSnapshot {
    pub fn new(objects: Vec<Position>) -> Self {
        Self { objects }
    }
}

/// A tracked object as published by an aggregation service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Track identity, stable across cycles while association succeeds
    pub id: u64,
}

/// The fused, identity-stable view published by an aggregation service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FusedSnapshot {
    pub objects: Vec<TrackReport>,
}

/// Role a process advertises under service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Exposes one sensor's output
    Endpoint,
    /// Fuses several endpoints into one tracked view
    Service,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::Endpoint => "endpoint",
            ServiceRole::Service => "service",
        }
    }

    /// The multicast-DNS service type, e.g. `_endpoint._sub._circum._tcp.local.`
    pub fn service_type(&self) -> String {
        format!("_{}._sub._circum._tcp.local.", self.as_str())
    }
}

impl std::fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
