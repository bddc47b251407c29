//! Circum Environment Abstraction Layer
//!
//! This crate holds everything the tracking engines and network services
//! need from the outside world, behind small traits:
//! - Monotonic time (`now()`) via [`CircumContext`]
//! - Sensor snapshots via [`SensorSource`]
//! - Sensor placement via [`PoseProvider`]
//!
//! It also defines the wire documents exchanged between endpoints,
//! aggregation services and clients.
//!
//! # Example
//!
//! ```ignore
//! use circum_env::{CircumContext, SensorSource};
//!
//! fn sample<Ctx: CircumContext>(ctx: &Ctx, source: &mut dyn SensorSource) {
//!     if let Some(snapshot) = source.poll() {
//!         publish(ctx.now(), snapshot);
//!     }
//! }
//! ```

mod context;
mod manual;
mod sensor;
mod system_impl;
mod types;

pub use context::CircumContext;
pub use manual::ManualContext;
pub use sensor::{PoseProvider, SensorSource, StaticPose};
pub use system_impl::SystemContext;
pub use types::{EndpointSnapshot, FusedSnapshot, Pose, Position, ServiceRole, TrackReport};
