//! Circum Node
//!
//! Building blocks for the `circum-node` binary:
//! - [`SimulatedSensor`]: a seeded synthetic sensor for endpoints without hardware
//! - [`run_client`]: a downstream consumer that logs an aggregation service's tracks
//!
//! The endpoint and aggregation roles themselves live in `circum_net`.

pub mod client;
pub mod simulator;

pub use client::{follow, log_tracks, run_client};
pub use simulator::{SimulatedSensor, SimulatorConfig};
