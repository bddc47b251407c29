//! Circum Net - Sensor Fan-In / Fan-Out over TCP
//!
//! Endpoints stream world-frame observations; aggregation services find them
//! over mDNS, fuse their latest snapshots into persistent tracks and stream
//! the tracks on to their own subscribers.
//!
//! # Wire Protocol
//!
//! `[i32 BE length][JSON document]`, see [`codec`].

pub mod codec;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod service;
pub mod socket;
pub mod subscribers;

// Re-export key types for convenience
pub use codec::{decode_body, encode_frame, read_frame, FrameCodec};
pub use config::{ClientConfig, EndpointConfig, KeepaliveConfig, ServiceConfig, DEFAULT_PORT};
pub use discovery::{Advertisement, Discovery, DiscoveryEvent, NameFilter, ServiceRecord};
pub use endpoint::EndpointServer;
pub use error::{CodecError, NetError};
pub use service::{AggregationService, FusionState};
pub use subscribers::SubscriberSet;
