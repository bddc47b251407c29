//! Server and client configuration.

use circum_core::{TrackerConfig, TrackerKind};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default TCP port for endpoints and services.
pub const DEFAULT_PORT: u16 = 8300;

/// Default upper bound on a frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// TCP keep-alive probing, so dead peers are noticed without traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe (default: 1s)
    pub idle: Duration,

    /// Time between probes (default: 1s)
    pub interval: Duration,

    /// Unanswered probes before the connection is dropped (default: 5)
    pub retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(1),
            interval: Duration::from_secs(1),
            retries: 5,
        }
    }
}

/// Configuration for an [`EndpointServer`](crate::EndpointServer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Advertised instance name; random `circum-xxxxxxxx` when unset
    pub name: Option<String>,

    /// Address to bind; every local IPv4 address when unset
    pub interface: Option<IpAddr>,

    /// Listening port, 0 for an ephemeral one (default: 8300)
    pub port: u16,

    /// Sensor polling period, must be non-zero (default: 500ms)
    pub poll_interval: Duration,

    /// Bound on a single subscriber write (default: 2s)
    pub write_timeout: Duration,

    pub keepalive: KeepaliveConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: None,
            interface: None,
            port: DEFAULT_PORT,
            poll_interval: Duration::from_millis(500),
            write_timeout: Duration::from_secs(2),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// Configuration for an [`AggregationService`](crate::AggregationService)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Advertised instance name; random `circum-xxxxxxxx` when unset
    pub name: Option<String>,

    /// Address to bind; every local IPv4 address when unset
    pub interface: Option<IpAddr>,

    /// Listening port, 0 for an ephemeral one (default: 8300)
    pub port: u16,

    /// Endpoint instance names to fuse; empty accepts every endpoint
    pub endpoints: Vec<String>,

    /// Association strategy (default: kalman)
    pub tracker: TrackerKind,

    pub tracking: TrackerConfig,

    /// Maximum accepted association distance for the kalman strategy (default: 10)
    pub gating_threshold: f64,

    /// Bound on an incoming frame body (default: 16 MiB)
    pub max_frame_length: usize,

    /// Bound on a single subscriber write (default: 2s)
    pub write_timeout: Duration,

    /// Bound on connecting to a discovered endpoint (default: 2s)
    pub connect_timeout: Duration,

    pub keepalive: KeepaliveConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: None,
            interface: None,
            port: DEFAULT_PORT,
            endpoints: Vec::new(),
            tracker: TrackerKind::default(),
            tracking: TrackerConfig::default(),
            gating_threshold: 10.0,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            write_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

/// Configuration for a downstream client of an aggregation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service instance names to follow; empty accepts the first one found
    pub services: Vec<String>,

    pub max_frame_length: usize,

    /// Bound on connecting to a discovered service (default: 2s)
    pub connect_timeout: Duration,

    pub keepalive: KeepaliveConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            connect_timeout: Duration::from_secs(2),
            keepalive: KeepaliveConfig::default(),
        }
    }
}
