//! Circum node CLI
//!
//! Runs one role of the fan-in / fan-out network: a simulated sensor
//! endpoint, an aggregation service, or a demo client.

use anyhow::{Context, Result};
use circum_core::{TrackerConfig, TrackerKind};
use circum_env::{CircumContext, Pose, StaticPose, SystemContext};
use circum_net::{AggregationService, ClientConfig, Discovery, EndpointConfig, EndpointServer, ServiceConfig, DEFAULT_PORT};
use circum_node::{run_client, SimulatedSensor, SimulatorConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Circum sensor fan-in / fan-out node
#[derive(Parser, Debug)]
#[command(name = "circum-node")]
#[command(about = "Stream, fuse and follow 3D object positions over the local network", long_about = None)]
struct Args {
    /// Verbose output (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a simulated sensor as an endpoint
    Endpoint(EndpointArgs),
    /// Fuse discovered endpoints into tracks
    Service(ServiceArgs),
    /// Log the tracks published by a service
    Client(ClientArgs),
}

#[derive(clap::Args, Debug)]
struct EndpointArgs {
    /// Advertised name (random if omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Address to bind (every IPv4 address if omitted)
    #[arg(short, long)]
    interface: Option<IpAddr>,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Sensor pose in the world frame, rotations in degrees
    #[arg(long, num_args = 6, value_names = ["X", "Y", "Z", "YAW", "PITCH", "ROLL"], allow_negative_numbers = true)]
    pose: Option<Vec<f64>>,

    /// Polling and simulation period in seconds
    #[arg(long, default_value = "0.5")]
    interval: f64,

    /// Number of simulated objects (0 = random between 1 and 4)
    #[arg(long, default_value = "0")]
    objects: usize,

    /// Simulation seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Standard deviation of position noise in meters
    #[arg(long, default_value = "0.0")]
    noise: f64,
}

#[derive(clap::Args, Debug)]
struct ServiceArgs {
    /// Advertised name (random if omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Address to bind (every IPv4 address if omitted)
    #[arg(short, long)]
    interface: Option<IpAddr>,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Endpoint to fuse; repeat for several (every endpoint if omitted)
    #[arg(short, long = "endpoint")]
    endpoints: Vec<String>,

    #[arg(short, long, value_enum, default_value_t = TrackerArg::Kalman)]
    tracker: TrackerArg,

    /// Seconds after which an unseen track is dropped
    #[arg(long, default_value = "5")]
    deletion_threshold: f64,

    /// Maximum association distance for the kalman tracker
    #[arg(long, default_value = "10")]
    gating_threshold: f64,
}

#[derive(clap::Args, Debug)]
struct ClientArgs {
    /// Service to follow; repeat for several (first found if omitted)
    #[arg(short, long = "service")]
    services: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TrackerArg {
    Kalman,
    Nearest,
}

impl From<TrackerArg> for TrackerKind {
    fn from(arg: TrackerArg) -> Self {
        match arg {
            TrackerArg::Kalman => TrackerKind::Kalman,
            TrackerArg::Nearest => TrackerKind::Nearest,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    match args.command {
        Command::Endpoint(args) => run_endpoint(args, shutdown).await,
        Command::Service(args) => run_service(args, shutdown).await,
        Command::Client(args) => {
            let discovery = Discovery::new().context("Failed to start mDNS discovery")?;
            let result = run_client(ClientConfig { services: args.services, ..Default::default() }, &discovery, shutdown).await;
            discovery.shutdown();
            Ok(result?)
        }
    }
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupted, shutting down"),
        Err(e) => error!("failed to listen for ctrl-c: {e}"),
    }
    shutdown.cancel();
}

/// Endpoints and services still serve by address when mDNS is unavailable.
fn optional_discovery() -> Option<Discovery> {
    match Discovery::new() {
        Ok(discovery) => Some(discovery),
        Err(e) => {
            warn!("mDNS unavailable, running without discovery: {e}");
            None
        }
    }
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {what}: {value}"))
}

/// Like [`seconds`], for periods that must not be zero.
fn period(value: f64, what: &str) -> Result<Duration> {
    let duration = seconds(value, what)?;
    if duration.is_zero() {
        anyhow::bail!("{what} must be positive, got {value}");
    }
    Ok(duration)
}

async fn run_endpoint(args: EndpointArgs, shutdown: CancellationToken) -> Result<()> {
    let pose = match args.pose {
        Some(values) => {
            let values: [f64; 6] = values
                .try_into()
                .map_err(|v: Vec<f64>| anyhow::anyhow!("pose needs 6 values, got {}", v.len()))?;
            Pose::from_array(values)
        }
        None => Pose::default(),
    };
    let interval = period(args.interval, "interval")?;

    let config = EndpointConfig {
        name: args.name,
        interface: args.interface,
        port: args.port,
        poll_interval: interval,
        ..Default::default()
    };

    let context: Arc<dyn CircumContext> = SystemContext::shared();
    let sensor = SimulatedSensor::new(
        SimulatorConfig {
            objects: args.objects,
            step_interval: interval,
            seed: args.seed,
            noise_std: args.noise,
        },
        context,
    );

    let discovery = optional_discovery();
    let mut server = EndpointServer::bind(config).await.context("Failed to bind endpoint")?;
    if let Some(discovery) = &discovery {
        server = server.with_discovery(discovery.clone());
    }
    info!(name = server.name(), port = server.port(), ?pose, "starting endpoint");

    let result = server.run(Box::new(sensor), Arc::new(StaticPose::new(pose)), shutdown).await;
    if let Some(discovery) = discovery {
        discovery.shutdown();
    }
    Ok(result?)
}

async fn run_service(args: ServiceArgs, shutdown: CancellationToken) -> Result<()> {
    let config = ServiceConfig {
        name: args.name,
        interface: args.interface,
        port: args.port,
        endpoints: args.endpoints,
        tracker: args.tracker.into(),
        tracking: TrackerConfig {
            deletion_threshold: seconds(args.deletion_threshold, "deletion threshold")?,
            ..Default::default()
        },
        gating_threshold: args.gating_threshold,
        ..Default::default()
    };

    let discovery = optional_discovery();
    let mut service = AggregationService::bind(config, SystemContext::shared())
        .await
        .context("Failed to bind aggregation service")?;
    if let Some(discovery) = &discovery {
        service = service.with_discovery(discovery.clone());
    }
    info!(name = service.name(), port = service.port(), tracker = %TrackerKind::from(args.tracker), "starting service");

    let result = service.run(shutdown).await;
    if let Some(discovery) = discovery {
        discovery.shutdown();
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_endpoint_pose_accepts_negatives() {
        let args = Args::try_parse_from([
            "circum-node", "endpoint", "--pose", "1", "-2", "3", "0", "-90", "45", "--seed", "9",
        ])
        .unwrap();

        let Command::Endpoint(endpoint) = args.command else {
            panic!("expected endpoint subcommand");
        };
        assert_eq!(endpoint.pose, Some(vec![1.0, -2.0, 3.0, 0.0, -90.0, 45.0]));
        assert_eq!(endpoint.seed, Some(9));
        assert_eq!(endpoint.port, DEFAULT_PORT);
    }

    #[test]
    fn test_service_flags() {
        let args = Args::try_parse_from([
            "circum-node", "-v", "service", "-e", "left", "-e", "right", "--tracker", "nearest",
        ])
        .unwrap();

        assert!(args.verbose);
        let Command::Service(service) = args.command else {
            panic!("expected service subcommand");
        };
        assert_eq!(service.endpoints, vec!["left", "right"]);
        assert_eq!(TrackerKind::from(service.tracker), TrackerKind::Nearest);
        assert_eq!(service.deletion_threshold, 5.0);
    }

    #[test]
    fn test_short_pose_is_rejected() {
        let result = Args::try_parse_from(["circum-node", "endpoint", "--pose", "1", "2", "3"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_seconds_rejects_negative() {
        assert_eq!(seconds(0.5, "interval").unwrap(), Duration::from_millis(500));
        assert!(seconds(-1.0, "interval").is_err());
        assert_eq!(seconds(0.0, "deletion threshold").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_period_rejects_zero() {
        assert_eq!(period(0.25, "interval").unwrap(), Duration::from_millis(250));
        assert!(period(0.0, "interval").is_err());
        assert!(period(-0.5, "interval").is_err());
        // Rounds down to zero nanoseconds
        assert!(period(1e-12, "interval").is_err());
    }
}
