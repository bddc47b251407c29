//! Aggregation service: discovery-driven fan-in, fusion, fan-out.
//!
//! One event loop owns the track registry and multiplexes:
//! 1. Subscriber accepts on every bound address
//! 2. Discovery events (connect to new endpoints, drop removed ones)
//! 3. Snapshots forwarded by per-endpoint reader tasks
//! 4. The shutdown signal
//!
//! Every snapshot replaces that endpoint's previous one; the union of all
//! latest snapshots is fed through the tracker and the resulting tracks are
//! broadcast to subscribers.

use crate::codec::{encode_frame, FrameCodec};
use crate::config::{KeepaliveConfig, ServiceConfig};
use crate::discovery::{
    advertised_addresses, random_instance_name, Advertisement, Discovery, DiscoveryEvent, NameFilter, ServiceRecord,
};
use crate::error::NetError;
use crate::socket::{accept_next, apply_keepalive, bind_all, candidate_addresses, connect_any};
use crate::subscribers::SubscriberSet;
use circum_core::{Observation, TrackingEngine};
use circum_env::{CircumContext, EndpointSnapshot, FusedSnapshot, ServiceRole};
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// FUSION STATE
// ============================================================================

/// Latest snapshot per endpoint plus the tracker they are fused into.
pub struct FusionState {
    latest: BTreeMap<String, EndpointSnapshot>,
    engine: Box<dyn TrackingEngine>,
}

impl FusionState {
    pub fn new(engine: Box<dyn TrackingEngine>) -> Self {
        Self {
            latest: BTreeMap::new(),
            engine,
        }
    }

    /// Record `endpoint`'s newest snapshot and run one tracking cycle over
    /// the union of all endpoints' latest snapshots.
    pub fn on_snapshot(&mut self, endpoint: &str, snapshot: EndpointSnapshot) -> FusedSnapshot {
        self.latest.insert(endpoint.to_string(), snapshot);

        let observations: Vec<Observation> = self
            .latest
            .values()
            .flat_map(|s| s.objects.iter().copied().map(Observation::from))
            .collect();

        let cycle = self.engine.update(&observations);
        debug!(
            endpoint,
            observations = observations.len(),
            tracks = self.engine.track_count(),
            created = cycle.created.len(),
            pruned = cycle.pruned.len(),
            "fused"
        );

        FusedSnapshot {
            objects: self.engine.reports(),
        }
    }

    /// Forget `endpoint`'s snapshot. Returns whether it had one.
    pub fn on_disconnect(&mut self, endpoint: &str) -> bool {
        self.latest.remove(endpoint).is_some()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.latest.keys().map(String::as_str)
    }

    pub fn engine(&self) -> &dyn TrackingEngine {
        self.engine.as_ref()
    }
}

// ============================================================================
// ENDPOINT LINKS
// ============================================================================

/// Message from a reader task to the event loop.
#[derive(Debug)]
struct LinkMessage {
    endpoint: String,
    /// Distinguishes a replaced connection's leftovers from the live one
    generation: u64,
    event: LinkEvent,
}

#[derive(Debug)]
enum LinkEvent {
    Snapshot(EndpointSnapshot),
    Closed(String),
}

/// A live (or connecting) endpoint connection.
struct EndpointLink {
    generation: u64,
    task: JoinHandle<()>,
}

/// Whether `message` comes from the link currently registered for its endpoint.
fn is_current(links: &HashMap<String, EndpointLink>, message: &LinkMessage) -> bool {
    links
        .get(&message.endpoint)
        .is_some_and(|link| link.generation == message.generation)
}

#[derive(Debug, Clone)]
struct LinkSettings {
    connect_timeout: Duration,
    max_frame_length: usize,
    keepalive: KeepaliveConfig,
}

/// Reader task: connect, forward every decoded snapshot, report the close.
async fn run_link(record: ServiceRecord, generation: u64, settings: LinkSettings, tx: mpsc::Sender<LinkMessage>) {
    let endpoint = record.name.clone();

    let reason = match read_link(&record, generation, &settings, &tx).await {
        Ok(()) => "closed by peer".to_string(),
        Err(e) => e.to_string(),
    };

    let _ = tx
        .send(LinkMessage {
            endpoint,
            generation,
            event: LinkEvent::Closed(reason),
        })
        .await;
}

async fn read_link(
    record: &ServiceRecord,
    generation: u64,
    settings: &LinkSettings,
    tx: &mpsc::Sender<LinkMessage>,
) -> Result<(), NetError> {
    let addrs: Vec<SocketAddr> = record
        .connect_order()
        .into_iter()
        .map(|ip| SocketAddr::new(ip, record.port))
        .collect();
    let stream = connect_any(&addrs, settings.connect_timeout, &settings.keepalive).await?;
    info!(endpoint = %record.name, "connected to endpoint");

    let mut frames = FramedRead::new(stream, FrameCodec::<EndpointSnapshot>::new(settings.max_frame_length));
    while let Some(snapshot) = frames.next().await {
        let message = LinkMessage {
            endpoint: record.name.clone(),
            generation,
            event: LinkEvent::Snapshot(snapshot?),
        };
        if tx.send(message).await.is_err() {
            break;
        }
    }
    Ok(())
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct AggregationService {
    config: ServiceConfig,
    name: String,
    listeners: Vec<TcpListener>,
    addresses: Vec<IpAddr>,
    port: u16,
    discovery: Option<Discovery>,
    context: Arc<dyn CircumContext>,
}

impl AggregationService {
    /// Bind the configured addresses. `context` clocks the tracker.
    pub async fn bind(config: ServiceConfig, context: Arc<dyn CircumContext>) -> Result<Self, NetError> {
        let candidates = candidate_addresses(config.interface)?;
        let listeners = bind_all(&candidates, config.port).await?;

        let mut addresses = Vec::with_capacity(listeners.len());
        let mut port = config.port;
        for listener in &listeners {
            let local = listener.local_addr()?;
            addresses.push(local.ip());
            port = local.port();
        }

        let name = config.name.clone().unwrap_or_else(random_instance_name);
        info!(%name, port, addresses = ?addresses, tracker = %config.tracker, "service bound");

        Ok(Self {
            config,
            name,
            listeners,
            addresses,
            port,
            discovery: None,
            context,
        })
    }

    /// Advertise and discover endpoints through `discovery` while running.
    pub fn with_discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Serve until `shutdown` is cancelled, discovering endpoints over mDNS.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), NetError> {
        let filter = NameFilter::new(self.config.endpoints.clone());
        let events = match &self.discovery {
            Some(discovery) => match discovery.browse(ServiceRole::Endpoint, filter) {
                Ok(events) => events,
                Err(e) => {
                    warn!("endpoint discovery failed, no endpoints will be found: {e}");
                    closed_events()
                }
            },
            None => closed_events(),
        };

        self.run_with_events(events, shutdown).await
    }

    /// Serve until `shutdown` is cancelled, taking endpoint announcements from `events`.
    pub async fn run_with_events(
        self,
        mut events: mpsc::Receiver<DiscoveryEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), NetError> {
        let engine = self
            .config
            .tracker
            .build(self.config.tracking, self.config.gating_threshold, self.context.clone());
        let mut fusion = FusionState::new(engine);

        let advertisement = self.advertise();
        let subscribers = SubscriberSet::new(self.config.write_timeout);
        let settings = LinkSettings {
            connect_timeout: self.config.connect_timeout,
            max_frame_length: self.config.max_frame_length,
            keepalive: self.config.keepalive,
        };

        let (link_tx, mut link_rx) = mpsc::channel::<LinkMessage>(256);
        let mut links: HashMap<String, EndpointLink> = HashMap::new();
        let mut next_generation = 0u64;
        let mut discovery_open = true;

        info!(name = %self.name, "service running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                accepted = accept_next(&self.listeners) => if let Some((stream, peer)) = accepted {
                    if let Err(e) = apply_keepalive(&stream, &self.config.keepalive) {
                        warn!(%peer, "failed to enable keep-alive: {e}");
                    }
                    subscribers.insert(peer.to_string(), stream).await;
                    info!(%peer, "subscriber connected");
                },

                event = events.recv(), if discovery_open => match event {
                    Some(DiscoveryEvent::Resolved(record)) => {
                        if links.contains_key(&record.name) {
                            debug!(endpoint = %record.name, "already connected");
                            continue;
                        }
                        next_generation += 1;
                        info!(endpoint = %record.name, port = record.port, "endpoint discovered");
                        let task = tokio::spawn(run_link(
                            record.clone(),
                            next_generation,
                            settings.clone(),
                            link_tx.clone(),
                        ));
                        links.insert(record.name, EndpointLink { generation: next_generation, task });
                    }
                    Some(DiscoveryEvent::Removed(name)) => {
                        if let Some(link) = links.remove(&name) {
                            link.task.abort();
                            fusion.on_disconnect(&name);
                            info!(endpoint = %name, "endpoint removed");
                        }
                    }
                    None => {
                        debug!("discovery stream ended");
                        discovery_open = false;
                    }
                },

                Some(message) = link_rx.recv() => {
                    if !is_current(&links, &message) {
                        debug!(endpoint = %message.endpoint, generation = message.generation, "ignoring stale link message");
                        continue;
                    }

                    match message.event {
                        LinkEvent::Snapshot(snapshot) => {
                            let fused = fusion.on_snapshot(&message.endpoint, snapshot);
                            match encode_frame(&fused) {
                                Ok(frame) => {
                                    subscribers.broadcast(&frame).await;
                                }
                                Err(e) => error!("failed to encode fused snapshot: {e}"),
                            }
                        }
                        LinkEvent::Closed(reason) => {
                            links.remove(&message.endpoint);
                            fusion.on_disconnect(&message.endpoint);
                            warn!(endpoint = %message.endpoint, "endpoint connection dropped: {reason}");
                        }
                    }
                }
            }
        }

        for (_, link) in links.drain() {
            link.task.abort();
        }
        if let Some(advertisement) = advertisement {
            advertisement.withdraw();
        }
        info!(name = %self.name, "service stopped");
        Ok(())
    }

    fn advertise(&self) -> Option<Advertisement> {
        let discovery = self.discovery.as_ref()?;
        let advertised = advertised_addresses(&self.addresses);
        let tracker = self.config.tracker.to_string();

        match discovery.advertise(
            &self.name,
            ServiceRole::Service,
            &advertised,
            self.port,
            &[("tracker", tracker.as_str())],
        ) {
            Ok(advertisement) => Some(advertisement),
            Err(e) => {
                warn!(name = %self.name, "advertisement failed, reachable by address only: {e}");
                None
            }
        }
    }
}

/// A discovery channel that has already ended.
fn closed_events() -> mpsc::Receiver<DiscoveryEvent> {
    let (_, rx) = mpsc::channel(1);
    rx
}
