//! Endpoint server: one sensor's world-frame observations, streamed to subscribers.
//!
//! A producer task polls the sensor on a fixed period, projects each snapshot
//! into the world frame with the endpoint's pose, frames it once and
//! broadcasts the frame. The accept loop admits subscribers on every bound
//! address until shutdown.

use crate::config::EndpointConfig;
use crate::codec::encode_frame;
use crate::discovery::{advertised_addresses, random_instance_name, Advertisement, Discovery, DRIVER_PROPERTY};
use crate::error::NetError;
use crate::socket::{accept_next, apply_keepalive, bind_all, candidate_addresses};
use crate::subscribers::SubscriberSet;
use circum_core::transform_points;
use circum_env::{EndpointSnapshot, PoseProvider, SensorSource, ServiceRole};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct EndpointServer {
    config: EndpointConfig,
    name: String,
    listeners: Vec<TcpListener>,
    addresses: Vec<IpAddr>,
    port: u16,
    discovery: Option<Discovery>,
}

impl EndpointServer {
    /// Bind the configured addresses.
    pub async fn bind(config: EndpointConfig) -> Result<Self, NetError> {
        if config.poll_interval.is_zero() {
            return Err(NetError::ZeroPollInterval);
        }

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
        info!(%name, port, addresses = ?addresses, "endpoint bound");

        Ok(Self {
            config,
            name,
            listeners,
            addresses,
            port,
            discovery: None,
        })
    }

    /// Advertise through `discovery` while running.
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

    /// Serve until `shutdown` is cancelled.
    ///
    /// The producer ending on its own is fatal. Either way the advertisement
    /// is withdrawn and every socket closed before returning.
    pub async fn run(
        self,
        sensor: Box<dyn SensorSource>,
        pose: Arc<dyn PoseProvider>,
        shutdown: CancellationToken,
    ) -> Result<(), NetError> {
        let advertisement = self.advertise(sensor.driver());

        let subscribers = SubscriberSet::new(self.config.write_timeout);
        let producer_stop = shutdown.child_token();
        let mut producer = tokio::spawn(produce(
            sensor,
            pose,
            subscribers.clone(),
            self.config.clone(),
            producer_stop.clone(),
        ));

        info!(name = %self.name, "endpoint running");
        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                finished = &mut producer => {
                    let reason = match finished {
                        Ok(()) => "exited".to_string(),
                        Err(e) => e.to_string(),
                    };
                    error!(name = %self.name, "producer stopped: {reason}");
                    break Err(NetError::ProducerStopped(reason));
                }
                accepted = accept_next(&self.listeners) => if let Some((stream, peer)) = accepted {
                    if let Err(e) = apply_keepalive(&stream, &self.config.keepalive) {
                        warn!(%peer, "failed to enable keep-alive: {e}");
                    }
                    subscribers.insert(peer.to_string(), stream).await;
                    info!(%peer, "subscriber connected");
                },
            }
        };

        if result.is_ok() {
            producer_stop.cancel();
            if let Err(e) = producer.await {
                error!("producer task failed: {e}");
            }
        }
        if let Some(advertisement) = advertisement {
            advertisement.withdraw();
        }
        info!(name = %self.name, "endpoint stopped");
        result
    }

    fn advertise(&self, driver: &str) -> Option<Advertisement> {
        let discovery = self.discovery.as_ref()?;
        let advertised = advertised_addresses(&self.addresses);

        match discovery.advertise(
            &self.name,
            ServiceRole::Endpoint,
            &advertised,
            self.port,
            &[(DRIVER_PROPERTY, driver)],
        ) {
            Ok(advertisement) => Some(advertisement),
            Err(e) => {
                warn!(name = %self.name, "advertisement failed, reachable by address only: {e}");
                None
            }
        }
    }
}

/// Producer loop: poll, project, frame, broadcast.
async fn produce(
    mut sensor: Box<dyn SensorSource>,
    pose: Arc<dyn PoseProvider>,
    subscribers: SubscriberSet,
    config: EndpointConfig,
    stop: CancellationToken,
) {
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(snapshot) = sensor.poll() else {
            continue;
        };

        let world = EndpointSnapshot::new(transform_points(&snapshot.objects, &pose.pose()));
        let frame = match encode_frame(&world) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode snapshot: {e}");
                continue;
            }
        };

        let delivered = subscribers.broadcast(&frame).await;
        debug!(objects = world.objects.len(), delivered, "snapshot broadcast");
    }
}
