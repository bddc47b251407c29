//! Multicast DNS service discovery.
//!
//! Endpoints and services announce themselves as `_<role>._sub._circum._tcp.local.`
//! with a TXT record carrying at least their role. Consumers browse by role
//! and receive resolved records (instance name, addresses, port, metadata)
//! or removals as a channel of [`DiscoveryEvent`]s.

use crate::error::NetError;
use circum_env::ServiceRole;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// TXT key holding the advertiser's role.
pub const ROLE_PROPERTY: &str = "role";

/// TXT key holding an endpoint's sensor driver.
pub const DRIVER_PROPERTY: &str = "driver";

/// Random instance name of the form `circum-xxxxxxxx`.
pub fn random_instance_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("circum-{}", &id[..8])
}

/// Instance part of an mDNS full name (`name._circum._tcp.local.` → `name`).
pub fn instance_name(fullname: &str) -> &str {
    fullname.split('.').next().unwrap_or(fullname)
}

/// Addresses worth announcing out of the ones a server bound.
///
/// Unspecified addresses are never announced. Loopback is only announced
/// when nothing else is bound, since a remote peer would reach itself.
pub fn advertised_addresses(bound: &[IpAddr]) -> Vec<IpAddr> {
    let usable: Vec<IpAddr> = bound.iter().copied().filter(|a| !a.is_unspecified()).collect();
    let routable: Vec<IpAddr> = usable.iter().copied().filter(|a| !a.is_loopback()).collect();

    if routable.is_empty() {
        usable
    } else {
        routable
    }
}

// ============================================================================
// RECORDS & FILTERS
// ============================================================================

/// A resolved advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Instance name
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub properties: HashMap<String, String>,
}

impl ServiceRecord {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Routable IPv4 addresses first, then IPv6, loopback last; each group
    /// in ascending order.
    pub fn connect_order(&self) -> Vec<IpAddr> {
        let mut addrs = self.addresses.clone();
        addrs.sort_by_key(|a| (a.is_loopback(), a.is_ipv6(), *a));
        addrs
    }

    fn from_info(info: &ServiceInfo) -> Self {
        let properties = info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect();

        Self {
            name: instance_name(info.get_fullname()).to_string(),
            addresses: info.get_addresses().iter().copied().collect(),
            port: info.get_port(),
            properties,
        }
    }
}

/// What browsing reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Resolved(ServiceRecord),
    /// Instance name of an advertisement that went away
    Removed(String),
}

impl DiscoveryEvent {
    pub fn name(&self) -> &str {
        match self {
            DiscoveryEvent::Resolved(record) => &record.name,
            DiscoveryEvent::Removed(name) => name,
        }
    }
}

/// Accepts instance names: everything when empty, otherwise only listed names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter {
    names: Vec<String>,
}

impl NameFilter {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == name)
    }
}

// ============================================================================
// DAEMON
// ============================================================================

/// Handle on the mDNS daemon, cheap to clone.
#[derive(Clone)]
pub struct Discovery {
    daemon: ServiceDaemon,
}

impl Discovery {
    /// Start the mDNS daemon.
    pub fn new() -> Result<Self, NetError> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
        })
    }

    /// Announce an instance until the returned [`Advertisement`] is withdrawn or dropped.
    ///
    /// With no `addresses`, the daemon announces every address of every interface.
    pub fn advertise(
        &self,
        name: &str,
        role: ServiceRole,
        addresses: &[IpAddr],
        port: u16,
        metadata: &[(&str, &str)],
    ) -> Result<Advertisement, NetError> {
        let service_type = role.service_type();
        let host_name = format!("{name}.local.");

        let mut properties: HashMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        properties.insert(ROLE_PROPERTY.to_string(), role.as_str().to_string());

        let joined = addresses
            .iter()
            .map(IpAddr::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let info = ServiceInfo::new(&service_type, name, &host_name, joined.as_str(), port, properties)?;
        let info = if addresses.is_empty() {
            info.enable_addr_auto()
        } else {
            info
        };

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info)?;
        info!(name, %role, port, "advertised");

        Ok(Advertisement {
            daemon: self.daemon.clone(),
            fullname,
            withdrawn: false,
        })
    }

    /// Browse for instances of `role` that pass `filter`.
    ///
    /// Events are forwarded until the returned receiver is dropped or the
    /// daemon shuts down.
    pub fn browse(&self, role: ServiceRole, filter: NameFilter) -> Result<mpsc::Receiver<DiscoveryEvent>, NetError> {
        let service_type = role.service_type();
        let events = self.daemon.browse(&service_type)?;
        let (tx, rx) = mpsc::channel(64);
        debug!(%service_type, "browsing");

        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let event = match event {
                    ServiceEvent::ServiceResolved(info) => DiscoveryEvent::Resolved(ServiceRecord::from_info(&info)),
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        DiscoveryEvent::Removed(instance_name(&fullname).to_string())
                    }
                    _ => continue,
                };

                if !filter.accepts(event.name()) {
                    debug!(name = event.name(), "ignoring filtered instance");
                    continue;
                }
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Stop the daemon; outstanding browses end.
    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {e}");
        }
    }
}

/// A live announcement; withdrawn on [`withdraw`](Self::withdraw) or drop.
pub struct Advertisement {
    daemon: ServiceDaemon,
    fullname: String,
    withdrawn: bool,
}

impl Advertisement {
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn withdraw(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if self.withdrawn {
            return;
        }
        self.withdrawn = true;

        match self.daemon.unregister(&self.fullname) {
            Ok(_) => info!(fullname = %self.fullname, "advertisement withdrawn"),
            Err(e) => warn!(fullname = %self.fullname, "failed to withdraw advertisement: {e}"),
        }
    }
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        self.unregister();
    }
}
