//! Socket helpers shared by every server role.

use crate::config::KeepaliveConfig;
use crate::error::NetError;
use socket2::{SockRef, TcpKeepalive};
use std::future::poll_fn;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::task::Poll;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Pause after a failed accept before the next attempt.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Addresses a server should listen on.
///
/// An explicit `interface` wins; otherwise every IPv4 address of every local
/// interface, loopback included.
pub fn candidate_addresses(interface: Option<IpAddr>) -> Result<Vec<IpAddr>, NetError> {
    if let Some(addr) = interface {
        return Ok(vec![addr]);
    }

    let interfaces = if_addrs::get_if_addrs().map_err(NetError::AddressLookup)?;
    let mut addrs: Vec<IpAddr> = interfaces
        .into_iter()
        .map(|iface| iface.ip())
        .filter(IpAddr::is_ipv4)
        .collect();
    addrs.sort();
    addrs.dedup();
    Ok(addrs)
}

/// Bind a listener on every address that accepts one.
///
/// Failures are logged and skipped. With `port == 0` the port picked for the
/// first listener is reused for the others so one port can be advertised.
pub async fn bind_all(addrs: &[IpAddr], port: u16) -> Result<Vec<TcpListener>, NetError> {
    let mut listeners = Vec::with_capacity(addrs.len());
    let mut port = port;

    for &addr in addrs {
        match TcpListener::bind(SocketAddr::new(addr, port)).await {
            Ok(listener) => {
                let local = listener.local_addr()?;
                debug!(%local, "listening");
                port = local.port();
                listeners.push(listener);
            }
            Err(e) => warn!(%addr, port, "skipping address, bind failed: {e}"),
        }
    }

    if listeners.is_empty() {
        return Err(NetError::NoBindableAddress { port });
    }
    Ok(listeners)
}

/// Wait for a connection on any of `listeners`.
///
/// Never resolves when `listeners` is empty.
pub async fn accept_any(listeners: &[TcpListener]) -> io::Result<(TcpStream, SocketAddr)> {
    poll_fn(|cx| {
        for listener in listeners {
            if let Poll::Ready(result) = listener.poll_accept(cx) {
                return Poll::Ready(result);
            }
        }
        Poll::Pending
    })
    .await
}

/// Like [`accept_any`], but a failed accept is logged and followed by
/// [`ACCEPT_BACKOFF`] before resolving to `None`.
pub async fn accept_next(listeners: &[TcpListener]) -> Option<(TcpStream, SocketAddr)> {
    backoff_on_error(accept_any(listeners).await).await
}

async fn backoff_on_error<T>(result: io::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("accept failed: {e}");
            sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

/// Connect to the first reachable address, trying them in order.
///
/// Each attempt is bounded by `connect_timeout`; keep-alive is enabled on
/// the resulting stream.
pub async fn connect_any(
    addrs: &[SocketAddr],
    connect_timeout: Duration,
    keepalive: &KeepaliveConfig,
) -> io::Result<TcpStream> {
    let mut last_error = io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to connect to");

    for &addr in addrs {
        match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = apply_keepalive(&stream, keepalive) {
                    warn!(%addr, "failed to enable keep-alive: {e}");
                }
                debug!(%addr, "connected");
                return Ok(stream);
            }
            Ok(Err(e)) => {
                debug!(%addr, "connect failed: {e}");
                last_error = e;
            }
            Err(_) => {
                debug!(%addr, "connect timed out");
                last_error = io::Error::new(io::ErrorKind::TimedOut, format!("connect to {addr} timed out"));
            }
        }
    }

    Err(last_error)
}

/// Enable TCP keep-alive probing on `stream`.
///
/// Probe interval and count are only tuned where the platform exposes them;
/// elsewhere the system defaults apply.
pub fn apply_keepalive(stream: &TcpStream, config: &KeepaliveConfig) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(config.idle);

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "windows",
    ))]
    let keepalive = keepalive.with_interval(config.interval);

    // Windows reads the retry count from the registry
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
    ))]
    let keepalive = keepalive.with_retries(config.retries);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
