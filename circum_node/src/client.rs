//! Demo client: follows an aggregation service and logs its tracks.

use circum_env::{FusedSnapshot, ServiceRole};
use circum_net::socket::connect_any;
use circum_net::{ClientConfig, CodecError, Discovery, DiscoveryEvent, FrameCodec, NameFilter, NetError, ServiceRecord};
use futures_util::StreamExt;
use std::net::SocketAddr;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Follow the first matching service until it goes away, then wait for the
/// next one. Returns once `shutdown` is cancelled or discovery ends.
pub async fn run_client(
    config: ClientConfig,
    discovery: &Discovery,
    shutdown: CancellationToken,
) -> Result<(), NetError> {
    let mut events = discovery.browse(ServiceRole::Service, NameFilter::new(config.services.clone()))?;
    info!(services = ?config.services, "waiting for an aggregation service");

    loop {
        let record = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = events.recv() => match event {
                Some(DiscoveryEvent::Resolved(record)) => record,
                Some(DiscoveryEvent::Removed(_)) => continue,
                None => return Ok(()),
            },
        };

        match follow_service(&record, &config, &shutdown).await {
            Ok(frames) => info!(service = %record.name, frames, "service stream ended"),
            Err(e) => warn!(service = %record.name, "lost service: {e}"),
        }
    }
}

async fn follow_service(
    record: &ServiceRecord,
    config: &ClientConfig,
    shutdown: &CancellationToken,
) -> Result<u64, NetError> {
    let addrs: Vec<SocketAddr> = record
        .connect_order()
        .into_iter()
        .map(|ip| SocketAddr::new(ip, record.port))
        .collect();

    let stream = connect_any(&addrs, config.connect_timeout, &config.keepalive).await?;
    info!(service = %record.name, "following service");

    Ok(follow(stream, config.max_frame_length, shutdown, log_tracks).await?)
}

/// Decode fused snapshots from `reader` and hand each to `on_snapshot`.
///
/// Returns the number of snapshots seen when the stream closes or
/// `shutdown` is cancelled.
pub async fn follow<R, F>(
    reader: R,
    max_frame_length: usize,
    shutdown: &CancellationToken,
    mut on_snapshot: F,
) -> Result<u64, CodecError>
where
    R: AsyncRead + Unpin,
    F: FnMut(&FusedSnapshot),
{
    let mut frames = FramedRead::new(reader, FrameCodec::<FusedSnapshot>::new(max_frame_length));
    let mut seen = 0;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(snapshot)) => {
                seen += 1;
                on_snapshot(&snapshot);
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    Ok(seen)
}

/// Log one line per track.
pub fn log_tracks(snapshot: &FusedSnapshot) {
    info!(tracks = snapshot.objects.len(), "fused snapshot");
    for track in &snapshot.objects {
        info!(id = track.id, x = track.x, y = track.y, z = track.z, "track");
    }
}
