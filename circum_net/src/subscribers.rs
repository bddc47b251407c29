//! Downstream subscriber set with per-socket failure isolation.
//!
//! Shared between a producer (broadcast) and an accept loop (insert). The
//! lock is held for a whole broadcast pass, sends included, so a frame is
//! never interleaved with another and a subscriber admitted mid-pass only
//! sees the next frame. Each send is bounded by a write timeout; a subscriber
//! whose send fails or times out is dropped without touching the others.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One accepted downstream connection.
#[derive(Debug)]
struct Subscriber<W> {
    peer: String,
    writer: W,
}

/// Mutex-guarded list of subscribers, cheap to clone.
#[derive(Debug)]
pub struct SubscriberSet<W = TcpStream> {
    inner: Arc<Mutex<Vec<Subscriber<W>>>>,
    write_timeout: Duration,
}

impl<W> Clone for SubscriberSet<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            write_timeout: self.write_timeout,
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> SubscriberSet<W> {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            write_timeout,
        }
    }

    /// Admit a new subscriber.
    pub async fn insert(&self, peer: impl Into<String>, writer: W) {
        let peer = peer.into();
        let mut subscribers = self.inner.lock().await;
        subscribers.push(Subscriber { peer: peer.clone(), writer });
        debug!(%peer, total = subscribers.len(), "subscriber added");
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Send one pre-encoded frame to every subscriber.
    ///
    /// Returns the number of subscribers that received it; the rest have been
    /// removed from the set.
    pub async fn broadcast(&self, frame: &[u8]) -> usize {
        let mut subscribers = self.inner.lock().await;
        let mut kept = Vec::with_capacity(subscribers.len());

        for mut subscriber in std::mem::take(&mut *subscribers) {
            match timeout(self.write_timeout, subscriber.writer.write_all(frame)).await {
                Ok(Ok(())) => kept.push(subscriber),
                Ok(Err(e)) => {
                    warn!(peer = %subscriber.peer, "dropping subscriber, send failed: {e}");
                }
                Err(_) => {
                    warn!(peer = %subscriber.peer, timeout = ?self.write_timeout, "dropping subscriber, send timed out");
                }
            }
        }

        *subscribers = kept;
        subscribers.len()
    }
}
