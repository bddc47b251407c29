//! Error types for the Circum network layer.

use thiserror::Error;

/// Errors raised while framing or unframing a message.
///
/// Any of these is fatal to the connection it occurred on, and only to that one.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Socket read/write failed, or the peer closed mid-frame
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Length prefix is negative or above the configured bound
    #[error("Frame length {length} outside 0..={max}")]
    FrameTooLarge { length: i64, max: usize },

    /// Body is not a valid document of the expected shape
    #[error("Malformed frame body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur in the network layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// mDNS daemon, registration or browse failure
    #[error("Discovery error: {0}")]
    Discovery(#[from] mdns_sd::Error),

    /// None of the candidate addresses could be bound
    #[error("No candidate address could be bound on port {port}")]
    NoBindableAddress { port: u16 },

    #[error("Failed to enumerate local interfaces: {0}")]
    AddressLookup(#[source] std::io::Error),

    #[error("Poll interval must be positive")]
    ZeroPollInterval,

    /// The endpoint's producer task ended before shutdown
    #[error("Producer stopped unexpectedly: {0}")]
    ProducerStopped(String),
}
