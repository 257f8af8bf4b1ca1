//! Error types for the sender

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating the cast session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Relay session fault (send failure, no session)
    #[error("Relay error: {0}")]
    Relay(String),

    /// Description or candidate rejected by the peer connection
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Error reported by the underlying WebRTC stack
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// No capture device matched the configured source marker
    #[error("Device not found.")]
    DeviceNotFound,

    /// Capture stream could not be acquired
    #[error("Capture error: {0}")]
    Capture(String),

    /// Malformed or unexpected inbound signaling
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The coordinator task has stopped
    #[error("Coordinator closed")]
    Closed,
}
