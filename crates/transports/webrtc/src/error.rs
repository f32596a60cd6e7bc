//! Error types for the mesh negotiation core

/// Result type alias using the mesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating and supervising mesh connections
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed or unexpected signaling message
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error on the relay socket
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Relay socket is no longer open
    #[error("Relay closed: {0}")]
    RelayClosed(String),

    /// A connection is already registered under this id
    #[error("Duplicate connection: {0}")]
    DuplicateConnection(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Local media error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Participant lookup failed
    #[error("Lookup error: {0}")]
    LookupError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
