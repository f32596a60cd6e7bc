//! Seams between the negotiation core and a concrete peer connection

use crate::events::RemoteTrackHandle;
use crate::peer::meta::Channels;
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

/// Peer connection state as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Event surfaced by a peer connection and its data channels
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Local description is stale
    NegotiationNeeded,
    /// A local ICE candidate was gathered
    LocalCandidate(IceCandidate),
    StateChanged(PeerState),
    /// Text received on the negotiation channel
    NegotiationMessage(String),
    /// Text received on the command channel
    Command(String),
    RemoteTrack(RemoteTrackHandle),
}

/// The negotiated transport behind one connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Local description after it has been applied, candidates included
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn has_remote_description(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    fn state(&self) -> PeerState;

    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()>;

    /// Stop sending every local track
    async fn remove_senders(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A pre-negotiated data channel carrying text
#[async_trait]
pub trait ControlChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<()>;
}

/// Everything a factory hands back for one new connection
pub struct PeerParts {
    pub transport: Arc<dyn PeerTransport>,
    pub channels: Channels,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Creates peer connections
///
/// Implementations must emit an initial [`PeerEvent::NegotiationNeeded`]
/// once the negotiated channels exist.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, connection_id: &str) -> Result<PeerParts>;
}
