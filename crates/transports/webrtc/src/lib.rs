//! Peer-to-peer video mesh negotiation over a signaling relay
//!
//! Every participant in a conversation holds one independent WebRTC peer
//! connection per remote participant. Connections are negotiated over a
//! WebSocket relay first and over their own pre-negotiated data channel once
//! the peer connection is up, so renegotiation keeps working after the relay
//! socket for that connection has been released.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!                 │           MeshCall           │
//!                 │  discovery, fan-out, fan-in, │
//!                 │     registry, call teardown  │
//!                 └──────────────┬───────────────┘
//!                                │ one per remote participant
//!                 ┌──────────────▼───────────────┐
//!                 │     connection supervisor    │
//!                 │ connect timeout, media attach│
//!                 │   relay release, commands    │
//!                 └──────────────┬───────────────┘
//!                 ┌──────────────▼───────────────┐
//!                 │          Negotiator          │
//!                 │ offer / answer / candidates  │
//!                 └───────┬──────────────┬───────┘
//!             relay first │              │ peer channel fallback
//!                 ┌───────▼─────┐  ┌─────▼────────┐
//!                 │ RelayHandle │  │ ControlChannel│
//!                 └─────────────┘  └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use meshcall_webrtc::{CallIdentity, MeshCall, MeshConfig, SampleVideoSource};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = MeshConfig::default().with_identity(CallIdentity {
//!     store_id: "store-1".to_string(),
//!     conversation_id: "conv-1".to_string(),
//!     user_id: "alice".to_string(),
//!     device_id: "laptop".to_string(),
//! });
//!
//! let call = MeshCall::from_config(config, Arc::new(SampleVideoSource::default()))?;
//! let mut events = call.subscribe();
//! call.start().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok::<(), meshcall_webrtc::Error>(())
//! # }).unwrap();
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod mesh;
pub mod negotiation;
pub mod peer;
pub mod signaling;

// Re-export main types
pub use config::{CallIdentity, MeshConfig, NegotiationOptions, TurnServerConfig};
pub use error::{Error, Result};
pub use events::{EventBus, MeshEvent, RemovalReason, RemoteTrackHandle};
pub use media::{LocalMedia, LocalStream, MediaSource, SampleVideoSource};
pub use mesh::{
    select_offer_targets, CreatedAt, HttpParticipantLookup, MeshCall, OpenOffer,
    ParticipantLookup, Registry,
};
pub use negotiation::{CandidateRelay, NegotiationState, Negotiator};
pub use peer::{
    Channels, ConnectionMeta, ControlChannel, NegotiationFlags, PeerEvent, PeerFactory,
    PeerParts, PeerState, PeerTransport, Role, RtcPeerFactory,
};
pub use signaling::{
    Command, ControlMessage, IceCandidate, InboundMessage, RelayConnector, RelayHandle,
    RelayInbox, RelaySocket, SdpKind, SessionDescription, SignalingMessage,
    SignalingTransport, WebSocketRelay,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn version() -> &'static str {
    VERSION
}
