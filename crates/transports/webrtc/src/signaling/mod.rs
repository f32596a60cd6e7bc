//! Signaling: wire formats, relay sockets and transport selection

pub mod protocol;
pub mod relay;
pub mod transport;

pub use protocol::{
    Command, ControlMessage, IceCandidate, InboundMessage, InitiateEnvelope, NegotiateEnvelope,
    SdpKind, SessionDescription, SignalingMessage,
};
pub use relay::{RelayConnector, RelayFrame, RelayHandle, RelayInbox, RelaySocket, WebSocketRelay};
pub use transport::{Route, SignalingTransport};
