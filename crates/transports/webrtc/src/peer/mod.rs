//! Peer connections and their metadata

pub mod connection;
pub mod meta;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{RtcDataChannel, RtcPeer, RtcPeerFactory};
pub use meta::{Channels, ConnectionMeta, NegotiationFlags, OfferGuard, Role};
pub use transport::{ControlChannel, PeerEvent, PeerFactory, PeerParts, PeerState, PeerTransport};
