//! Relay-first, peer-channel-fallback delivery of negotiation messages

use crate::peer::ControlChannel;
use crate::signaling::protocol::{NegotiateEnvelope, SignalingMessage};
use crate::signaling::relay::RelayHandle;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which transport carried a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Relay,
    PeerChannel,
}

/// Sends negotiation messages for one connection
///
/// While the connection's relay socket is open everything goes through the
/// relay. Once it has been closed, which happens when the peer connection
/// reaches `connected`, messages move to the connection's own negotiation
/// channel.
pub struct SignalingTransport {
    connection_id: String,
    relay: RelayHandle,
    channel: Arc<dyn ControlChannel>,
}

impl SignalingTransport {
    pub fn new(
        connection_id: impl Into<String>,
        relay: RelayHandle,
        channel: Arc<dyn ControlChannel>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            relay,
            channel,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Send one message addressed to this connection's remote peer
    ///
    /// # Errors
    ///
    /// Returns an error only when neither the relay nor the negotiation
    /// channel accepted the message.
    pub async fn send(&self, message: &SignalingMessage) -> Result<Route> {
        let json = NegotiateEnvelope::new(&self.connection_id, message).to_json()?;

        if self.relay.is_open() {
            match self.relay.send_text(json.clone()) {
                Ok(()) => {
                    debug!(
                        "Sent {} for {} via relay",
                        message.kind(),
                        self.connection_id
                    );
                    return Ok(Route::Relay);
                }
                Err(e) => warn!(
                    "Relay send failed for {}, falling back to peer channel: {}",
                    self.connection_id, e
                ),
            }
        }

        self.channel.send_text(&json).await?;
        debug!(
            "Sent {} for {} via {}",
            message.kind(),
            self.connection_id,
            self.channel.label()
        );
        Ok(Route::PeerChannel)
    }
}
