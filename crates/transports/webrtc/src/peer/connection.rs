//! webrtc-rs backed peer connections

use crate::config::MeshConfig;
use crate::events::RemoteTrackHandle;
use crate::peer::meta::Channels;
use crate::peer::transport::{
    ControlChannel, PeerEvent, PeerFactory, PeerParts, PeerState, PeerTransport,
};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Label of the application command channel
pub const COMMAND_CHANNEL_LABEL: &str = "commandChannel";

/// Label of the negotiation fallback channel
pub const NEGOTIATION_CHANNEL_LABEL: &str = "negotiationChannel";

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
        }
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
    };
    parsed.map_err(|e| Error::SdpError(format!("Failed to parse session description: {}", e)))
}

fn from_rtc_description(description: RTCSessionDescription) -> Option<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        _ => return None,
    };
    Some(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

/// Pre-negotiated data channel
pub struct RtcDataChannel {
    label: String,
    channel: Arc<RTCDataChannel>,
}

impl RtcDataChannel {
    /// Create a channel with a fixed id, usable before the connection is up
    async fn negotiated(
        peer_connection: &RTCPeerConnection,
        label: &str,
        id: u16,
    ) -> Result<Arc<RTCDataChannel>> {
        let init = RTCDataChannelInit {
            negotiated: Some(id),
            ..Default::default()
        };

        peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel {}: {}", label, e))
            })
    }

    fn wrap(label: &str, channel: Arc<RTCDataChannel>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            channel,
        })
    }

    /// Forward text messages into the peer event stream
    fn forward_messages<F>(&self, tx: mpsc::UnboundedSender<PeerEvent>, to_event: F)
    where
        F: Fn(String) -> PeerEvent + Send + Sync + 'static,
    {
        let label = self.label.clone();
        let to_event = Arc::new(to_event);

        self.channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            let label = label.clone();
            let to_event = Arc::clone(&to_event);

            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = tx.send(to_event(text));
                    }
                    Err(e) => warn!("Non-UTF-8 message on channel '{}': {}", label, e),
                }
            })
        }));
    }
}

#[async_trait]
impl ControlChannel for RtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to send on '{}': {}", self.label, e))
            })
    }
}

/// Peer connection wrapper
pub struct RtcPeer {
    connection_id: String,
    peer_connection: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    /// Underlying webrtc-rs peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl PeerTransport for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
            .ok_or_else(|| Error::SdpError("Offer has unexpected type".to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
            .ok_or_else(|| Error::SdpError("Answer has unexpected type".to_string()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        debug!(
            "Setting remote {:?} for connection {}",
            description.kind, self.connection_id
        );
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn has_remote_description(&self) -> bool {
        self.peer_connection.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    fn state(&self) -> PeerState {
        self.peer_connection.connection_state().into()
    }

    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()> {
        self.peer_connection
            .add_track(track)
            .await
            .map(|_| ())
            .map_err(|e| Error::MediaTrackError(format!("Failed to add track: {}", e)))
    }

    async fn remove_senders(&self) -> Result<()> {
        for sender in self.peer_connection.get_senders().await {
            self.peer_connection
                .remove_track(&sender)
                .await
                .map_err(|e| Error::MediaTrackError(format!("Failed to remove track: {}", e)))?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}

/// Builds [`RtcPeer`]s from the mesh configuration
pub struct RtcPeerFactory {
    config: Arc<MeshConfig>,
}

impl RtcPeerFactory {
    pub fn new(config: Arc<MeshConfig>) -> Self {
        Self { config }
    }

    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect()
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    #[instrument(skip(self), fields(connection_id = %connection_id))]
    async fn create(&self, connection_id: &str) -> Result<PeerParts> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers(),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let (tx, rx) = mpsc::unbounded_channel();
        let options = &self.config.options;

        let command = RtcDataChannel::wrap(
            COMMAND_CHANNEL_LABEL,
            RtcDataChannel::negotiated(
                &peer_connection,
                COMMAND_CHANNEL_LABEL,
                options.command_channel_id,
            )
            .await?,
        );
        let negotiation = RtcDataChannel::wrap(
            NEGOTIATION_CHANNEL_LABEL,
            RtcDataChannel::negotiated(
                &peer_connection,
                NEGOTIATION_CHANNEL_LABEL,
                options.negotiation_channel_id,
            )
            .await?,
        );
        command.forward_messages(tx.clone(), PeerEvent::Command);
        negotiation.forward_messages(tx.clone(), PeerEvent::NegotiationMessage);

        let events = tx.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(PeerEvent::NegotiationNeeded);
            })
        }));

        let events = tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = events.clone();
            Box::pin(async move {
                // None marks the end of gathering; nothing to send
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(PeerEvent::LocalCandidate(init.into()));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let events = tx.clone();
        let id = connection_id.to_string();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = events.clone();
                let id = id.clone();
                Box::pin(async move {
                    debug!("Connection {} state: {}", id, state);
                    let _ = events.send(PeerEvent::StateChanged(state.into()));
                })
            },
        ));

        let events = tx.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                Box::pin(async move {
                    let _ = events.send(PeerEvent::RemoteTrack(RemoteTrackHandle::new(track)));
                })
            },
        ));

        // The negotiated channels need an initial offer even when the
        // library does not raise negotiation-needed for them.
        let _ = tx.send(PeerEvent::NegotiationNeeded);

        info!("Created peer connection {}", connection_id);

        Ok(PeerParts {
            transport: Arc::new(RtcPeer {
                connection_id: connection_id.to_string(),
                peer_connection,
            }),
            channels: Channels {
                command,
                negotiation,
            },
            events: rx,
        })
    }
}
