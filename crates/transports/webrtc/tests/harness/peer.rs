//! Fake peer connections wired together through the relay hub
//!
//! A peer connects as soon as it holds both a local and a remote
//! description. Data channel text and attached tracks show up as events on
//! the peer at the other end of the connection.

use super::relay::RelayHub;
use async_trait::async_trait;
use meshcall_webrtc::{
    Channels, ControlChannel, Error, IceCandidate, PeerEvent, PeerFactory, PeerParts, PeerState,
    PeerTransport, RemoteTrackHandle, Result, SessionDescription,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

pub struct MeshPeer {
    connection_id: String,
    hub: Arc<RelayHub>,
    events: mpsc::UnboundedSender<PeerEvent>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    state: Mutex<PeerState>,
    stalled: bool,
    gathered: AtomicBool,
    pub offers_created: AtomicUsize,
    pub answers_created: AtomicUsize,
    pub candidates_added: AtomicUsize,
    pub tracks_added: AtomicUsize,
    pub senders_removed: AtomicBool,
}

impl MeshPeer {
    fn set_state(&self, state: PeerState) {
        *self.state.lock() = state;
        let _ = self.events.send(PeerEvent::StateChanged(state));
    }

    fn maybe_connect(&self) {
        if self.stalled || *self.state.lock() != PeerState::New {
            return;
        }
        if self.local.lock().is_none() || self.remote.lock().is_none() {
            return;
        }
        self.set_state(PeerState::Connecting);
        self.set_state(PeerState::Connected);
    }
}

#[async_trait]
impl PeerTransport for MeshPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!(
            "v=0 offer-{} {}",
            n, self.connection_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.remote.lock().is_none() {
            return Err(Error::SdpError("No remote offer".to_string()));
        }
        let n = self.answers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!(
            "v=0 answer-{} {}",
            n, self.connection_id
        )))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(description);

        if !self.gathered.swap(true, Ordering::SeqCst) {
            let mut candidate =
                IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host");
            candidate.sdp_mid = Some("0".to_string());
            candidate.sdp_mline_index = Some(0);
            let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
        }

        self.maybe_connect();
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        *self.remote.lock() = Some(description);
        self.maybe_connect();
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote.lock().is_some()
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        self.candidates_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> PeerState {
        *self.state.lock()
    }

    async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()> {
        if self.state() == PeerState::Closed {
            return Err(Error::MediaTrackError("Peer closed".to_string()));
        }
        self.tracks_added.fetch_add(1, Ordering::SeqCst);
        self.hub.deliver(
            &self.connection_id,
            PeerEvent::RemoteTrack(RemoteTrackHandle::detached(
                track.id(),
                track.stream_id(),
                "video",
            )),
        );
        Ok(())
    }

    async fn remove_senders(&self) -> Result<()> {
        self.senders_removed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.state() != PeerState::Closed {
            self.set_state(PeerState::Closed);
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum ChannelKind {
    Command,
    Negotiation,
}

/// Data channel that is open while its peer is connected
pub struct WireChannel {
    label: &'static str,
    kind: ChannelKind,
    peer: Arc<MeshPeer>,
}

#[async_trait]
impl ControlChannel for WireChannel {
    fn label(&self) -> &str {
        self.label
    }

    fn is_open(&self) -> bool {
        self.peer.state() == PeerState::Connected
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannelError(format!(
                "{} is not open",
                self.label
            )));
        }
        let event = match self.kind {
            ChannelKind::Command => PeerEvent::Command(text.to_string()),
            ChannelKind::Negotiation => PeerEvent::NegotiationMessage(text.to_string()),
        };
        self.peer.hub.deliver(&self.peer.connection_id, event);
        Ok(())
    }
}

/// Creates [`MeshPeer`]s and keeps them for inspection
pub struct MeshPeerFactory {
    hub: Arc<RelayHub>,
    stalled: bool,
    peers: Mutex<HashMap<String, Arc<MeshPeer>>>,
}

impl MeshPeerFactory {
    pub fn new(hub: &Arc<RelayHub>) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::clone(hub),
            stalled: false,
            peers: Mutex::new(HashMap::new()),
        })
    }

    /// Peers that never reach `connected`
    pub fn stalled(hub: &Arc<RelayHub>) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::clone(hub),
            stalled: true,
            peers: Mutex::new(HashMap::new()),
        })
    }

    pub fn peer(&self, connection_id: &str) -> Option<Arc<MeshPeer>> {
        self.peers.lock().get(connection_id).cloned()
    }

    pub fn peers(&self) -> Vec<Arc<MeshPeer>> {
        self.peers.lock().values().cloned().collect()
    }

    pub fn offers_created(&self) -> usize {
        self.peers()
            .iter()
            .map(|peer| peer.offers_created.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl PeerFactory for MeshPeerFactory {
    async fn create(&self, connection_id: &str) -> Result<PeerParts> {
        let (tx, rx) = mpsc::unbounded_channel();

        let peer = Arc::new(MeshPeer {
            connection_id: connection_id.to_string(),
            hub: Arc::clone(&self.hub),
            events: tx.clone(),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            state: Mutex::new(PeerState::New),
            stalled: self.stalled,
            gathered: AtomicBool::new(false),
            offers_created: AtomicUsize::new(0),
            answers_created: AtomicUsize::new(0),
            candidates_added: AtomicUsize::new(0),
            tracks_added: AtomicUsize::new(0),
            senders_removed: AtomicBool::new(false),
        });
        self.hub.attach_peer(connection_id, tx.clone());
        self.peers
            .lock()
            .insert(connection_id.to_string(), Arc::clone(&peer));

        let channels = Channels {
            command: Arc::new(WireChannel {
                label: "commandChannel",
                kind: ChannelKind::Command,
                peer: Arc::clone(&peer),
            }),
            negotiation: Arc::new(WireChannel {
                label: "negotiationChannel",
                kind: ChannelKind::Negotiation,
                peer: Arc::clone(&peer),
            }),
        };

        let _ = tx.send(PeerEvent::NegotiationNeeded);

        Ok(PeerParts {
            transport: peer,
            channels,
            events: rx,
        })
    }
}
