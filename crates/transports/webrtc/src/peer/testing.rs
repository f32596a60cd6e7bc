//! In-memory peer and channel used by unit tests

use crate::peer::transport::{ControlChannel, PeerState, PeerTransport};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::track::track_local::TrackLocal;

#[derive(Default)]
pub(crate) struct FakePeer {
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    state: Mutex<Option<PeerState>>,
    pub offers_created: AtomicUsize,
    pub answers_created: AtomicUsize,
    pub tracks_added: AtomicUsize,
    pub senders_removed: AtomicBool,
    pub reject_remote: AtomicBool,
    pub offer_delay: Mutex<Option<Duration>>,
}

impl FakePeer {
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn set_state(&self, state: PeerState) {
        *self.state.lock() = Some(state);
    }
}

#[async_trait]
impl PeerTransport for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst);
        let delay = *self.offer_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(SessionDescription::offer(format!("offer-{}", n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let n = self.answers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("answer-{}", n)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(Error::SdpError("rejected".to_string()));
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.remote.lock().is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn state(&self) -> PeerState {
        self.state.lock().unwrap_or(PeerState::New)
    }

    async fn add_track(&self, _track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()> {
        if self.state() == PeerState::Closed {
            return Err(Error::MediaTrackError("closed".to_string()));
        }
        self.tracks_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_senders(&self) -> Result<()> {
        self.senders_removed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.set_state(PeerState::Closed);
        Ok(())
    }
}

pub(crate) struct FakeChannel {
    label: &'static str,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new(label: &'static str, open: bool) -> Self {
        Self {
            label,
            open: AtomicBool::new(open),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn label(&self) -> &str {
        self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannelError(format!("{} not open", self.label)));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}
