//! Test harness for mesh calls
//!
//! Runs several [`MeshCall`]s in one process against an in-memory relay,
//! with fake peers by default or real webrtc-rs peers when asked.

#![allow(dead_code)]

pub mod peer;
pub mod relay;

pub use peer::{MeshPeer, MeshPeerFactory};
pub use relay::{RelayHub, Routed};

use async_trait::async_trait;
use meshcall_webrtc::{
    CallIdentity, LocalStream, MediaSource, MeshCall, MeshConfig, MeshEvent, PeerFactory,
    PeerState, Result, SampleVideoSource,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub const STORE_ID: &str = "store-1";
pub const CONVERSATION_ID: &str = "conv-1";

/// Generous bound for events that should arrive almost at once
pub const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,meshcall_webrtc=debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

pub fn config(user_id: &str, device_id: &str, connect_timeout: Duration) -> MeshConfig {
    let mut config = MeshConfig::default().with_identity(CallIdentity {
        store_id: STORE_ID.to_string(),
        conversation_id: CONVERSATION_ID.to_string(),
        user_id: user_id.to_string(),
        device_id: device_id.to_string(),
    });
    config.stun_servers.clear();
    config.options.connect_timeout_ms = connect_timeout.as_millis() as u64;
    config.options.candidate_retry_ms = 50;
    config
}

/// Sample video source that remembers what it opened and released
#[derive(Default)]
pub struct RecordingSource {
    inner: SampleVideoSource,
    opened: Mutex<Vec<String>>,
    released: Mutex<Vec<String>>,
}

impl RecordingSource {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl MediaSource for RecordingSource {
    async fn open(&self) -> Result<LocalStream> {
        let stream = self.inner.open().await?;
        self.opened.lock().push(stream.stream_id.clone());
        Ok(stream)
    }

    async fn release(&self, stream: LocalStream) {
        self.released.lock().push(stream.stream_id.clone());
        self.inner.release(stream).await;
    }
}

/// One participant of a test call
pub struct Participant {
    pub call: MeshCall,
    pub events: broadcast::Receiver<MeshEvent>,
    pub device_id: String,
    pub peers: Option<Arc<MeshPeerFactory>>,
    pub media: Arc<RecordingSource>,
}

impl Participant {
    /// Participant with fake peers
    pub fn new(hub: &Arc<RelayHub>, user_id: &str, device_id: &str) -> Self {
        Self::with_factory(hub, user_id, device_id, MeshPeerFactory::new(hub), EVENT_WAIT)
    }

    pub fn with_factory(
        hub: &Arc<RelayHub>,
        user_id: &str,
        device_id: &str,
        peers: Arc<MeshPeerFactory>,
        connect_timeout: Duration,
    ) -> Self {
        let mut participant = Self::with_peer_factory(
            hub,
            config(user_id, device_id, connect_timeout),
            Arc::clone(&peers) as Arc<dyn PeerFactory>,
        );
        participant.peers = Some(peers);
        participant
    }

    /// Participant with any peer factory, real webrtc-rs peers included
    pub fn with_peer_factory(
        hub: &Arc<RelayHub>,
        config: MeshConfig,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let device_id = config.identity.device_id.clone();
        let media = Arc::new(RecordingSource::default());
        let call = MeshCall::new(
            config,
            hub.connector(&device_id),
            peers,
            hub.lookup(),
            Arc::clone(&media) as Arc<dyn MediaSource>,
        )
        .expect("valid test config");
        let events = call.subscribe();

        Self {
            call,
            events,
            device_id,
            peers: None,
            media,
        }
    }

    pub fn factory(&self) -> &Arc<MeshPeerFactory> {
        self.peers.as_ref().expect("participant uses fake peers")
    }

    /// Wait for the first event matching `pred`
    pub async fn wait_for<F>(&mut self, within: Duration, pred: F) -> Option<MeshEvent>
    where
        F: FnMut(&MeshEvent) -> bool,
    {
        wait_for(&mut self.events, within, pred).await
    }

    /// Wait until `count` connections have reported `connected`
    pub async fn wait_connected(&mut self, count: usize, within: Duration) -> Vec<String> {
        let mut connected = Vec::new();
        while connected.len() < count {
            let event = self
                .wait_for(within, |event| {
                    matches!(
                        event,
                        MeshEvent::ConnectionStateChanged {
                            state: PeerState::Connected,
                            ..
                        }
                    )
                })
                .await;
            match event {
                Some(MeshEvent::ConnectionStateChanged { connection_id, .. }) => {
                    connected.push(connection_id)
                }
                _ => break,
            }
        }
        connected
    }

    /// Every event published within `window`
    pub async fn drain(&mut self, window: Duration) -> Vec<MeshEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Ok(event)) => events.push(event),
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) | Err(_) => break,
            }
        }
        events
    }
}

pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<MeshEvent>,
    within: Duration,
    mut pred: F,
) -> Option<MeshEvent>
where
    F: FnMut(&MeshEvent) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Poll `check` until it holds or `within` elapses
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
