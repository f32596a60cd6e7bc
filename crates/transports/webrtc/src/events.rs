//! Notifications for the presentation layer

use crate::peer::{PeerState, Role};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;
use webrtc::track::track_remote::TrackRemote;

const EVENT_CAPACITY: usize = 256;

/// Why a connection left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Did not reach `connected` within the connect timeout
    ConnectTimeout,
    /// Remote peer sent `VIDEO_OFF`
    VideoOff,
    /// Local hang-up
    HangUp,
    /// Creating or registering the connection failed
    SetupFailed,
}

/// Remote media track received on a connection
#[derive(Clone)]
pub struct RemoteTrackHandle {
    pub id: String,
    pub stream_id: String,
    pub kind: String,
    track: Option<Arc<TrackRemote>>,
}

impl RemoteTrackHandle {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: track.kind().to_string(),
            track: Some(track),
        }
    }

    /// Handle without an RTP source, for transports that carry no media
    pub fn detached(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind: kind.into(),
            track: None,
        }
    }

    /// Underlying webrtc track to read RTP from
    pub fn track(&self) -> Option<&Arc<TrackRemote>> {
        self.track.as_ref()
    }
}

impl fmt::Debug for RemoteTrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrackHandle")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Something the presentation layer may want to re-render for
#[derive(Debug, Clone)]
pub enum MeshEvent {
    ConnectionAdded {
        connection_id: String,
        role: Role,
    },
    ConnectionStateChanged {
        connection_id: String,
        state: PeerState,
    },
    ConnectionRemoved {
        connection_id: String,
        reason: RemovalReason,
    },
    RemoteTrack {
        connection_id: String,
        track: RemoteTrackHandle,
    },
    /// Remote video for this connection should no longer be shown
    RemoteVideoCleared {
        connection_id: String,
    },
    LocalMediaStarted,
    LocalMediaStopped,
    /// Relay `UPDATE`: participant metadata changed
    ParticipantUpdated {
        user_id: String,
        conversation_id: String,
    },
    /// Active connection count dropped to zero
    CallEnded,
}

/// Broadcast fan-out of [`MeshEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; dropped silently when there are none
    pub fn publish(&self, event: MeshEvent) {
        trace!("Mesh event: {:?}", event);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(MeshEvent::CallEnded);

        assert!(matches!(a.recv().await.unwrap(), MeshEvent::CallEnded));
        assert!(matches!(b.recv().await.unwrap(), MeshEvent::CallEnded));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(MeshEvent::LocalMediaStarted);
    }

    #[test]
    fn test_detached_track_debug() {
        let handle = RemoteTrackHandle::detached("t1", "s1", "video");
        assert!(handle.track().is_none());
        assert!(format!("{:?}", handle).contains("t1"));
    }
}
