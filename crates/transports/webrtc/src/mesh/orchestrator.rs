//! Call-wide orchestration: discovery, fan-out, fan-in and teardown

use crate::config::MeshConfig;
use crate::events::{EventBus, MeshEvent, RemovalReason};
use crate::media::{LocalMedia, LocalStream, MediaSource};
use crate::mesh::discovery::select_offer_targets;
use crate::mesh::lookup::{HttpParticipantLookup, ParticipantLookup};
use crate::mesh::registry::{ConnectionEntry, Registry};
use crate::mesh::supervisor;
use crate::negotiation::{CandidateRelay, Negotiator};
use crate::peer::{ConnectionMeta, PeerFactory, PeerState, Role, RtcPeerFactory};
use crate::signaling::{
    Command, ControlMessage, InboundMessage, InitiateEnvelope, RelayConnector, RelayHandle,
    RelaySocket, SignalingTransport, WebSocketRelay,
};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A running call: the local participant's side of the mesh
///
/// Cheap to clone; clones share the same call.
#[derive(Clone)]
pub struct MeshCall {
    core: Arc<CallCore>,
}

struct Session {
    cancel: CancellationToken,
    /// Socket currently waiting for `INITIATE`
    listener: Option<RelayHandle>,
}

pub(crate) struct CallCore {
    pub(crate) config: Arc<MeshConfig>,
    relay: Arc<dyn RelayConnector>,
    peers: Arc<dyn PeerFactory>,
    lookup: Arc<dyn ParticipantLookup>,
    pub(crate) registry: Registry,
    pub(crate) events: EventBus,
    pub(crate) media: LocalMedia,
    session: Mutex<Option<Session>>,
}

impl MeshCall {
    /// Create a call from its collaborators
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` does not validate.
    pub fn new(
        config: MeshConfig,
        relay: Arc<dyn RelayConnector>,
        peers: Arc<dyn PeerFactory>,
        lookup: Arc<dyn ParticipantLookup>,
        media: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            core: Arc::new(CallCore {
                config: Arc::new(config),
                relay,
                peers,
                lookup,
                registry: Registry::new(),
                events: EventBus::new(),
                media: LocalMedia::new(media),
                session: Mutex::new(None),
            }),
        })
    }

    /// Create a call backed by the WebSocket relay, webrtc-rs peers and the
    /// HTTP participant lookup
    pub fn from_config(config: MeshConfig, media: Arc<dyn MediaSource>) -> Result<Self> {
        config.validate()?;

        let relay = Arc::new(WebSocketRelay::new(
            config.relay_url.clone(),
            config.identity.clone(),
        ));
        let lookup = Arc::new(HttpParticipantLookup::new(
            &config.lookup_url,
            config.options.lookup_timeout(),
        )?);
        let peers = Arc::new(RtcPeerFactory::new(Arc::new(config.clone())));

        Self::new(config, relay, peers, lookup, media)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.core.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.core.events.subscribe()
    }

    pub fn active_count(&self) -> usize {
        self.core.registry.active_count()
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.core.registry.ids()
    }

    pub fn connection_state(&self, connection_id: &str) -> Option<PeerState> {
        self.core
            .registry
            .get(connection_id)
            .map(|entry| entry.meta.peer.state())
    }

    /// Whether the call is listening for joiners
    pub fn is_running(&self) -> bool {
        self.core.session.lock().is_some()
    }

    pub fn local_stream(&self) -> Option<LocalStream> {
        self.core.media.current()
    }

    /// Join the conversation
    ///
    /// Acquires local media (reusing the running stream), tells already
    /// connected peers to turn their video back on, then (if the call is not running yet) opens the master
    /// listener socket and dials every participant found by the lookup.
    ///
    /// # Errors
    ///
    /// Fails if local media cannot be acquired or the listener socket cannot
    /// be opened. Lookup and dial failures are logged and do not fail the call.
    pub async fn start(&self) -> Result<()> {
        let core = &self.core;

        core.media.start().await?;
        core.events.publish(MeshEvent::LocalMediaStarted);
        core.broadcast_command(Command::VideoOn).await;

        let cancel = {
            let mut session = core.session.lock();
            if session.is_some() {
                None
            } else {
                let cancel = CancellationToken::new();
                *session = Some(Session {
                    cancel: cancel.clone(),
                    listener: None,
                });
                Some(cancel)
            }
        };
        let Some(cancel) = cancel else {
            debug!("Call already running, local media kept");
            return Ok(());
        };

        let identity = &core.config.identity;
        info!(
            "Joining conversation {} as {} on {}",
            identity.conversation_id, identity.user_id, identity.device_id
        );

        let listener = match core.relay.open(Role::Master).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to open master relay socket: {}", e);
                core.session.lock().take();
                if core.media.stop().await {
                    core.events.publish(MeshEvent::LocalMediaStopped);
                }
                return Err(e);
            }
        };
        core.set_listener(Some(listener.handle.clone()));
        tokio::spawn(listen(Arc::clone(core), listener, cancel.clone()));

        let offers = match core
            .lookup
            .open_offers(&identity.store_id, &identity.conversation_id)
            .await
        {
            Ok(offers) => offers,
            Err(e) => {
                warn!("Participant lookup failed, waiting for joiners: {}", e);
                return Ok(());
            }
        };

        let targets = select_offer_targets(&offers, &identity.device_id);
        info!(
            "Lookup found {} open offers, dialling {}",
            offers.len(),
            targets.len()
        );

        for connection_id in targets {
            if cancel.is_cancelled() {
                break;
            }
            if core.registry.contains(&connection_id) {
                debug!("Already connected to {}", connection_id);
                continue;
            }
            if let Err(e) = core.open_slave(&connection_id, &cancel).await {
                warn!("Failed to dial {}: {}", connection_id, e);
            }
        }

        Ok(())
    }

    /// Leave the call
    ///
    /// Every connection stops sending, is told `VIDEO_OFF` when its command
    /// channel is open, and is closed. The registry empties and the call ends.
    pub async fn hang_up(&self) {
        let core = &self.core;
        let entries = core.registry.reset();
        info!("Hanging up {} connections", entries.len());

        for entry in entries {
            let meta = &entry.meta;
            if let Err(e) = meta.peer.remove_senders().await {
                debug!("Failed to remove senders from {}: {}", meta.connection_id, e);
            }
            core.events.publish(MeshEvent::RemoteVideoCleared {
                connection_id: meta.connection_id.clone(),
            });

            if meta.channels.command.is_open() {
                if let Err(e) = meta
                    .channels
                    .command
                    .send_text(Command::VideoOff.as_str())
                    .await
                {
                    warn!("Failed to send VIDEO_OFF to {}: {}", meta.connection_id, e);
                }
            }

            entry.release();
            if let Err(e) = meta.peer.close().await {
                debug!("Failed to close {}: {}", meta.connection_id, e);
            }
            core.events.publish(MeshEvent::ConnectionRemoved {
                connection_id: meta.connection_id.clone(),
                reason: RemovalReason::HangUp,
            });
        }

        core.end_call().await;
    }
}

impl CallCore {
    fn set_listener(&self, handle: Option<RelayHandle>) {
        if let Some(session) = self.session.lock().as_mut() {
            session.listener = handle;
        }
    }

    /// Send a command to every connection whose command channel is open
    async fn broadcast_command(&self, command: Command) {
        for entry in self.registry.entries() {
            let channel = &entry.meta.channels.command;
            if !channel.is_open() {
                continue;
            }
            if let Err(e) = channel.send_text(command.as_str()).await {
                warn!(
                    "Failed to send {} to {}: {}",
                    command,
                    entry.connection_id(),
                    e
                );
            }
        }
    }

    /// Dial an existing participant's listening socket
    async fn open_slave(
        self: &Arc<Self>,
        connection_id: &str,
        session: &CancellationToken,
    ) -> Result<()> {
        let socket = self.relay.open(Role::Slave).await?;
        let relay = socket.handle.clone();
        self.spawn_connection(connection_id, Role::Slave, socket, session)
            .await?;

        let initiate = InitiateEnvelope::new(&self.config.identity.store_id, connection_id)
            .to_json()
            .and_then(|text| relay.send_text(text));
        if let Err(e) = initiate {
            self.remove_connection(connection_id, RemovalReason::SetupFailed)
                .await;
            return Err(e);
        }
        info!("Sent INITIATE to {}", connection_id);
        Ok(())
    }

    /// Create, register and supervise one connection
    async fn spawn_connection(
        self: &Arc<Self>,
        connection_id: &str,
        role: Role,
        socket: RelaySocket,
        session: &CancellationToken,
    ) -> Result<()> {
        let parts = match self.peers.create(connection_id).await {
            Ok(parts) => parts,
            Err(e) => {
                socket.handle.close();
                return Err(e);
            }
        };

        let cancel = session.child_token();
        let meta = Arc::new(ConnectionMeta::new(
            connection_id,
            role,
            parts.transport,
            parts.channels,
        ));
        let entry = Arc::new(ConnectionEntry {
            meta: Arc::clone(&meta),
            relay: socket.handle.clone(),
            cancel: cancel.clone(),
        });

        if let Err(e) = self.registry.add(entry) {
            socket.handle.close();
            if let Err(close_err) = meta.peer.close().await {
                debug!("Failed to close rejected peer: {}", close_err);
            }
            return Err(e);
        }
        self.events.publish(MeshEvent::ConnectionAdded {
            connection_id: connection_id.to_string(),
            role,
        });
        info!("Opened {} connection {}", role, connection_id);

        let negotiator = Arc::new(Negotiator::new(
            Arc::clone(&meta),
            SignalingTransport::new(
                connection_id,
                socket.handle.clone(),
                Arc::clone(&meta.channels.negotiation),
            ),
            CandidateRelay::new(
                connection_id,
                Arc::clone(&meta.peer),
                self.config.options.candidate_retry_interval(),
                cancel.child_token(),
            ),
        ));

        tokio::spawn(supervisor::supervise(
            Arc::clone(self),
            negotiator,
            parts.events,
            socket,
            cancel,
        ));
        Ok(())
    }

    /// Remove a connection and close its peer
    ///
    /// Returns false if it was already gone. Dropping the last connection
    /// ends the call.
    pub(crate) async fn remove_connection(&self, connection_id: &str, reason: RemovalReason) -> bool {
        let Some((entry, remaining)) = self.registry.remove(connection_id) else {
            return false;
        };

        entry.release();
        if let Err(e) = entry.meta.peer.close().await {
            debug!("Failed to close {}: {}", connection_id, e);
        }
        self.events.publish(MeshEvent::ConnectionRemoved {
            connection_id: connection_id.to_string(),
            reason,
        });
        info!(
            "Removed connection {} ({:?}), {} remaining",
            connection_id, reason, remaining
        );

        if remaining == 0 {
            self.end_call().await;
        }
        true
    }

    /// Attach the current local tracks to a connection, once per stream
    ///
    /// Add failures are expected while a connection is closing and are not
    /// errors.
    pub(crate) async fn attach_local_media(&self, meta: &ConnectionMeta) {
        let Some(stream) = self.media.current() else {
            debug!("No local media to attach to {}", meta.connection_id);
            return;
        };
        if !meta.mark_attached(&stream.stream_id) {
            debug!(
                "Stream {} already attached to {}",
                stream.stream_id, meta.connection_id
            );
            return;
        }

        for track in stream.tracks {
            if meta.peer.state() == PeerState::Closed {
                debug!("Connection {} closed, not attaching tracks", meta.connection_id);
                return;
            }
            if let Err(e) = meta.peer.add_track(track).await {
                debug!("Track not attached to {}: {}", meta.connection_id, e);
            }
        }
    }

    async fn end_call(&self) {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return;
        };

        session.cancel.cancel();
        if let Some(listener) = session.listener {
            listener.close();
        }
        if self.media.stop().await {
            self.events.publish(MeshEvent::LocalMediaStopped);
        }

        info!("Call ended");
        self.events.publish(MeshEvent::CallEnded);
    }
}

/// Wait for `INITIATE` on the master socket
///
/// Each joiner gets the socket its `INITIATE` arrived on, and a fresh
/// listener socket takes its place.
async fn listen(core: Arc<CallCore>, mut socket: RelaySocket, cancel: CancellationToken) {
    loop {
        let text = tokio::select! {
            _ = cancel.cancelled() => break,
            text = socket.inbox.recv() => text,
        };
        let Some(text) = text else {
            warn!("Master relay socket closed, no longer accepting joiners");
            break;
        };

        match InboundMessage::parse(&text) {
            Ok(InboundMessage::Control(ControlMessage::Initiate {
                sender_connection_id,
            })) => {
                info!("INITIATE from {}", sender_connection_id);
                if core.registry.contains(&sender_connection_id) {
                    warn!("Already connected to {}, ignoring", sender_connection_id);
                    continue;
                }

                match core.relay.open(Role::Master).await {
                    Ok(next) => {
                        let handed = std::mem::replace(&mut socket, next);
                        core.set_listener(Some(socket.handle.clone()));
                        accept(&core, &sender_connection_id, handed, &cancel).await;
                    }
                    Err(e) => {
                        error!("Failed to reopen master relay socket: {}", e);
                        core.set_listener(None);
                        accept(&core, &sender_connection_id, socket, &cancel).await;
                        return;
                    }
                }
            }
            Ok(InboundMessage::Control(ControlMessage::Update {
                user_id,
                conversation_id,
            })) => {
                core.events.publish(MeshEvent::ParticipantUpdated {
                    user_id,
                    conversation_id,
                });
            }
            Ok(other) => debug!("Ignoring message on master socket: {:?}", other),
            Err(e) => warn!("Bad message on master socket: {}", e),
        }
    }

    debug!("Master listener stopped");
}

async fn accept(
    core: &Arc<CallCore>,
    sender_connection_id: &str,
    socket: RelaySocket,
    cancel: &CancellationToken,
) {
    if let Err(e) = core
        .spawn_connection(sender_connection_id, Role::Master, socket, cancel)
        .await
    {
        warn!("Failed to accept {}: {}", sender_connection_id, e);
    }
}
