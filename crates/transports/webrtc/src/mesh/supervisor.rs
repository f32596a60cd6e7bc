//! Per-connection event loop
//!
//! One task per connection drains the peer's events and its relay socket,
//! and enforces the connect timeout. Handlers run one at a time, so the
//! negotiator never sees two callbacks for the same connection at once.

use crate::events::{MeshEvent, RemovalReason};
use crate::mesh::orchestrator::CallCore;
use crate::negotiation::Negotiator;
use crate::peer::{ConnectionMeta, PeerEvent, PeerState};
use crate::signaling::{Command, ControlMessage, InboundMessage, RelayHandle, RelayInbox, RelaySocket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the loop should do after handling one event
enum Flow {
    Continue,
    Stop,
}

struct Supervisor {
    core: Arc<CallCore>,
    negotiator: Arc<Negotiator>,
    meta: Arc<ConnectionMeta>,
    relay: RelayHandle,
    connected: bool,
}

pub(crate) async fn supervise(
    core: Arc<CallCore>,
    negotiator: Arc<Negotiator>,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
    socket: RelaySocket,
    cancel: CancellationToken,
) {
    let timeout = core.config.options.connect_timeout();
    let RelaySocket { handle, inbox } = socket;
    let mut inbox: Option<RelayInbox> = Some(inbox);
    let mut supervisor = Supervisor {
        meta: Arc::clone(negotiator.meta()),
        core,
        negotiator,
        relay: handle,
        connected: false,
    };
    let connection_id = supervisor.meta.connection_id.clone();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let flow = tokio::select! {
            _ = cancel.cancelled() => Flow::Stop,
            _ = &mut deadline, if !supervisor.connected => supervisor.on_deadline(timeout).await,
            event = events.recv() => match event {
                Some(event) => supervisor.on_peer_event(event).await,
                None => {
                    debug!("Peer events for {} ended", connection_id);
                    Flow::Stop
                }
            },
            text = recv_relay(&mut inbox), if inbox.is_some() => match text {
                Some(text) => {
                    supervisor.on_relay_text(&text).await;
                    Flow::Continue
                }
                None => {
                    debug!("Relay socket for {} closed", connection_id);
                    inbox = None;
                    Flow::Continue
                }
            },
        };

        if let Flow::Stop = flow {
            break;
        }
    }

    supervisor.negotiator.close();
    debug!("Supervisor for {} stopped", connection_id);
}

async fn recv_relay(inbox: &mut Option<RelayInbox>) -> Option<String> {
    match inbox {
        Some(inbox) => inbox.recv().await,
        None => std::future::pending().await,
    }
}

impl Supervisor {
    fn connection_id(&self) -> &str {
        &self.meta.connection_id
    }

    async fn on_deadline(&mut self, timeout: std::time::Duration) -> Flow {
        if self.meta.peer.state() == PeerState::Connected {
            // The state event is still queued and will attach media.
            self.connected = true;
            return Flow::Continue;
        }

        warn!(
            "Connection {} did not connect within {:?}, dropping it",
            self.connection_id(),
            timeout
        );
        self.core
            .remove_connection(self.connection_id(), RemovalReason::ConnectTimeout)
            .await;
        Flow::Stop
    }

    async fn on_peer_event(&mut self, event: PeerEvent) -> Flow {
        match event {
            PeerEvent::NegotiationNeeded => {
                self.negotiator.on_negotiation_needed().await;
            }
            PeerEvent::LocalCandidate(candidate) => {
                self.negotiator.on_ice_candidate(candidate).await;
            }
            PeerEvent::StateChanged(state) => {
                self.core.events.publish(MeshEvent::ConnectionStateChanged {
                    connection_id: self.meta.connection_id.clone(),
                    state,
                });
                if state == PeerState::Connected {
                    self.on_connected().await;
                }
            }
            PeerEvent::NegotiationMessage(text) => match InboundMessage::parse(&text) {
                Ok(InboundMessage::Negotiation { message, .. }) => {
                    self.negotiator.on_remote_message(message).await;
                }
                Ok(InboundMessage::EndOfCandidates) => {
                    debug!("Remote candidates complete for {}", self.connection_id());
                }
                Ok(other) => debug!("Ignoring {:?} on negotiation channel", other),
                Err(e) => warn!(
                    "Bad negotiation channel message on {}: {}",
                    self.connection_id(),
                    e
                ),
            },
            PeerEvent::Command(text) => return self.on_command(&text).await,
            PeerEvent::RemoteTrack(track) => {
                info!(
                    "Remote {} track {} on {}",
                    track.kind,
                    track.id,
                    self.connection_id()
                );
                self.core.events.publish(MeshEvent::RemoteTrack {
                    connection_id: self.meta.connection_id.clone(),
                    track,
                });
            }
        }
        Flow::Continue
    }

    async fn on_connected(&mut self) {
        self.connected = true;
        info!("Connection {} established", self.connection_id());

        self.core.attach_local_media(&self.meta).await;

        // Negotiation moves to the peer's own data channel from here on.
        self.relay.close();
    }

    async fn on_command(&mut self, text: &str) -> Flow {
        let command: Command = match text.parse() {
            Ok(command) => command,
            Err(e) => {
                warn!("Ignoring command on {}: {}", self.connection_id(), e);
                return Flow::Continue;
            }
        };
        debug!("{} from {}", command, self.connection_id());

        match command {
            Command::VideoOn => {
                match self.core.media.start().await {
                    Ok(_) => self.core.events.publish(MeshEvent::LocalMediaStarted),
                    Err(e) => {
                        warn!("Failed to start local media: {}", e);
                        return Flow::Continue;
                    }
                }
                if self.connected {
                    self.core.attach_local_media(&self.meta).await;
                }
                Flow::Continue
            }
            Command::VideoOff => {
                self.core.events.publish(MeshEvent::RemoteVideoCleared {
                    connection_id: self.meta.connection_id.clone(),
                });
                self.core
                    .remove_connection(self.connection_id(), RemovalReason::VideoOff)
                    .await;
                Flow::Stop
            }
        }
    }

    async fn on_relay_text(&self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(InboundMessage::Negotiation {
                message,
                sender_connection_id,
            }) => {
                if let Some(sender) = sender_connection_id.as_deref() {
                    if sender != self.connection_id() {
                        debug!(
                            "Dropping {} from {} on relay socket of {}",
                            message.kind(),
                            sender,
                            self.connection_id()
                        );
                        return;
                    }
                }
                self.negotiator.on_remote_message(message).await;
            }
            Ok(InboundMessage::Control(ControlMessage::Update {
                user_id,
                conversation_id,
            })) => {
                self.core.events.publish(MeshEvent::ParticipantUpdated {
                    user_id,
                    conversation_id,
                });
            }
            Ok(InboundMessage::EndOfCandidates) => {
                debug!("Remote candidates complete for {}", self.connection_id());
            }
            Ok(other) => debug!(
                "Ignoring {:?} on relay socket of {}",
                other,
                self.connection_id()
            ),
            Err(e) => warn!("Bad relay message on {}: {}", self.connection_id(), e),
        }
    }
}
