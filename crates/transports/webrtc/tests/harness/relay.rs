//! In-process signaling relay and participant lookup
//!
//! Behaves like the hosted relay: every socket gets an id, frames addressed
//! by `connectionId` are forwarded with `senderConnectionId` set, and open
//! master sockets are reported by the lookup. The hub also pairs the two
//! ends of each connection so fake peers can reach each other's channels.

use async_trait::async_trait;
use meshcall_webrtc::signaling::RelayFrame;
use meshcall_webrtc::{OpenOffer, ParticipantLookup, PeerEvent, RelayConnector, RelaySocket, Role};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A frame forwarded by the hub
#[derive(Debug, Clone)]
pub struct Routed {
    pub from: String,
    pub to: String,
    pub body: Value,
}

impl Routed {
    pub fn is_initiate(&self) -> bool {
        self.body.get("type").and_then(Value::as_str) == Some("INITIATE")
    }

    /// SDP type of a forwarded description
    pub fn description_kind(&self) -> Option<&str> {
        self.body.get("description")?.get("type")?.as_str()
    }
}

struct SocketSlot {
    role: Role,
    device_id: String,
    created_at: i64,
    incoming: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    sockets: HashMap<String, SocketSlot>,
    static_offers: Vec<OpenOffer>,
    routed: Vec<Routed>,
    pairs: HashMap<String, String>,
    peers: HashMap<String, mpsc::UnboundedSender<PeerEvent>>,
}

#[derive(Default)]
pub struct RelayHub {
    state: Mutex<HubState>,
}

impl RelayHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Relay connector for one participant's device
    pub fn connector(self: &Arc<Self>, device_id: &str) -> Arc<HubConnector> {
        Arc::new(HubConnector {
            hub: Arc::clone(self),
            device_id: device_id.to_string(),
        })
    }

    pub fn lookup(self: &Arc<Self>) -> Arc<HubLookup> {
        Arc::new(HubLookup {
            hub: Arc::clone(self),
        })
    }

    /// Report an offer that has no socket behind it
    pub fn add_static_offer(&self, offer: OpenOffer) {
        self.state.lock().static_offers.push(offer);
    }

    pub fn routed(&self) -> Vec<Routed> {
        self.state.lock().routed.clone()
    }

    /// Open master sockets, in creation order
    pub fn open_masters(&self) -> Vec<OpenOffer> {
        let state = self.state.lock();
        let mut masters: Vec<(&String, &SocketSlot)> = state
            .sockets
            .iter()
            .filter(|(_, slot)| slot.role == Role::Master)
            .collect();
        masters.sort_by_key(|(_, slot)| slot.created_at);
        masters
            .into_iter()
            .map(|(id, slot)| OpenOffer::new(id.clone(), slot.device_id.clone(), slot.created_at))
            .collect()
    }

    /// Deliver raw text to a socket as if the relay sent it
    pub fn inject(&self, to: &str, text: &str) -> bool {
        let state = self.state.lock();
        match state.sockets.get(to) {
            Some(slot) => slot.incoming.send(text.to_string()).is_ok(),
            None => false,
        }
    }

    /// Register the event sender of the peer known locally as `connection_id`
    pub fn attach_peer(&self, connection_id: &str, events: mpsc::UnboundedSender<PeerEvent>) {
        self.state
            .lock()
            .peers
            .insert(connection_id.to_string(), events);
    }

    /// Hand an event to the other end of `connection_id`
    pub fn deliver(&self, connection_id: &str, event: PeerEvent) -> bool {
        let state = self.state.lock();
        let Some(partner) = state.pairs.get(connection_id) else {
            return false;
        };
        match state.peers.get(partner) {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    fn register(self: &Arc<Self>, role: Role, device_id: &str) -> RelaySocket {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = format!("conn-{}", state.next_id);
            let created_at = state.next_id as i64;
            state.sockets.insert(
                id.clone(),
                SocketSlot {
                    role,
                    device_id: device_id.to_string(),
                    created_at,
                    incoming: incoming_tx,
                },
            );
            id
        };

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                match frame {
                    RelayFrame::Text(text) => hub.route(&id, &text),
                    RelayFrame::Close => break,
                }
            }
            hub.state.lock().sockets.remove(&id);
        });

        RelaySocket::new(role, frames_tx, incoming_rx)
    }

    fn route(&self, from: &str, text: &str) {
        let Ok(mut body) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let Some(obj) = body.as_object_mut() else {
            return;
        };
        let Some(to) = obj
            .remove("connectionId")
            .and_then(|v| v.as_str().map(str::to_string))
        else {
            return;
        };
        obj.remove("action");
        obj.remove("storeId");
        obj.insert(
            "senderConnectionId".to_string(),
            Value::String(from.to_string()),
        );

        let routed = Routed {
            from: from.to_string(),
            to: to.clone(),
            body,
        };

        let mut state = self.state.lock();
        if routed.is_initiate() {
            state.pairs.insert(from.to_string(), to.clone());
            state.pairs.insert(to.clone(), from.to_string());
        }
        if let Some(slot) = state.sockets.get(&to) {
            let _ = slot.incoming.send(routed.body.to_string());
        }
        state.routed.push(routed);
    }
}

pub struct HubConnector {
    hub: Arc<RelayHub>,
    device_id: String,
}

#[async_trait]
impl RelayConnector for HubConnector {
    async fn open(&self, role: Role) -> meshcall_webrtc::Result<RelaySocket> {
        Ok(self.hub.register(role, &self.device_id))
    }
}

pub struct HubLookup {
    hub: Arc<RelayHub>,
}

#[async_trait]
impl ParticipantLookup for HubLookup {
    async fn open_offers(
        &self,
        _store_id: &str,
        _conversation_id: &str,
    ) -> meshcall_webrtc::Result<Vec<OpenOffer>> {
        let mut offers = self.hub.state.lock().static_offers.clone();
        offers.extend(self.hub.open_masters());
        Ok(offers)
    }
}
