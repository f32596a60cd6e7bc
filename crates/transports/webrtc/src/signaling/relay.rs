//! Signaling relay sockets
//!
//! One relay socket is opened per local role: the listening master socket,
//! and one slave socket per outbound connection. A socket is split into a
//! cloneable [`RelayHandle`] for sending and a [`RelayInbox`] for receiving,
//! so the inbox can be handed over to a connection while the handle stays
//! reachable from the registry.

use crate::config::CallIdentity;
use crate::peer::Role;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Outbound frame for a relay socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Close,
}

/// Sending half of a relay socket
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<RelayFrame>,
    open: Arc<AtomicBool>,
    role: Role,
}

impl RelayHandle {
    /// Role the socket was opened with
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the socket still accepts messages
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    /// Queue a text frame
    ///
    /// # Errors
    ///
    /// Returns `RelayClosed` if the socket was closed locally or by the relay.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::RelayClosed(format!("{} socket", self.role)));
        }
        self.tx.send(RelayFrame::Text(text.into())).map_err(|_| {
            self.open.store(false, Ordering::SeqCst);
            Error::RelayClosed(format!("{} socket", self.role))
        })
    }

    /// Close the socket; later sends fail and callers fall back
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closing {} relay socket", self.role);
            let _ = self.tx.send(RelayFrame::Close);
        }
    }
}

/// Receiving half of a relay socket
#[derive(Debug)]
pub struct RelayInbox {
    rx: mpsc::UnboundedReceiver<String>,
}

impl RelayInbox {
    /// Next text frame, or `None` once the socket is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// An open relay socket
#[derive(Debug)]
pub struct RelaySocket {
    pub handle: RelayHandle,
    pub inbox: RelayInbox,
}

impl RelaySocket {
    /// Assemble a socket from raw channels
    ///
    /// `frames` receives everything sent through the handle, `incoming`
    /// feeds the inbox. Used by [`WebSocketRelay`] and by in-process relays.
    pub fn new(
        role: Role,
        frames: mpsc::UnboundedSender<RelayFrame>,
        incoming: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            handle: RelayHandle {
                tx: frames,
                open: Arc::new(AtomicBool::new(true)),
                role,
            },
            inbox: RelayInbox { rx: incoming },
        }
    }
}

/// Opens relay sockets
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Open a new socket registered with the relay under `role`
    async fn open(&self, role: Role) -> Result<RelaySocket>;
}

/// WebSocket relay client
///
/// Connects to
/// `relay_url?storeId=..&conversationId=..&userId=..&deviceId=..&connectionType=master|slave`.
pub struct WebSocketRelay {
    relay_url: String,
    identity: CallIdentity,
}

impl WebSocketRelay {
    pub fn new(relay_url: impl Into<String>, identity: CallIdentity) -> Self {
        Self {
            relay_url: relay_url.into(),
            identity,
        }
    }

    /// Relay URL with the identity and role query
    pub fn socket_url(&self, role: Role) -> Result<Url> {
        let mut url = Url::parse(&self.relay_url)
            .map_err(|e| Error::InvalidConfig(format!("Invalid relay URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("storeId", &self.identity.store_id)
            .append_pair("conversationId", &self.identity.conversation_id)
            .append_pair("userId", &self.identity.user_id)
            .append_pair("deviceId", &self.identity.device_id)
            .append_pair("connectionType", role.as_str());
        Ok(url)
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<RelayFrame>,
        open: Arc<AtomicBool>,
    ) {
        while let Some(frame) = rx.recv().await {
            let msg = match frame {
                RelayFrame::Text(text) => Message::Text(text),
                RelayFrame::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = write.send(msg).await {
                error!("Failed to send relay message: {}", e);
                break;
            }
        }

        open.store(false, Ordering::SeqCst);
        debug!("Relay sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        tx: mpsc::UnboundedSender<String>,
        open: Arc<AtomicBool>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    debug!("Relay message received: {}", text);
                    if tx.send(text).is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Relay socket closed by server");
                    break;
                }
                Err(e) => {
                    warn!("Relay socket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        open.store(false, Ordering::SeqCst);
        debug!("Relay receiver task terminated");
    }
}

#[async_trait]
impl RelayConnector for WebSocketRelay {
    async fn open(&self, role: Role) -> Result<RelaySocket> {
        let url = self.socket_url(role)?;
        info!("Opening {} relay socket: {}", role, self.relay_url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let socket = RelaySocket::new(role, frames_tx, incoming_rx);
        let open = Arc::clone(&socket.handle.open);

        tokio::spawn(Self::sender_task(write, frames_rx, Arc::clone(&open)));
        tokio::spawn(Self::receiver_task(read, incoming_tx, open));

        Ok(socket)
    }
}
