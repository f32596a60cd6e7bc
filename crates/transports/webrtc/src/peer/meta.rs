//! Per-connection metadata

use crate::peer::transport::{ControlChannel, PeerTransport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which side of a connection we are
///
/// Fixed for the lifetime of a connection. Only the master creates offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Accepted an `INITIATE`; makes every offer on this connection
    Master,
    /// Sent the `INITIATE`; only answers
    Slave,
}

impl Role {
    /// Value of the `connectionType` relay query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two data channels negotiated at creation time
#[derive(Clone)]
pub struct Channels {
    pub command: Arc<dyn ControlChannel>,
    pub negotiation: Arc<dyn ControlChannel>,
}

/// Negotiation flags for one connection
#[derive(Debug, Default)]
pub struct NegotiationFlags {
    making_offer: AtomicBool,
    ignore_offer: AtomicBool,
    is_setting_remote_answer_pending: AtomicBool,
}

impl NegotiationFlags {
    /// Claim the offer slot
    ///
    /// Returns `None` if an offer is already being made. The slot is released
    /// when the guard drops, on every exit path.
    pub fn try_begin_offer(&self) -> Option<OfferGuard<'_>> {
        self.making_offer
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| OfferGuard { flags: self })
    }

    pub fn making_offer(&self) -> bool {
        self.making_offer.load(Ordering::Acquire)
    }

    /// When set, description failures are logged at debug level only
    pub fn ignore_offer(&self) -> bool {
        self.ignore_offer.load(Ordering::Acquire)
    }

    pub fn set_ignore_offer(&self, value: bool) {
        self.ignore_offer.store(value, Ordering::Release);
    }

    /// True while a remote answer is being applied
    pub fn is_setting_remote_answer_pending(&self) -> bool {
        self.is_setting_remote_answer_pending.load(Ordering::Acquire)
    }

    pub(crate) fn set_remote_answer_pending(&self, value: bool) {
        self.is_setting_remote_answer_pending
            .store(value, Ordering::Release);
    }
}

/// Holds the `making_offer` flag
pub struct OfferGuard<'a> {
    flags: &'a NegotiationFlags,
}

impl Drop for OfferGuard<'_> {
    fn drop(&mut self) {
        self.flags.making_offer.store(false, Ordering::Release);
    }
}

/// One record per remote participant
pub struct ConnectionMeta {
    pub connection_id: String,
    pub role: Role,
    pub peer: Arc<dyn PeerTransport>,
    pub channels: Channels,
    pub flags: NegotiationFlags,
    /// Local stream whose tracks this connection already sends
    attached_stream: Mutex<Option<String>>,
}

impl ConnectionMeta {
    pub fn new(
        connection_id: impl Into<String>,
        role: Role,
        peer: Arc<dyn PeerTransport>,
        channels: Channels,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            role,
            peer,
            channels,
            flags: NegotiationFlags::default(),
            attached_stream: Mutex::new(None),
        }
    }

    /// Record that `stream_id` is being attached
    ///
    /// Returns false if that stream was already attached.
    pub fn mark_attached(&self, stream_id: &str) -> bool {
        let mut attached = self.attached_stream.lock();
        if attached.as_deref() == Some(stream_id) {
            return false;
        }
        *attached = Some(stream_id.to_string());
        true
    }
}

impl fmt::Debug for ConnectionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMeta")
            .field("connection_id", &self.connection_id)
            .field("role", &self.role)
            .field("state", &self.peer.state())
            .field("flags", &self.flags)
            .finish()
    }
}
