//! Live connections of the call

use crate::peer::ConnectionMeta;
use crate::signaling::RelayHandle;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A registered connection together with what must be released with it
pub struct ConnectionEntry {
    pub meta: Arc<ConnectionMeta>,
    /// Relay socket the connection negotiates over
    pub relay: RelayHandle,
    /// Cancels the supervisor and parked candidate retries
    pub cancel: CancellationToken,
}

impl ConnectionEntry {
    pub fn connection_id(&self) -> &str {
        &self.meta.connection_id
    }

    /// Stop background work and release the relay socket
    ///
    /// The peer connection itself is closed by the caller, which can await.
    pub fn release(&self) {
        self.cancel.cancel();
        self.relay.close();
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Arc<ConnectionEntry>>,
    active: usize,
}

/// Mapping from connection id to its entry, plus the active count
///
/// The count moves only when an entry is actually inserted or removed, so it
/// always equals the number of entries and never goes below zero.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection
    ///
    /// # Errors
    ///
    /// Returns `DuplicateConnection` if the id is already live.
    pub fn add(&self, entry: Arc<ConnectionEntry>) -> Result<usize> {
        let mut inner = self.inner.write();
        let id = entry.connection_id().to_string();
        if inner.entries.contains_key(&id) {
            return Err(Error::DuplicateConnection(id));
        }
        inner.entries.insert(id.clone(), entry);
        inner.active += 1;
        debug!("Registered connection {} (active={})", id, inner.active);
        Ok(inner.active)
    }

    /// Remove a connection, returning it and the remaining count
    ///
    /// `None` if the id was not registered; the count is left untouched.
    pub fn remove(&self, connection_id: &str) -> Option<(Arc<ConnectionEntry>, usize)> {
        let mut inner = self.inner.write();
        let entry = inner.entries.remove(connection_id)?;
        inner.active = inner.active.saturating_sub(1);
        debug!(
            "Removed connection {} (active={})",
            connection_id, inner.active
        );
        Some((entry, inner.active))
    }

    /// Drop every connection at once
    pub fn reset(&self) -> Vec<Arc<ConnectionEntry>> {
        let mut inner = self.inner.write();
        inner.active = 0;
        inner.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<ConnectionEntry>> {
        self.inner.read().entries.get(connection_id).cloned()
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.inner.read().entries.contains_key(connection_id)
    }

    pub fn entries(&self) -> Vec<Arc<ConnectionEntry>> {
        self.inner.read().entries.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.inner.read().active
    }
}
