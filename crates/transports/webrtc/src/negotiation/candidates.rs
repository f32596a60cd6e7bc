//! Best-effort delivery of remote ICE candidates
//!
//! Candidates often arrive before the remote description they belong to has
//! been applied. Those are parked and retried on a fixed interval until the
//! description exists or the connection is torn down.

use crate::peer::PeerTransport;
use crate::signaling::IceCandidate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// What happened to a candidate handed to [`CandidateRelay::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDelivery {
    /// Applied immediately (or rejected by the peer and logged)
    Applied,
    /// Parked until a remote description exists
    Deferred,
    /// The relay was already cancelled
    Dropped,
}

pub struct CandidateRelay {
    connection_id: String,
    peer: Arc<dyn PeerTransport>,
    retry_interval: Duration,
    cancel: CancellationToken,
    pending: Arc<AtomicUsize>,
}

impl CandidateRelay {
    /// # Arguments
    ///
    /// * `retry_interval` - Delay between attempts for parked candidates
    /// * `cancel` - Stops every parked retry when cancelled
    pub fn new(
        connection_id: impl Into<String>,
        peer: Arc<dyn PeerTransport>,
        retry_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            peer,
            retry_interval,
            cancel,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Apply `candidate` now if possible, otherwise park it
    pub async fn add(&self, candidate: IceCandidate) -> CandidateDelivery {
        if self.cancel.is_cancelled() {
            return CandidateDelivery::Dropped;
        }

        if self.peer.has_remote_description().await {
            apply(&self.connection_id, self.peer.as_ref(), candidate).await;
            return CandidateDelivery::Applied;
        }

        debug!(
            "Remote description missing for {}, retrying candidate every {:?}",
            self.connection_id, self.retry_interval
        );

        self.pending.fetch_add(1, Ordering::SeqCst);
        let connection_id = self.connection_id.clone();
        let peer = Arc::clone(&self.peer);
        let interval = self.retry_interval;
        let cancel = self.cancel.clone();
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Dropping parked candidate for {}", connection_id);
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if peer.has_remote_description().await {
                            apply(&connection_id, peer.as_ref(), candidate).await;
                            break;
                        }
                    }
                }
            }
            pending.fetch_sub(1, Ordering::SeqCst);
        });

        CandidateDelivery::Deferred
    }

    /// Candidates still waiting for a remote description
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop all parked retries
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

async fn apply(connection_id: &str, peer: &dyn PeerTransport, candidate: IceCandidate) {
    match peer.add_ice_candidate(candidate).await {
        Ok(()) => debug!("Applied remote candidate for {}", connection_id),
        Err(e) => error!("Failed to apply candidate for {}: {}", connection_id, e),
    }
}
