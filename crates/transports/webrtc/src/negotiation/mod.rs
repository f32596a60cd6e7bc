//! Per-connection offer/answer state machine
//!
//! Collisions are avoided by role rather than detected: the master side of a
//! connection makes every offer and the slave side only ever answers. Roles
//! are fixed when the connection is opened (whoever receives `INITIATE` is
//! master), so two offers can never cross on one connection and no rollback
//! path is needed.

pub mod candidates;

pub use candidates::{CandidateDelivery, CandidateRelay};

use crate::peer::{ConnectionMeta, Role};
use crate::signaling::{IceCandidate, SdpKind, SessionDescription, SignalingMessage, SignalingTransport};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Negotiation progress of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing exchanged yet
    Idle,
    /// Local offer sent, waiting for the answer
    OfferPending,
    /// Last exchange completed
    Stable,
    /// Terminal
    Closed,
}

pub struct Negotiator {
    meta: Arc<ConnectionMeta>,
    signaling: SignalingTransport,
    candidates: CandidateRelay,
    state: Mutex<NegotiationState>,
}

impl Negotiator {
    pub fn new(
        meta: Arc<ConnectionMeta>,
        signaling: SignalingTransport,
        candidates: CandidateRelay,
    ) -> Self {
        Self {
            meta,
            signaling,
            candidates,
            state: Mutex::new(NegotiationState::Idle),
        }
    }

    pub fn meta(&self) -> &Arc<ConnectionMeta> {
        &self.meta
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    /// Candidates parked until a remote description exists
    pub fn pending_candidates(&self) -> usize {
        self.candidates.pending()
    }

    /// Build, apply and send a local offer
    ///
    /// Returns `true` if an offer was sent. Slaves never offer. A master skips
    /// the trigger while an offer is being built or awaiting its answer, so at
    /// most one offer is in flight per connection.
    pub async fn on_negotiation_needed(&self) -> bool {
        let id = &self.meta.connection_id;

        if self.meta.role != Role::Master {
            debug!("Negotiation needed on slave connection {}, ignoring", id);
            return false;
        }

        match self.state() {
            NegotiationState::Closed => return false,
            NegotiationState::OfferPending => {
                debug!("Offer already pending on {}, skipping", id);
                return false;
            }
            NegotiationState::Idle | NegotiationState::Stable => {}
        }

        let Some(_guard) = self.meta.flags.try_begin_offer() else {
            debug!("Offer already being made on {}, skipping", id);
            return false;
        };

        match self.make_offer().await {
            Ok(()) => {
                let mut state = self.state.lock();
                if *state != NegotiationState::Closed {
                    *state = NegotiationState::OfferPending;
                }
                info!("Offer sent on connection {}", id);
                true
            }
            Err(e) => {
                error!("Failed to make offer on {}: {}", id, e);
                false
            }
        }
    }

    async fn make_offer(&self) -> Result<()> {
        let peer = &self.meta.peer;
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        let description = peer.local_description().await.unwrap_or(offer);
        self.signaling
            .send(&SignalingMessage::Description(description))
            .await?;
        Ok(())
    }

    /// Handle a description or candidate from the remote peer
    ///
    /// Failures are logged and never reported back to the remote side.
    pub async fn on_remote_message(&self, message: SignalingMessage) {
        if self.state() == NegotiationState::Closed {
            return;
        }

        let kind = message.kind();
        let result = match message {
            SignalingMessage::Description(description) if description.kind == SdpKind::Offer => {
                self.accept_offer(description).await
            }
            SignalingMessage::Description(description) => self.apply_answer(description).await,
            SignalingMessage::Candidate(candidate) => {
                self.candidates.add(candidate).await;
                Ok(())
            }
        };

        if let Err(e) = result {
            if self.meta.flags.ignore_offer() {
                debug!(
                    "Ignored {} failure on {}: {}",
                    kind, self.meta.connection_id, e
                );
            } else {
                error!(
                    "Failed to apply remote {} on {}: {}",
                    kind, self.meta.connection_id, e
                );
            }
        }
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<()> {
        let peer = &self.meta.peer;
        peer.set_remote_description(offer).await?;
        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        let description = peer.local_description().await.unwrap_or(answer);
        self.signaling
            .send(&SignalingMessage::Description(description))
            .await?;

        self.settle();
        debug!("Answered offer on {}", self.meta.connection_id);
        Ok(())
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<()> {
        let flags = &self.meta.flags;
        flags.set_remote_answer_pending(true);
        let result = self.meta.peer.set_remote_description(answer).await;
        flags.set_remote_answer_pending(false);
        result?;

        self.settle();
        debug!("Applied answer on {}", self.meta.connection_id);
        Ok(())
    }

    fn settle(&self) {
        let mut state = self.state.lock();
        if *state != NegotiationState::Closed {
            *state = NegotiationState::Stable;
        }
    }

    /// Send a freshly gathered local candidate, unbatched
    pub async fn on_ice_candidate(&self, candidate: IceCandidate) {
        if self.state() == NegotiationState::Closed {
            return;
        }
        if let Err(e) = self
            .signaling
            .send(&SignalingMessage::Candidate(candidate))
            .await
        {
            warn!(
                "Failed to send local candidate for {}: {}",
                self.meta.connection_id, e
            );
        }
    }

    /// Enter the terminal state and drop parked candidates
    pub fn close(&self) {
        *self.state.lock() = NegotiationState::Closed;
        self.candidates.cancel();
    }
}
