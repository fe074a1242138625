//! Per-peer negotiation and connectivity state machine.
//!
//! ```text
//! Idle ──offer sent──▶ NegotiatingOffer ──answer applied──▶ Connected
//! Idle ──offer applied─▶ NegotiatingAnswer ──transport up──▶ Connected
//! Connected ◀──▶ Disconnected
//! any ──▶ Closed
//! ```

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::media::LocalTrack;
use crate::transport::{
    DescriptionSide, IceCandidate, SessionDescription, SessionTransport, TransportState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "Initiator"),
            Role::Responder => write!(f, "Responder"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    NegotiatingOffer,
    NegotiatingAnswer,
    Connected,
    Disconnected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::NegotiatingOffer => write!(f, "NegotiatingOffer"),
            SessionState::NegotiatingAnswer => write!(f, "NegotiatingAnswer"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// What happened to an inbound candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Queued,
    Applied,
    Discarded,
}

/// Effect of a transport connection-state report on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    Unchanged,
    Connected,
    Disconnected,
    Recovered,
    /// The session must be torn down.
    Terminal,
}

pub struct PeerSession {
    remote_id: String,
    connection_id: String,
    role: Role,
    state: SessionState,
    has_remote_description: bool,
    pending_candidates: VecDeque<IceCandidate>,
    local_tracks_attached: HashSet<String>,
    connected_at: Option<Instant>,
    transport: Arc<dyn SessionTransport>,
}

impl PeerSession {
    pub fn new(
        remote_id: impl Into<String>,
        connection_id: impl Into<String>,
        role: Role,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        let remote_id = remote_id.into();
        let connection_id = connection_id.into();
        info!(
            "Creating peer session: remote_id={}, role={}, connection_id={}",
            remote_id, role, connection_id
        );
        Self {
            remote_id,
            connection_id,
            role,
            state: SessionState::Idle,
            has_remote_description: false,
            pending_candidates: VecDeque::new(),
            local_tracks_attached: HashSet::new(),
            connected_at: None,
            transport,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn is_track_attached(&self, track_id: &str) -> bool {
        self.local_tracks_attached.contains(track_id)
    }

    pub fn connection_duration(&self) -> Option<Duration> {
        self.connected_at.map(|at| at.elapsed())
    }

    pub fn transport(&self) -> Arc<dyn SessionTransport> {
        Arc::clone(&self.transport)
    }

    fn set_state(&mut self, new_state: SessionState) {
        if self.state != new_state {
            debug!(
                "Peer {} state transition: {} -> {}",
                self.remote_id, self.state, new_state
            );
            self.state = new_state;
            if new_state == SessionState::Connected && self.connected_at.is_none() {
                self.connected_at = Some(Instant::now());
            }
        }
    }

    fn invalid(&self, event: &'static str) -> Error {
        Error::InvalidTransition {
            remote_id: self.remote_id.clone(),
            event,
            state: self.state.to_string(),
        }
    }

    fn apply_error(&self, side: DescriptionSide, err: Error) -> Error {
        warn!(
            "Failed to apply {} description for peer {}: {}",
            side, self.remote_id, err
        );
        Error::DescriptionApply {
            remote_id: self.remote_id.clone(),
            side,
            reason: err.to_string(),
        }
    }

    /// Adds every track not yet on this transport. Returns how many were added.
    pub async fn attach_tracks(&mut self, tracks: &[LocalTrack]) -> usize {
        if self.state == SessionState::Closed {
            return 0;
        }
        let mut attached = 0;
        for track in tracks {
            if self.local_tracks_attached.contains(track.id()) {
                continue;
            }
            match self.transport.add_track(track).await {
                Ok(()) => {
                    self.local_tracks_attached.insert(track.id().to_string());
                    attached += 1;
                }
                Err(e) => warn!(
                    "Failed to attach track {} to peer {}: {}",
                    track.id(),
                    self.remote_id,
                    e
                ),
            }
        }
        if attached > 0 {
            debug!("Attached {} local track(s) to peer {}", attached, self.remote_id);
        }
        attached
    }

    /// Idle → NegotiatingOffer. Returns the offer to send.
    pub async fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.role != Role::Initiator || self.state != SessionState::Idle {
            return Err(self.invalid("create-offer"));
        }
        let offer = match self.transport.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.apply_error(DescriptionSide::Local, e)),
        };
        if let Err(e) = self.transport.set_local_description(offer.clone()).await {
            return Err(self.apply_error(DescriptionSide::Local, e));
        }
        self.set_state(SessionState::NegotiatingOffer);
        Ok(offer)
    }

    /// Applies a remote offer, drains buffered candidates and produces the
    /// answer to send. Moves Idle → NegotiatingAnswer; a renegotiation offer
    /// keeps the current state.
    pub async fn accept_offer(&mut self, offer: SessionDescription) -> Result<SessionDescription> {
        let allowed = match self.state {
            SessionState::Idle | SessionState::NegotiatingAnswer => self.role == Role::Responder,
            SessionState::Connected | SessionState::Disconnected => true,
            SessionState::NegotiatingOffer | SessionState::Closed => false,
        };
        if !allowed {
            return Err(self.invalid("offer"));
        }

        if let Err(e) = self.transport.set_remote_description(offer).await {
            return Err(self.apply_error(DescriptionSide::Remote, e));
        }
        self.has_remote_description = true;
        if self.state == SessionState::Idle {
            self.set_state(SessionState::NegotiatingAnswer);
        }
        self.drain_pending_candidates().await;

        let answer = match self.transport.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.apply_error(DescriptionSide::Local, e)),
        };
        if let Err(e) = self.transport.set_local_description(answer.clone()).await {
            return Err(self.apply_error(DescriptionSide::Local, e));
        }
        Ok(answer)
    }

    /// NegotiatingOffer → Connected.
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<()> {
        if self.role != Role::Initiator || self.state != SessionState::NegotiatingOffer {
            return Err(self.invalid("answer"));
        }
        if let Err(e) = self.transport.set_remote_description(answer).await {
            return Err(self.apply_error(DescriptionSide::Remote, e));
        }
        self.has_remote_description = true;
        self.drain_pending_candidates().await;
        self.set_state(SessionState::Connected);
        Ok(())
    }

    /// Queues the candidate until a remote description exists, applies it
    /// otherwise. Candidates for a closed session are dropped.
    pub async fn add_candidate(&mut self, candidate: IceCandidate) -> Result<CandidateDisposition> {
        if self.state == SessionState::Closed {
            debug!("Discarding candidate for closed peer {}", self.remote_id);
            return Ok(CandidateDisposition::Discarded);
        }
        if !self.has_remote_description {
            self.pending_candidates.push_back(candidate);
            debug!(
                "Remote description not set yet for peer {}, queued candidate ({} pending)",
                self.remote_id,
                self.pending_candidates.len()
            );
            return Ok(CandidateDisposition::Queued);
        }
        self.transport.add_ice_candidate(candidate).await?;
        Ok(CandidateDisposition::Applied)
    }

    async fn drain_pending_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if pending.is_empty() {
            return;
        }
        debug!(
            "Applying {} pending candidate(s) for peer {}",
            pending.len(),
            self.remote_id
        );
        for candidate in pending {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(
                    "Failed to apply pending candidate for peer {}: {}",
                    self.remote_id, e
                );
            }
        }
    }

    pub fn on_transport_state(&mut self, state: TransportState) -> TransportOutcome {
        if self.state == SessionState::Closed {
            return TransportOutcome::Unchanged;
        }
        if state.is_terminal() {
            return TransportOutcome::Terminal;
        }
        match (self.state, state) {
            (SessionState::NegotiatingAnswer, TransportState::Connected) => {
                self.set_state(SessionState::Connected);
                TransportOutcome::Connected
            }
            (SessionState::Disconnected, TransportState::Connected) => {
                self.set_state(SessionState::Connected);
                TransportOutcome::Recovered
            }
            (SessionState::Connected, TransportState::Disconnected) => {
                self.set_state(SessionState::Disconnected);
                TransportOutcome::Disconnected
            }
            _ => TransportOutcome::Unchanged,
        }
    }

    /// Moves to Closed, drops queued candidates and closes the transport.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        info!("Closing peer session for {}", self.remote_id);
        self.set_state(SessionState::Closed);
        self.pending_candidates.clear();
        if let Err(e) = self.transport.close().await {
            warn!("Transport close failed for peer {}: {}", self.remote_id, e);
        }
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote_id", &self.remote_id)
            .field("connection_id", &self.connection_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("local_tracks_attached", &self.local_tracks_attached)
            .finish()
    }
}
