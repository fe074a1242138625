//! Room-wide owner of every [`PeerSession`].
//!
//! Initiation rule: the side that was already in the room initiates toward a
//! newcomer (`new-peer` ⇒ Initiator); the newcomer waits for offers
//! (`existing-peers` ⇒ Responder). Direction is structural, so a pair never
//! produces two offers.
//!
//! All handlers take `&mut self` and run on one task; per-peer ordering is the
//! arrival order of the signaling stream.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::{normalize_room, ClientConfig};
use crate::error::{Error, Result};
use crate::media::{LocalMedia, MediaSource};
use crate::metrics::{ConnectionSample, StatsMonitor};
use crate::room::{ParticipantRegistry, Room};
use crate::session::{CandidateDisposition, PeerSession, Role, SessionState, TransportOutcome};
use crate::signaling::{InboundMessage, OutboundMessage, SignalingSender};
use crate::transport::{
    IceCandidate, PeerTransportEvent, RemoteTrackInfo, SessionDescription, TransportEvent,
    TransportEventSink, TransportFactory,
};

const EVENT_CAPACITY: usize = 64;

/// Observer notifications; derived from session state, never authoritative.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        remote_id: String,
        state: SessionState,
    },
    RemoteTrack {
        remote_id: String,
        track: RemoteTrackInfo,
    },
    Removed {
        remote_id: String,
    },
}

pub struct PeerSessionManager {
    local_id: String,
    local_label: String,
    room: Option<Room>,
    sessions: HashMap<String, PeerSession>,
    registry: ParticipantRegistry,
    stats: StatsMonitor,
    media: LocalMedia,
    factory: Arc<dyn TransportFactory>,
    signaling: SignalingSender,
    transport_tx: mpsc::UnboundedSender<PeerTransportEvent>,
    transport_rx: mpsc::UnboundedReceiver<PeerTransportEvent>,
    events: broadcast::Sender<SessionEvent>,
}

impl PeerSessionManager {
    pub fn new(
        config: &ClientConfig,
        factory: Arc<dyn TransportFactory>,
        media: Box<dyn MediaSource>,
        signaling: SignalingSender,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local_id: config.local_peer_id(),
            local_label: config.local_label(),
            room: None,
            sessions: HashMap::new(),
            registry: ParticipantRegistry::new(),
            stats: StatsMonitor::new(config.stats_interval()),
            media: LocalMedia::new(media),
            factory,
            signaling,
            transport_tx,
            transport_rx,
            events,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn is_joined(&self) -> bool {
        self.room.is_some()
    }

    pub fn session(&self, remote_id: &str) -> Option<&PeerSession> {
        self.sessions.get(remote_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatsMonitor {
        &self.stats
    }

    pub fn latest_sample(&self, remote_id: &str) -> Option<ConnectionSample> {
        self.stats.latest(remote_id)
    }

    pub fn has_local_media(&self) -> bool {
        self.media.is_acquired()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_state(&self, remote_id: &str, before: SessionState) {
        if let Some(session) = self.sessions.get(remote_id) {
            if session.state() != before {
                self.publish(SessionEvent::StateChanged {
                    remote_id: remote_id.to_string(),
                    state: session.state(),
                });
            }
        }
    }

    /// Acquires local media and announces the local participant to the room.
    /// Idempotent while joined. Only `MediaAcquisitionDenied` and signaling
    /// channel loss are returned to the caller.
    pub async fn join(&mut self, room: &str) -> Result<()> {
        let room = normalize_room(room);
        if let Some(current) = &self.room {
            if current.id() != room {
                warn!(
                    "Already joined {}; ignoring join for {}",
                    current.id(),
                    room
                );
            }
            return Ok(());
        }

        if let Err(e) = self.media.ensure().await {
            warn!("Cannot join {}: {}", room, e);
            return Err(e);
        }

        self.signaling
            .send(OutboundMessage::Join { room: room.clone() })
            .await?;
        self.registry.add(&self.local_id, &self.local_label, true);
        info!("Joined room {} as {}", room, self.local_id);
        self.room = Some(Room::new(room));
        Ok(())
    }

    /// Tears down every session, releases local media and announces departure.
    pub async fn leave(&mut self) -> Result<()> {
        let Some(room) = self.room.take() else {
            debug!("Leave requested while not in a room");
            return Ok(());
        };

        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.teardown(&id, "leave").await;
        }
        self.stats.stop_all();
        self.media.release().await;
        self.registry.clear();

        let result = self
            .signaling
            .send(OutboundMessage::Leave {
                room: room.id().to_string(),
            })
            .await;
        info!("Left room {}", room.id());
        result
    }

    /// Routes one relay event. Local errors are logged and absorbed.
    pub async fn handle_signal(&mut self, msg: InboundMessage) {
        let name = msg.name();
        let result = match msg {
            InboundMessage::ExistingPeers { peers } => self.on_existing_peers(peers).await,
            InboundMessage::NewPeer { peer } => self.on_peer_joined(&peer).await,
            InboundMessage::Offer { from, description } => self.on_offer(&from, description).await,
            InboundMessage::Answer { from, description } => {
                self.on_answer(&from, description).await
            }
            InboundMessage::IceCandidate { from, candidate } => {
                self.on_ice_candidate(&from, candidate).await
            }
            InboundMessage::PeerLeft { sid } => {
                self.on_peer_left(&sid).await;
                Ok(())
            }
        };
        if let Err(e) = result {
            match e {
                Error::StaleSignaling { .. } => debug!("Discarded {}: {}", name, e),
                e if e.is_local() => warn!("{} not applied: {}", name, e),
                e => warn!("Failed to handle {}: {}", name, e),
            }
        }
    }

    fn require_room(&self, remote_id: &str, kind: &'static str) -> Result<()> {
        if self.room.is_none() {
            return Err(Error::StaleSignaling {
                remote_id: remote_id.to_string(),
                kind,
            });
        }
        Ok(())
    }

    /// Creates the session for `remote_id` if absent. Returns true when created.
    async fn ensure_session(&mut self, remote_id: &str, role: Role) -> Result<bool> {
        if self.sessions.contains_key(remote_id) {
            return Ok(false);
        }
        let connection_id = uuid::Uuid::new_v4().to_string();
        let sink = TransportEventSink::new(remote_id, &connection_id, self.transport_tx.clone());
        let transport = self.factory.create(sink).await?;

        let mut session = PeerSession::new(remote_id, connection_id, role, transport);
        session.attach_tracks(self.media.tracks()).await;
        self.sessions.insert(remote_id.to_string(), session);

        if let Some(room) = self.room.as_mut() {
            room.add_peer(remote_id);
        }
        self.registry
            .add(remote_id, &format!("Peer: {}", remote_id), false);
        self.publish(SessionEvent::StateChanged {
            remote_id: remote_id.to_string(),
            state: SessionState::Idle,
        });
        Ok(true)
    }

    /// Newcomer side: every peer already present gets a Responder session.
    pub async fn on_existing_peers(&mut self, peers: Vec<String>) -> Result<()> {
        self.require_room("*", "existing-peers")?;
        info!("Existing peers: {:?}", peers);
        for peer in peers {
            if peer == self.local_id {
                continue;
            }
            if let Err(e) = self.ensure_session(&peer, Role::Responder).await {
                warn!("Could not create session for {}: {}", peer, e);
            }
        }
        Ok(())
    }

    /// Already-present side: create an Initiator session and send the offer.
    pub async fn on_peer_joined(&mut self, remote_id: &str) -> Result<()> {
        self.require_room(remote_id, "new-peer")?;
        if remote_id == self.local_id {
            return Ok(());
        }
        if !self.ensure_session(remote_id, Role::Initiator).await? {
            debug!("Session for {} already exists; no new offer", remote_id);
            return Ok(());
        }

        let session = self
            .sessions
            .get_mut(remote_id)
            .ok_or_else(|| Error::Transport(format!("session for {} vanished", remote_id)))?;
        let before = session.state();
        let offer = session.create_offer().await;
        self.publish_state(remote_id, before);

        self.signaling
            .send(OutboundMessage::Offer {
                to: remote_id.to_string(),
                description: offer?,
            })
            .await?;
        info!("Offer sent to {}", remote_id);
        Ok(())
    }

    pub async fn on_offer(&mut self, from: &str, description: SessionDescription) -> Result<()> {
        self.require_room(from, "offer")?;
        info!("Offer received from {}", from);
        self.ensure_session(from, Role::Responder).await?;

        // Lazily acquired if it was not already.
        let tracks = self.media.ensure().await?.to_vec();

        let session = self
            .sessions
            .get_mut(from)
            .ok_or_else(|| Error::Transport(format!("session for {} vanished", from)))?;
        session.attach_tracks(&tracks).await;

        let before = session.state();
        let answer = session.accept_offer(description).await;
        self.publish_state(from, before);

        self.signaling
            .send(OutboundMessage::Answer {
                to: from.to_string(),
                description: answer?,
            })
            .await?;
        info!("Answer sent to {}", from);
        Ok(())
    }

    /// Applies to a live Initiator session only; anything else is stale.
    pub async fn on_answer(&mut self, from: &str, description: SessionDescription) -> Result<()> {
        let Some(session) = self.sessions.get_mut(from) else {
            return Err(Error::StaleSignaling {
                remote_id: from.to_string(),
                kind: "answer",
            });
        };
        info!("Answer received from {}", from);
        let before = session.state();
        let result = session.accept_answer(description).await;
        self.publish_state(from, before);
        result?;

        self.start_stats(from);
        Ok(())
    }

    pub async fn on_ice_candidate(&mut self, from: &str, candidate: IceCandidate) -> Result<()> {
        let Some(session) = self.sessions.get_mut(from) else {
            return Err(Error::StaleSignaling {
                remote_id: from.to_string(),
                kind: "ice-candidate",
            });
        };
        match session.add_candidate(candidate).await {
            Ok(CandidateDisposition::Applied) => debug!("Applied candidate from {}", from),
            Ok(CandidateDisposition::Queued) => {}
            Ok(CandidateDisposition::Discarded) => debug!("Discarded candidate from {}", from),
            Err(e) => warn!("Failed to add candidate from {}: {}", from, e),
        }
        Ok(())
    }

    pub async fn on_peer_left(&mut self, remote_id: &str) {
        info!("Peer left: {}", remote_id);
        if !self.teardown(remote_id, "peer-left").await {
            // Known to presence only.
            self.registry.remove(remote_id);
            if let Some(room) = self.room.as_mut() {
                room.remove_peer(remote_id);
            }
        }
    }

    /// Applies one transport notification. Events from a session that has
    /// since been replaced or removed are dropped.
    pub async fn handle_transport_event(&mut self, event: PeerTransportEvent) {
        let PeerTransportEvent {
            remote_id,
            connection_id,
            event,
        } = event;
        let Some(session) = self.sessions.get_mut(&remote_id) else {
            debug!("Dropping transport event for unknown peer {}", remote_id);
            return;
        };
        if session.connection_id() != connection_id {
            debug!("Dropping transport event from a previous session with {}", remote_id);
            return;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if session.state() == SessionState::Closed {
                    return;
                }
                if let Err(e) = self
                    .signaling
                    .send(OutboundMessage::IceCandidate {
                        to: remote_id.clone(),
                        candidate,
                    })
                    .await
                {
                    warn!("Could not forward local candidate to {}: {}", remote_id, e);
                }
            }
            TransportEvent::RemoteTrack(track) => {
                info!("Remote {} track from {}", track.kind, remote_id);
                self.publish(SessionEvent::RemoteTrack { remote_id, track });
            }
            TransportEvent::StateChanged(state) => {
                debug!("Transport for {} reported {}", remote_id, state);
                let before = session.state();
                match session.on_transport_state(state) {
                    TransportOutcome::Connected | TransportOutcome::Recovered => {
                        self.publish_state(&remote_id, before);
                        self.start_stats(&remote_id);
                    }
                    TransportOutcome::Disconnected => self.publish_state(&remote_id, before),
                    TransportOutcome::Terminal => {
                        let failure = Error::TransportFailure {
                            remote_id: remote_id.clone(),
                            state,
                        };
                        warn!("{}; tearing down", failure);
                        self.teardown(&remote_id, "transport failure").await;
                    }
                    TransportOutcome::Unchanged => {}
                }
            }
        }
    }

    fn start_stats(&mut self, remote_id: &str) {
        if let Some(session) = self.sessions.get(remote_id) {
            if session.state() == SessionState::Connected {
                self.stats.start(remote_id, session.transport());
            }
        }
    }

    /// Removes the session, its queued candidates, its stats loop and its
    /// participant record. Returns false if there was no session.
    async fn teardown(&mut self, remote_id: &str, reason: &str) -> bool {
        let Some(mut session) = self.sessions.remove(remote_id) else {
            return false;
        };
        info!("Tearing down session with {} ({})", remote_id, reason);
        self.stats.stop(remote_id);
        let before = session.state();
        session.close().await;
        if before != SessionState::Closed {
            self.publish(SessionEvent::StateChanged {
                remote_id: remote_id.to_string(),
                state: SessionState::Closed,
            });
        }
        self.registry.remove(remote_id);
        if let Some(room) = self.room.as_mut() {
            room.remove_peer(remote_id);
        }
        self.publish(SessionEvent::Removed {
            remote_id: remote_id.to_string(),
        });
        true
    }

    /// Next pending transport event, if one is already queued.
    pub fn try_next_transport_event(&mut self) -> Option<PeerTransportEvent> {
        self.transport_rx.try_recv().ok()
    }

    /// Processes every transport event already queued.
    pub async fn drain_transport_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.try_next_transport_event() {
            self.handle_transport_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Event loop: relay messages and transport callbacks until the relay goes
    /// away or `shutdown` resolves, then leaves the room.
    pub async fn run<F>(&mut self, mut inbound: mpsc::Receiver<InboundMessage>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_signal(msg).await,
                    None => {
                        warn!("Signaling relay connection lost");
                        let ids: Vec<String> = self.sessions.keys().cloned().collect();
                        for id in ids {
                            self.teardown(&id, "relay lost").await;
                        }
                        break;
                    }
                },
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event).await;
                }
            }
        }

        match self.leave().await {
            Err(Error::Signaling(e)) => {
                debug!("Leave not delivered: {}", e);
                Ok(())
            }
            other => other,
        }
    }
}
