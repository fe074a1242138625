//! Deterministic in-memory transport, factory and media source.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use webrtc_mesh::error::{Error, Result};
use webrtc_mesh::media::{LocalTrack, MediaSource};
use webrtc_mesh::signaling::{OutboundMessage, SignalingSender};
use webrtc_mesh::transport::{
    IceCandidate, SessionDescription, SessionTransport, StatsReport, TransportEvent,
    TransportEventSink, TransportFactory, TransportState,
};
use webrtc_mesh::{ClientConfig, PeerSessionManager};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    AddTrack(String),
    GetStats,
    Close,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub calls: Vec<Call>,
    pub fail_set_remote: bool,
    pub fail_create_offer: bool,
    pub fail_stats: bool,
    pub stats: StatsReport,
}

pub struct FakeTransport {
    label: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new(label: &str) -> (Arc<Self>, Arc<Mutex<FakeState>>) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        (
            Arc::new(Self {
                label: label.to_string(),
                state: Arc::clone(&state),
            }),
            state,
        )
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateOffer);
        if self.state.lock().unwrap().fail_create_offer {
            return Err(Error::Transport("offer generation failed".to_string()));
        }
        Ok(SessionDescription::offer(format!("offer-from-{}", self.label)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-from-{}", self.label)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record(Call::SetLocal(description));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(Call::SetRemote(description));
        if self.state.lock().unwrap().fail_set_remote {
            return Err(Error::Transport("malformed sdp".to_string()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Call::AddCandidate(candidate));
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(Call::AddTrack(track.id().to_string()));
        Ok(())
    }

    async fn get_stats(&self) -> Result<StatsReport> {
        self.record(Call::GetStats);
        let state = self.state.lock().unwrap();
        if state.fail_stats {
            return Err(Error::Transport("stats unavailable".to_string()));
        }
        Ok(state.stats.clone())
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}

pub struct Created {
    pub sink: TransportEventSink,
    pub state: Arc<Mutex<FakeState>>,
}

/// Records every transport it hands out, newest last per remote id.
#[derive(Default)]
pub struct FakeFactory {
    pub created: Mutex<HashMap<String, Vec<Created>>>,
    pub fail_set_remote: Mutex<Vec<String>>,
}

impl FakeFactory {
    pub fn calls(&self, remote_id: &str) -> Vec<Call> {
        self.latest_state(remote_id)
            .map(|s| s.lock().unwrap().calls.clone())
            .unwrap_or_default()
    }

    pub fn latest_state(&self, remote_id: &str) -> Option<Arc<Mutex<FakeState>>> {
        let created = self.created.lock().unwrap();
        created
            .get(remote_id)
            .and_then(|v| v.last())
            .map(|c| Arc::clone(&c.state))
    }

    pub fn sink(&self, remote_id: &str) -> TransportEventSink {
        let created = self.created.lock().unwrap();
        created[remote_id].last().unwrap().sink.clone()
    }

    pub fn created_count(&self, remote_id: &str) -> usize {
        let created = self.created.lock().unwrap();
        created.get(remote_id).map(Vec::len).unwrap_or(0)
    }

    /// Simulates the transport reporting a connection state change.
    pub fn report(&self, remote_id: &str, state: TransportState) {
        self.sink(remote_id).emit(TransportEvent::StateChanged(state));
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self, events: TransportEventSink) -> Result<Arc<dyn SessionTransport>> {
        let (transport, state) = FakeTransport::new(events.remote_id());
        if self
            .fail_set_remote
            .lock()
            .unwrap()
            .iter()
            .any(|id| id == events.remote_id())
        {
            state.lock().unwrap().fail_set_remote = true;
        }
        self.created
            .lock()
            .unwrap()
            .entry(events.remote_id().to_string())
            .or_default()
            .push(Created {
                sink: events,
                state,
            });
        Ok(transport)
    }
}

#[derive(Debug, Default)]
pub struct MediaLog {
    pub acquired: usize,
    pub released: usize,
}

pub struct FakeMedia {
    pub deny: bool,
    pub track_ids: Vec<String>,
    pub log: Arc<Mutex<MediaLog>>,
}

impl FakeMedia {
    pub fn new(track_ids: &[&str]) -> (Self, Arc<Mutex<MediaLog>>) {
        let log = Arc::new(Mutex::new(MediaLog::default()));
        (
            Self {
                deny: false,
                track_ids: track_ids.iter().map(|s| s.to_string()).collect(),
                log: Arc::clone(&log),
            },
            log,
        )
    }

    pub fn denied() -> (Self, Arc<Mutex<MediaLog>>) {
        let (mut media, log) = Self::new(&[]);
        media.deny = true;
        (media, log)
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&mut self) -> Result<Vec<LocalTrack>> {
        if self.deny {
            return Err(Error::MediaAcquisitionDenied("permission denied".to_string()));
        }
        self.log.lock().unwrap().acquired += 1;
        Ok(self
            .track_ids
            .iter()
            .map(|id| LocalTrack::pcmu_audio(id.clone()))
            .collect())
    }

    async fn release(&mut self) {
        self.log.lock().unwrap().released += 1;
    }
}

pub fn config(peer_id: &str) -> ClientConfig {
    ClientConfig {
        peer_id: Some(peer_id.to_string()),
        ..ClientConfig::default()
    }
}

pub struct Harness {
    pub manager: PeerSessionManager,
    pub factory: Arc<FakeFactory>,
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub media: Arc<Mutex<MediaLog>>,
}

impl Harness {
    pub fn new(peer_id: &str) -> Self {
        let (media, log) = FakeMedia::new(&["mic", "cam"]);
        Self::with_media(peer_id, media, log)
    }

    pub fn with_media(peer_id: &str, media: FakeMedia, log: Arc<Mutex<MediaLog>>) -> Self {
        let factory = Arc::new(FakeFactory::default());
        let (tx, outbound) = mpsc::channel(256);
        let manager = PeerSessionManager::new(
            &config(peer_id),
            factory.clone(),
            Box::new(media),
            SignalingSender::new(tx),
        );
        Self {
            manager,
            factory,
            outbound,
            media: log,
        }
    }

    pub async fn joined(peer_id: &str, room: &str) -> Self {
        let mut harness = Self::new(peer_id);
        harness.manager.join(room).await.unwrap();
        assert_eq!(
            harness.take_outbound(),
            vec![OutboundMessage::Join {
                room: room.to_string()
            }]
        );
        harness
    }

    pub fn take_outbound(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host", n, n),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

pub fn applied_candidates(calls: &[Call]) -> Vec<IceCandidate> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::AddCandidate(c) => Some(c.clone()),
            _ => None,
        })
        .collect()
}
