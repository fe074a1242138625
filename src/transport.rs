//! Session transport ports.
//!
//! The native real-time session object (ICE, DTLS, SRTP, codecs) is driven
//! through [`SessionTransport`]; one instance exists per remote peer and is
//! created by a [`TransportFactory`]. Asynchronous notifications from the
//! transport flow back through a [`TransportEventSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::media::LocalTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Offer/answer payload in the browser's `{type, sdp}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionSide {
    Local,
    Remote,
}

impl fmt::Display for DescriptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptionSide::Local => write!(f, "local"),
            DescriptionSide::Remote => write!(f, "remote"),
        }
    }
}

/// Connectivity candidate, serialized with the browser's field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Aggregate connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// `failed` and `closed` are never recovered from at this layer.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub stream_id: String,
    pub kind: String,
}

/// One entry of a transport statistics report.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEntry {
    CandidatePair {
        /// Nominated/selected by the ICE agent.
        selected: bool,
        succeeded: bool,
        /// Seconds.
        current_round_trip_time: Option<f64>,
        /// Seconds.
        round_trip_time: Option<f64>,
    },
    /// Media we receive from the peer.
    InboundRtp {
        kind: String,
        packets_received: u64,
        /// Zero when the transport does not track receive-side loss.
        packets_lost: i64,
    },
    /// Media we send to the peer.
    OutboundRtp { kind: String, packets_sent: u64 },
    /// The peer's receiver report about media we send.
    RemoteInboundRtp {
        kind: String,
        packets_lost: i64,
        /// Seconds.
        round_trip_time: Option<f64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub entries: Vec<StatsEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local candidate was gathered and must be sent to the remote side.
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrackInfo),
    StateChanged(TransportState),
}

/// A transport event tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerTransportEvent {
    pub remote_id: String,
    pub connection_id: String,
    pub event: TransportEvent,
}

/// Handed to each transport at creation; tags and forwards its callbacks.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    remote_id: String,
    connection_id: String,
    tx: mpsc::UnboundedSender<PeerTransportEvent>,
}

impl TransportEventSink {
    pub fn new(
        remote_id: impl Into<String>,
        connection_id: impl Into<String>,
        tx: mpsc::UnboundedSender<PeerTransportEvent>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            connection_id: connection_id.into(),
            tx,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Returns false once the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(PeerTransportEvent {
                remote_id: self.remote_id.clone(),
                connection_id: self.connection_id.clone(),
                event,
            })
            .is_ok()
    }
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;
    async fn get_stats(&self) -> Result<StatsReport>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, events: TransportEventSink) -> Result<Arc<dyn SessionTransport>>;
}
