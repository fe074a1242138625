//! webrtc-rs implementation of the transport ports.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::candidate::CandidatePairState;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::IceServerConfig;
use crate::error::{Error, Result};
use crate::media::LocalTrack;
use crate::transport::{
    IceCandidate, RemoteTrackInfo, SdpKind, SessionDescription, SessionTransport, StatsEntry,
    StatsReport, TransportEvent, TransportEventSink, TransportFactory, TransportState,
};

pub fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let description = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
        SdpKind::Rollback => {
            return Err(Error::Transport("rollback descriptions are not supported".to_string()))
        }
    };
    Ok(description)
}

pub fn from_rtc_description(description: &RTCSessionDescription) -> Result<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(Error::Transport("unspecified description type".to_string()))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp.clone(),
    })
}

pub fn to_transport_state(state: RTCPeerConnectionState) -> TransportState {
    match state {
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
        _ => TransportState::New,
    }
}

fn to_ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Keeps the candidate pair and RTP stream entries, by direction.
fn to_stats_entry(stats: StatsReportType) -> Option<StatsEntry> {
    match stats {
        StatsReportType::CandidatePair(pair) => Some(StatsEntry::CandidatePair {
            selected: pair.nominated,
            succeeded: pair.state == CandidatePairState::Succeeded,
            current_round_trip_time: Some(pair.current_round_trip_time),
            round_trip_time: None,
        }),
        // webrtc-rs does not count receive-side loss.
        StatsReportType::InboundRTP(inbound) => Some(StatsEntry::InboundRtp {
            kind: inbound.kind.to_string(),
            packets_received: inbound.packets_received,
            packets_lost: 0,
        }),
        StatsReportType::OutboundRTP(outbound) => Some(StatsEntry::OutboundRtp {
            kind: outbound.kind.to_string(),
            packets_sent: outbound.packets_sent,
        }),
        StatsReportType::RemoteInboundRTP(remote) => Some(StatsEntry::RemoteInboundRtp {
            kind: remote.kind.to_string(),
            packets_lost: remote.packets_lost,
            round_trip_time: remote.round_trip_time,
        }),
        _ => None,
    }
}

/// Builds one `RTCPeerConnection` per remote peer from a shared API object.
pub struct RtcTransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: &[IceServerConfig]) -> Result<Self> {
        // Create a MediaEngine object to configure the supported codec
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: to_ice_servers(ice_servers),
        })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(&self, events: TransportEventSink) -> Result<Arc<dyn SessionTransport>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);
        let remote_id = events.remote_id().to_string();

        let sink = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                // None marks the end of gathering.
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => {
                            sink.emit(TransportEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => debug!("Dropping unserializable local candidate: {}", e),
                    }
                }
            })
        }));

        let sink = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.emit(TransportEvent::RemoteTrack(RemoteTrackInfo {
                        track_id: track.id(),
                        stream_id: track.stream_id(),
                        kind: track.kind().to_string(),
                    }));
                })
            },
        ));

        let sink = events;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    debug!("Peer {} connection state has changed: {}", sink.remote_id(), s);
                    sink.emit(TransportEvent::StateChanged(to_transport_state(s)));
                })
            },
        ));

        info!("Created RTCPeerConnection for {}", remote_id);
        Ok(Arc::new(RtcTransport { peer_connection }))
    }
}

pub struct RtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
}

#[async_trait]
impl SessionTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.peer_connection.create_answer(None).await?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_local_description(description)
            .await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.peer_connection
            .set_remote_description(description)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.peer_connection
            .add_track(track.sample_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        Ok(())
    }

    async fn get_stats(&self) -> Result<StatsReport> {
        let report = self.peer_connection.get_stats().await;
        let entries = report
            .reports
            .into_values()
            .filter_map(to_stats_entry)
            .collect();
        Ok(StatsReport { entries })
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
