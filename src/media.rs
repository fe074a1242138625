use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::media_engine::MIME_TYPE_PCMU;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::Result;

pub const DEFAULT_STREAM_ID: &str = "webrtc-mesh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// A locally captured track that can be attached to any number of sessions.
#[derive(Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    sample_track: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, sample_track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: id.into(),
            kind,
            sample_track,
        }
    }

    /// Mono 8 kHz PCMU track.
    pub fn pcmu_audio(id: impl Into<String>) -> Self {
        let id = id.into();
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: 8000,
                channels: 1,
                ..Default::default()
            },
            id.clone(),
            DEFAULT_STREAM_ID.to_owned(),
        ));
        Self::new(id, TrackKind::Audio, sample_track)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.sample_track)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Local capture capability.
#[async_trait]
pub trait MediaSource: Send {
    /// Starts capture. Fails with `Error::MediaAcquisitionDenied` when the
    /// device is missing or access is refused.
    async fn acquire(&mut self) -> Result<Vec<LocalTrack>>;

    /// Stops capture and frees the device.
    async fn release(&mut self);
}

/// The single shared local media resource: acquired lazily on first need,
/// shared by every open session, released only on leave.
pub struct LocalMedia {
    source: Box<dyn MediaSource>,
    tracks: Option<Vec<LocalTrack>>,
}

impl LocalMedia {
    pub fn new(source: Box<dyn MediaSource>) -> Self {
        Self {
            source,
            tracks: None,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.tracks.is_some()
    }

    /// Tracks if acquired, empty otherwise.
    pub fn tracks(&self) -> &[LocalTrack] {
        self.tracks.as_deref().unwrap_or(&[])
    }

    pub async fn ensure(&mut self) -> Result<&[LocalTrack]> {
        if self.tracks.is_none() {
            let tracks = self.source.acquire().await?;
            info!("Local media acquired: {} track(s)", tracks.len());
            self.tracks = Some(tracks);
        }
        Ok(self.tracks())
    }

    pub async fn release(&mut self) {
        if self.tracks.take().is_some() {
            self.source.release().await;
            info!("Local media released");
        } else {
            debug!("Local media release requested but nothing was acquired");
        }
    }
}
