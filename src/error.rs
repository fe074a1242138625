use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

use crate::transport::{DescriptionSide, TransportState};

#[derive(Debug, Error)]
pub enum Error {
    /// Local capture is unavailable or was refused. Aborts a join.
    #[error("media acquisition denied: {0}")]
    MediaAcquisitionDenied(String),

    #[error("stale {kind} from {remote_id}: no live session")]
    StaleSignaling {
        remote_id: String,
        kind: &'static str,
    },

    #[error("failed to apply {side} description for {remote_id}: {reason}")]
    DescriptionApply {
        remote_id: String,
        side: DescriptionSide,
        reason: String,
    },

    #[error("transport for {remote_id} reported {state}")]
    TransportFailure {
        remote_id: String,
        state: TransportState,
    },

    #[error("{event} not allowed for {remote_id} in state {state}")]
    InvalidTransition {
        remote_id: String,
        event: &'static str,
        state: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True for errors that stay inside the session/manager boundary.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::StaleSignaling { .. }
                | Error::DescriptionApply { .. }
                | Error::TransportFailure { .. }
                | Error::InvalidTransition { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
