use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::transport::{IceCandidate, SessionDescription};

/// Events delivered by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum InboundMessage {
    ExistingPeers {
        peers: Vec<String>,
    },
    NewPeer {
        peer: String,
    },
    Offer {
        from: String,
        #[serde(rename = "sdp", alias = "description")]
        description: SessionDescription,
    },
    Answer {
        from: String,
        #[serde(rename = "sdp", alias = "description")]
        description: SessionDescription,
    },
    IceCandidate {
        from: String,
        candidate: IceCandidate,
    },
    PeerLeft {
        #[serde(alias = "id")]
        sid: String,
    },
}

impl InboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            InboundMessage::ExistingPeers { .. } => "existing-peers",
            InboundMessage::NewPeer { .. } => "new-peer",
            InboundMessage::Offer { .. } => "offer",
            InboundMessage::Answer { .. } => "answer",
            InboundMessage::IceCandidate { .. } => "ice-candidate",
            InboundMessage::PeerLeft { .. } => "peer-left",
        }
    }
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Join {
        room: String,
    },
    Leave {
        room: String,
    },
    Offer {
        to: String,
        #[serde(rename = "sdp", alias = "description")]
        description: SessionDescription,
    },
    Answer {
        to: String,
        #[serde(rename = "sdp", alias = "description")]
        description: SessionDescription,
    },
    IceCandidate {
        to: String,
        candidate: IceCandidate,
    },
}

/// Decodes one relay frame. `Ok(None)` for events this client does not handle.
pub fn decode_inbound(text: &str) -> Result<Option<InboundMessage>> {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            let value: serde_json::Value = serde_json::from_str(text)?;
            match value.get("event").and_then(|v| v.as_str()) {
                Some(event) if !is_known_event(event) => {
                    debug!("Skipping unhandled signaling event: {}", event);
                    Ok(None)
                }
                _ => Err(Error::Signaling(format!("malformed message: {}", e))),
            }
        }
    }
}

fn is_known_event(event: &str) -> bool {
    matches!(
        event,
        "existing-peers" | "new-peer" | "offer" | "answer" | "ice-candidate" | "peer-left"
    )
}

/// Outbound half of the signaling channel.
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl SignalingSender {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, msg: OutboundMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| Error::Signaling(format!("Failed to send message: {}", e)))
    }
}

/// WebSocket connection to the relay.
pub struct SignalingClient {
    tx: mpsc::Sender<OutboundMessage>,
    rx: mpsc::Receiver<InboundMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str, buffer: usize) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to signaling relay at {}", url);
        let (mut write, mut read) = ws_stream.split();

        let (tx, rx) = mpsc::channel(buffer);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<OutboundMessage>(buffer);

        // Handle outgoing messages
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode signaling message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    error!("Signaling write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming messages
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        error!("Signaling read failed: {}", e);
                        break;
                    }
                };
                match decode_inbound(&text) {
                    Ok(Some(msg)) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                }
            }
            info!("Signaling relay connection closed");
        });

        Ok(Self {
            tx: outgoing_tx,
            rx,
        })
    }

    pub fn into_parts(self) -> (SignalingSender, mpsc::Receiver<InboundMessage>) {
        (SignalingSender::new(self.tx), self.rx)
    }
}
