//! Client configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_ROOM: &str = "default";
pub const DEFAULT_LOCAL_LABEL: &str = "You";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket relay URL (ws:// or wss://)
    pub signaling_url: String,

    pub room: String,

    /// Local participant id; generated when absent.
    pub peer_id: Option<String>,

    pub display_label: Option<String>,

    pub ice_servers: Vec<IceServerConfig>,

    /// Connection-quality sampling period.
    pub stats_interval_ms: u64,

    /// Capacity of the signaling queues.
    pub signaling_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8080".to_string(),
            room: DEFAULT_ROOM.to_string(),
            peer_id: None,
            display_label: None,
            ice_servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig {
                    urls: vec!["turn:openrelay.metered.ca:443".to_string()],
                    username: Some("openrelayproject".to_string()),
                    credential: Some("openrelayproject".to_string()),
                },
            ],
            stats_interval_ms: 1000,
            signaling_buffer: 100,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "signaling_url must be ws:// or wss://, got {}",
                self.signaling_url
            )));
        }
        if self.stats_interval_ms == 0 {
            return Err(Error::Config("stats_interval_ms must be positive".to_string()));
        }
        if self.signaling_buffer == 0 {
            return Err(Error::Config("signaling_buffer must be positive".to_string()));
        }
        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(Error::Config("ICE server without urls".to_string()));
            }
            for url in &server.urls {
                if !["stun:", "turn:", "turns:"].iter().any(|p| url.starts_with(p)) {
                    return Err(Error::Config(format!("unsupported ICE server url: {}", url)));
                }
            }
        }
        Ok(())
    }

    /// Trimmed room name, falling back to the default for blank input.
    pub fn room_name(&self) -> String {
        normalize_room(&self.room)
    }

    pub fn local_peer_id(&self) -> String {
        self.peer_id
            .clone()
            .unwrap_or_else(|| format!("user-{}", rand::random::<u32>()))
    }

    pub fn local_label(&self) -> String {
        self.display_label
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_LABEL.to_string())
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

pub fn normalize_room(room: &str) -> String {
    let room = room.trim();
    if room.is_empty() {
        DEFAULT_ROOM.to_string()
    } else {
        room.to_string()
    }
}
