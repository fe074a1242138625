use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webrtc_mesh::audio::MicrophoneSource;
use webrtc_mesh::rtc::RtcTransportFactory;
use webrtc_mesh::signaling::SignalingClient;
use webrtc_mesh::{ClientConfig, PeerSessionManager, SessionEvent};

#[derive(Debug, Parser)]
#[command(name = "webrtc-mesh", about = "Join a WebRTC mesh room through a signaling relay")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "WEBRTC_MESH_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling relay URL (ws:// or wss://)
    #[arg(long, env = "WEBRTC_MESH_URL")]
    url: Option<String>,

    #[arg(short, long, env = "WEBRTC_MESH_ROOM")]
    room: Option<String>,

    #[arg(long, env = "WEBRTC_MESH_PEER_ID")]
    peer_id: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(url) = self.url {
            config.signaling_url = url;
        }
        if let Some(room) = self.room {
            config.room = room;
        }
        if let Some(peer_id) = self.peer_id {
            config.peer_id = Some(peer_id);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Args::parse().into_config()?;
    // Pin the generated id so the log and the roster agree.
    config.peer_id = Some(config.local_peer_id());

    let factory = Arc::new(RtcTransportFactory::new(&config.ice_servers)?);
    let client = SignalingClient::connect(&config.signaling_url, config.signaling_buffer)
        .await
        .with_context(|| format!("connecting to {}", config.signaling_url))?;
    let (sender, inbound) = client.into_parts();

    let mut manager =
        PeerSessionManager::new(&config, factory, Box::new(MicrophoneSource::new()), sender);

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged { remote_id, state } => {
                    info!("{} is now {}", remote_id, state)
                }
                SessionEvent::RemoteTrack { remote_id, track } => {
                    info!("Receiving {} from {}", track.kind, remote_id)
                }
                SessionEvent::Removed { remote_id } => info!("{} removed", remote_id),
            }
        }
    });

    manager
        .join(&config.room_name())
        .await
        .context("joining room")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    manager.run(inbound, shutdown).await?;
    Ok(())
}
