//! Peer-session negotiation and lifecycle management for a WebRTC mesh room.
//!
//! Every participant negotiates a direct session with every other participant
//! through a relayed signaling channel. [`PeerSessionManager`] owns one
//! [`PeerSession`] per remote participant, decides who initiates, buffers
//! early connectivity candidates and tears sessions down when peers leave.

pub mod audio;
pub mod config;
pub mod error;
pub mod manager;
pub mod media;
pub mod metrics;
pub mod room;
pub mod rtc;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use manager::{PeerSessionManager, SessionEvent};
pub use session::{PeerSession, Role, SessionState};
