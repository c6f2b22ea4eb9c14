//! WebSocket Voice Sessions
//!
//! This module contains the real-time voice pipeline. It is structured into
//! submodules:
//!
//! - `protocol`: The JSON message format between the browser and the server.
//! - `session`: The per-connection actor and the WebSocket handler.
//! - `provider`: Streaming speech-to-text links (Deepgram).
//! - `bridge`: Validates client audio and owns the session's upstream link.
//! - `link`: Reconnect state machine and keepalive heartbeat for the link.
//! - `turn`: Folds transcripts into complete utterances.
//! - `cycle`: Runs an utterance through the agent.
//! - `registry`: Tracks live sessions.

mod bridge;
mod cycle;
pub mod link;
pub mod protocol;
pub mod provider;
pub mod registry;
pub mod session;
pub mod turn;

pub use registry::SessionRegistry;
pub use session::{Session, SessionEvent, SessionSettings, ws_handler};
