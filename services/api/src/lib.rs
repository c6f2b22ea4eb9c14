//! StockVoice API Library Crate
//!
//! This library contains the logic for the voice inventory service: the
//! application state, configuration, audio format checks, the WebSocket voice
//! pipeline, and routing. The `api` binary is a thin wrapper around it.

pub mod audio;
pub mod config;
pub mod router;
pub mod state;
pub mod ws;
