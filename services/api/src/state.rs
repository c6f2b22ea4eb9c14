//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared,
//! clonable resources every voice session needs.

use crate::{
    config::Config,
    ws::{SessionRegistry, SessionSettings, provider::SttConnector},
};
use std::sync::Arc;
use stockvoice_core::agent::AgentDispatcher;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub settings: SessionSettings,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<dyn AgentDispatcher>,
    pub stt: Arc<dyn SttConnector>,
}
