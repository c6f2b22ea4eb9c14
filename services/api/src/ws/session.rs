//! Manages the WebSocket connection lifecycle for a voice session.
//!
//! Each connection is served by one [`Session`] actor. The socket reader, the
//! upstream link pump, timers and agent dispatches all report into the same
//! ordered mailbox, and only the actor's loop touches session state.

use super::{
    bridge::{ForwardError, TranscriptionBridge},
    cycle::{apply_outcome, spawn_dispatch},
    link::{Heartbeat, LinkAction, LinkState, LinkSupervisor},
    protocol::{self, ControlMessage, ProtocolError, ServerMessage, SessionStatus},
    provider::{LinkError, SttConnector, SttLink, TranscriptEvent, UpstreamEvent},
    turn::{TurnController, TurnDecision},
};
use crate::{audio::AudioFormat, config::Config, state::AppState};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::{ops::ControlFlow, sync::Arc, time::Duration};
use stockvoice_core::{
    agent::{AgentDispatcher, DispatchError},
    conversation::{AgentResult, ConversationHistory, HISTORY_TURNS},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

pub const MAILBOX_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 64;

/// Everything a session reacts to, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Client(ControlMessage),
    Malformed(ProtocolError),
    Upstream {
        generation: u64,
        event: UpstreamEvent,
    },
    LinkOpened {
        generation: u64,
        result: Result<SttLink, LinkError>,
    },
    ReconnectDue {
        generation: u64,
    },
    DispatchDone {
        utterance: String,
        outcome: Result<AgentResult, DispatchError>,
    },
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LinkOpening,
    Listening,
    Processing,
    Closed,
}

/// Whether client audio is wanted right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Idle,
    /// `Start` received, waiting for the link.
    Opening,
    Listening,
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub format: AudioFormat,
    pub keepalive_interval: Duration,
    pub reconnect_backoff: Duration,
    /// Upper bound on opening one upstream link.
    pub connect_timeout: Duration,
    pub history_turns: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::PCM16_MONO_16K,
            keepalive_interval: Duration::from_secs(8),
            reconnect_backoff: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            history_turns: HISTORY_TURNS,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            format: AudioFormat::PCM16_MONO_16K,
            keepalive_interval: config.keepalive_interval,
            reconnect_backoff: config.reconnect_backoff,
            connect_timeout: config.connect_timeout,
            history_turns: config.history_turns,
        }
    }
}

/// One client's voice pipeline.
pub struct Session {
    id: Uuid,
    settings: SessionSettings,
    stt: Arc<dyn SttConnector>,
    dispatcher: Arc<dyn AgentDispatcher>,
    outbound: mpsc::Sender<ServerMessage>,
    mailbox: mpsc::Sender<SessionEvent>,

    capture: Capture,
    processing: bool,
    closed: bool,
    format_warned: bool,

    supervisor: LinkSupervisor,
    bridge: TranscriptionBridge,
    heartbeat: Heartbeat,
    turns: TurnController,
    history: ConversationHistory,
    pending_connect: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        id: Uuid,
        settings: SessionSettings,
        stt: Arc<dyn SttConnector>,
        dispatcher: Arc<dyn AgentDispatcher>,
        outbound: mpsc::Sender<ServerMessage>,
        mailbox: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            supervisor: LinkSupervisor::new(settings.reconnect_backoff),
            bridge: TranscriptionBridge::new(settings.format),
            heartbeat: Heartbeat::new(),
            turns: TurnController::new(),
            history: ConversationHistory::new(settings.history_turns),
            settings,
            stt,
            dispatcher,
            outbound,
            mailbox,
            capture: Capture::Idle,
            processing: false,
            closed: false,
            format_warned: false,
            pending_connect: None,
            reconnect_timer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.processing {
            SessionState::Processing
        } else {
            match self.capture {
                Capture::Idle => SessionState::Idle,
                Capture::Opening => SessionState::LinkOpening,
                Capture::Listening => SessionState::Listening,
            }
        }
    }

    /// Processes the mailbox until the client channel closes, then tears down.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<SessionEvent>) {
        self.send(ServerMessage::status(SessionStatus::Ready, "Ready"))
            .await;
        while let Some(event) = inbox.recv().await {
            if self.handle(event).await.is_break() {
                break;
            }
        }
        self.teardown();
    }

    pub async fn handle(&mut self, event: SessionEvent) -> ControlFlow<()> {
        match event {
            SessionEvent::Client(msg) => self.on_client(msg).await,
            SessionEvent::Malformed(e) => {
                warn!(error = %e, "Malformed client message");
                self.send(ServerMessage::error(e.to_string())).await;
            }
            SessionEvent::Upstream { generation, event } => {
                self.on_upstream(generation, event).await
            }
            SessionEvent::LinkOpened { generation, result } => {
                self.on_link_opened(generation, result).await
            }
            SessionEvent::ReconnectDue { generation } => {
                self.reconnect_timer = None;
                match self.supervisor.on_reconnect_due(generation) {
                    LinkAction::Connect { generation } => {
                        info!(generation, "Reconnecting transcription link");
                        self.spawn_connect(generation);
                    }
                    _ => debug!(generation, "Ignoring stale reconnect timer"),
                }
            }
            SessionEvent::DispatchDone { utterance, outcome } => {
                self.processing = false;
                let msg = apply_outcome(&mut self.history, &utterance, outcome);
                self.send(msg).await;
                self.send(ServerMessage::status(SessionStatus::Ready, "Ready"))
                    .await;
            }
            SessionEvent::ChannelClosed => {
                info!("Client channel closed");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_client(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Start => self.on_start().await,
            ControlMessage::Audio(frame) => self.on_audio(frame).await,
            ControlMessage::Stop => self.on_stop().await,
        }
    }

    async fn on_start(&mut self) {
        match self.capture {
            Capture::Listening => {
                self.send(ServerMessage::status(
                    SessionStatus::Listening,
                    "Already listening",
                ))
                .await;
                return;
            }
            Capture::Opening => return,
            Capture::Idle => {}
        }

        self.format_warned = false;
        match self.supervisor.state() {
            LinkState::Connected => {
                self.capture = Capture::Listening;
                self.send(ServerMessage::status(SessionStatus::Listening, "Listening..."))
                    .await;
            }
            LinkState::Disconnected => {
                self.capture = Capture::Opening;
                if let LinkAction::Connect { generation } = self.supervisor.request_open() {
                    self.spawn_connect(generation);
                }
                self.send(ServerMessage::status(
                    SessionStatus::Connecting,
                    "Connecting to speech service...",
                ))
                .await;
            }
            LinkState::Opening | LinkState::Reconnecting => {
                self.capture = Capture::Opening;
                self.send(ServerMessage::status(
                    SessionStatus::Connecting,
                    "Connecting to speech service...",
                ))
                .await;
            }
        }
    }

    async fn on_audio(&mut self, frame: Bytes) {
        if self.capture != Capture::Listening {
            debug!(bytes = frame.len(), "Dropping audio outside the listening phase");
            return;
        }
        match self.bridge.forward_audio(frame) {
            Ok(()) => {}
            Err(ForwardError::Rejected(e)) => {
                warn!(error = %e, "Rejected audio frame");
                if !self.format_warned {
                    self.format_warned = true;
                    self.send(ServerMessage::error(format!(
                        "Unsupported audio: {e}. Send 16 kHz mono 16-bit PCM."
                    )))
                    .await;
                }
            }
            Err(ForwardError::Link(LinkError::Backlogged)) => {
                warn!("Transcription link backlogged, dropping audio frame");
            }
            Err(ForwardError::Link(e)) => debug!(error = %e, "Dropping audio frame"),
        }
    }

    async fn on_stop(&mut self) {
        if self.capture == Capture::Idle {
            return;
        }
        self.capture = Capture::Idle;
        if self.bridge.is_open() {
            if let Err(e) = self.bridge.finalize() {
                warn!(error = %e, "Could not flush transcription link");
            }
        }
        self.send(ServerMessage::status(SessionStatus::Ready, "Stopped listening"))
            .await;
    }

    fn spawn_connect(&mut self, generation: u64) {
        if let Some(previous) = self.pending_connect.take() {
            previous.abort();
        }
        let stt = self.stt.clone();
        let mailbox = self.mailbox.clone();
        let format = self.settings.format;
        let limit = self.settings.connect_timeout;
        self.pending_connect = Some(tokio::spawn(
            async move {
                let result = tokio::time::timeout(limit, stt.connect(format))
                    .await
                    .unwrap_or_else(|_| {
                        Err(LinkError::Connect(format!("timed out after {limit:?}")))
                    });
                // If the session is gone the link is dropped, which closes it.
                let _ = mailbox
                    .send(SessionEvent::LinkOpened { generation, result })
                    .await;
            }
            .in_current_span(),
        ));
    }

    async fn on_link_opened(&mut self, generation: u64, result: Result<SttLink, LinkError>) {
        self.pending_connect = None;
        match result {
            Ok(link) => {
                if !self.supervisor.on_connected(generation) {
                    debug!(generation, "Discarding superseded link");
                    return;
                }
                self.bridge.attach(link, generation, self.mailbox.clone());
                if let Some(commands) = self.bridge.command_sender() {
                    self.heartbeat
                        .arm(self.settings.keepalive_interval, commands);
                }
                info!(generation, "Transcription link open");
                self.send(ServerMessage::status(
                    SessionStatus::Connected,
                    "Connected to speech service",
                ))
                .await;

                if self.capture == Capture::Opening {
                    self.capture = Capture::Listening;
                }
                if self.capture == Capture::Listening {
                    self.send(ServerMessage::status(SessionStatus::Listening, "Listening..."))
                        .await;
                }
            }
            Err(e) => {
                let reconnect = self.supervisor.is_reconnect_attempt();
                if self.supervisor.on_connect_failed(generation) != LinkAction::GiveUp {
                    debug!(generation, "Ignoring superseded connect failure");
                    return;
                }
                error!(generation, reconnect, error = %e, "Could not open transcription link");
                self.capture = Capture::Idle;
                self.send(ServerMessage::error(
                    "Could not connect to the speech service. Press start to try again.",
                ))
                .await;
                self.send(ServerMessage::status(SessionStatus::Ready, "Ready"))
                    .await;
            }
        }
    }

    async fn on_upstream(&mut self, generation: u64, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Closed { reason } => self.on_link_lost(generation, reason).await,
            _ if generation != self.supervisor.generation() => {
                debug!(generation, "Ignoring event from superseded link");
            }
            UpstreamEvent::Transcript(transcript) => self.on_transcript(transcript).await,
            UpstreamEvent::UtteranceEnd => {
                let decision = self.turns.on_boundary(self.processing);
                self.on_turn(decision).await;
            }
        }
    }

    async fn on_transcript(&mut self, transcript: TranscriptEvent) {
        if !transcript.text.is_empty() {
            self.send(ServerMessage::Transcript {
                text: transcript.text.clone(),
                is_final: transcript.is_final,
                speech_final: transcript.speech_final,
            })
            .await;
        }
        let decision = self.turns.on_transcript(&transcript, self.processing);
        self.on_turn(decision).await;
    }

    async fn on_turn(&mut self, decision: TurnDecision) {
        match decision {
            TurnDecision::Pending => {}
            TurnDecision::DroppedBusy(utterance) => {
                warn!(%utterance, "Agent still busy, dropping utterance");
            }
            TurnDecision::Dispatch(utterance) => {
                self.processing = true;
                info!(%utterance, "Dispatching utterance");
                self.send(ServerMessage::status(SessionStatus::Processing, "Processing..."))
                    .await;
                // Not tracked: an in-flight dispatch finishes on its own and a
                // closed session simply never reads the result.
                spawn_dispatch(
                    self.dispatcher.clone(),
                    utterance,
                    self.history.turns().to_vec(),
                    self.mailbox.clone(),
                );
            }
        }
    }

    async fn on_link_lost(&mut self, generation: u64, reason: String) {
        match self.supervisor.on_link_lost(generation, !self.closed) {
            LinkAction::ScheduleReconnect { generation, after } => {
                warn!(generation, %reason, ?after, "Transcription link lost, reconnecting");
                self.heartbeat.disarm();
                self.bridge.close();
                let mailbox = self.mailbox.clone();
                self.reconnect_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = mailbox.send(SessionEvent::ReconnectDue { generation }).await;
                }));
                self.send(ServerMessage::status(
                    SessionStatus::Connecting,
                    "Connection lost, reconnecting...",
                ))
                .await;
            }
            LinkAction::GiveUp => {
                self.heartbeat.disarm();
                self.bridge.close();
            }
            _ => debug!(generation, %reason, "Ignoring close of superseded link"),
        }
    }

    async fn send(&self, msg: ServerMessage) {
        if self.outbound.send(msg).await.is_err() {
            debug!("Client writer gone, dropping outbound message");
        }
    }

    /// Releases every session resource. Runs at most once.
    ///
    /// The heartbeat is stopped before the link is closed so no keepalive can
    /// race the close.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        let last_state = self.state();
        self.closed = true;
        self.supervisor.shutdown();
        self.heartbeat.disarm();
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(connect) = self.pending_connect.take() {
            connect.abort();
        }
        self.bridge.close();
        if !self.turns.pending_text().is_empty() {
            debug!(pending = %self.turns.pending_text(), "Discarding unfinished utterance");
        }
        self.turns.clear();
        info!(
            session_id = %self.id,
            ?last_state,
            history_turns = self.history.len(),
            "Session torn down"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Serves one WebSocket connection for its whole lifetime.
///
/// A writer task drains outbound messages to the socket, a reader task turns
/// inbound frames into mailbox events, and the session actor runs in between.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
    let session_id = state.registry.create(mailbox_tx.clone()).await;
    tracing::Span::current().record("session_id", tracing::field::display(session_id));
    info!("New voice session.");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(
        async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = send_msg(&mut socket_tx, msg).await {
                    warn!(error = ?e, "Failed to write to client WebSocket");
                    break;
                }
            }
            let _ = socket_tx.close().await;
        }
        .in_current_span(),
    );

    let reader_mailbox = mailbox_tx.clone();
    let reader = tokio::spawn(
        async move {
            while let Some(msg_result) = socket_rx.next().await {
                let event = match msg_result {
                    Ok(Message::Text(text)) => match protocol::decode(text.as_str()) {
                        Ok(msg) => SessionEvent::Client(msg),
                        Err(e) => SessionEvent::Malformed(e),
                    },
                    Ok(Message::Binary(_)) => SessionEvent::Malformed(ProtocolError::UnexpectedBinary),
                    Ok(Message::Close(_)) => {
                        info!("Client sent close frame.");
                        break;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                    Err(e) => {
                        warn!(error = ?e, "Error receiving from client WebSocket");
                        break;
                    }
                };
                if reader_mailbox.send(event).await.is_err() {
                    break;
                }
            }
            let _ = reader_mailbox.send(SessionEvent::ChannelClosed).await;
        }
        .in_current_span(),
    );

    let session = Session::new(
        session_id,
        state.settings.clone(),
        state.stt.clone(),
        state.dispatcher.clone(),
        outbound_tx,
        mailbox_tx,
    );
    session.run(mailbox_rx).await;

    reader.abort();
    // The writer stops by itself once the session's outbound sender is gone.
    drop(writer);
    state.registry.destroy(session_id).await;
    info!("Voice session finished.");
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.keepalive_interval, Duration::from_secs(8));
        assert_eq!(settings.reconnect_backoff, Duration::from_secs(1));
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.history_turns, 10);
        assert_eq!(settings.format, AudioFormat::PCM16_MONO_16K);
    }
}
