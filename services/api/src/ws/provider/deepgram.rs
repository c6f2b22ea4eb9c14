//! Handles the streaming WebSocket connection to Deepgram's `/v1/listen` endpoint.

use super::{LinkError, SttConnector, SttLink, TranscriptEvent, UpstreamCommand, UpstreamEvent};
use crate::{audio::AudioFormat, config::Config};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 64;

/// Opens Deepgram live transcription links.
#[derive(Clone, Debug)]
pub struct DeepgramConnector {
    api_key: String,
    base_url: String,
    model: String,
    language: String,
    endpointing_ms: u64,
    utterance_end_ms: u64,
}

impl DeepgramConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            api_key: config.deepgram_api_key.clone(),
            base_url: config.deepgram_url.clone(),
            model: config.deepgram_model.clone(),
            language: config.deepgram_language.clone(),
            endpointing_ms: config.endpointing_ms,
            utterance_end_ms: config.utterance_end_ms,
        }
    }

    /// The listen URL with the audio format and transcription options in the query.
    pub fn listen_url(&self, format: &AudioFormat) -> String {
        format!(
            "{}?model={}&language={}&encoding={}&sample_rate={}&channels={}\
             &interim_results=true&punctuate=true&smart_format=true\
             &endpointing={}&utterance_end_ms={}",
            self.base_url,
            self.model,
            self.language,
            format.encoding(),
            format.sample_rate,
            format.channels,
            self.endpointing_ms,
            self.utterance_end_ms,
        )
    }
}

#[async_trait]
impl SttConnector for DeepgramConnector {
    async fn connect(&self, format: AudioFormat) -> Result<SttLink, LinkError> {
        let connect_err = |e: &dyn std::fmt::Display| LinkError::Connect(e.to_string());

        let mut request = self
            .listen_url(&format)
            .into_client_request()
            .map_err(|e| connect_err(&e))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Token {}", self.api_key)
                .parse()
                .map_err(|e| connect_err(&e))?,
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| connect_err(&e))?;
        info!(model = %self.model, "Connected to Deepgram live transcription.");

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (evt_tx, evt_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(run_link(ws_stream, cmd_rx, evt_tx));
        Ok(SttLink::new(cmd_tx, evt_rx))
    }
}

fn control(kind: &str) -> WsMessage {
    WsMessage::Text(json!({ "type": kind }).to_string().into())
}

/// Proxies commands out to Deepgram and parsed results back until either side ends.
async fn run_link(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut commands: mpsc::Receiver<UpstreamCommand>,
    events: mpsc::Sender<UpstreamEvent>,
) {
    let (mut deepgram_tx, mut deepgram_rx) = ws_stream.split();

    // `None` means we ended the link ourselves.
    let lost: Option<String> = loop {
        tokio::select! {
            cmd = commands.recv() => {
                let result = match cmd {
                    Some(UpstreamCommand::Audio(frame)) => deepgram_tx.send(WsMessage::Binary(frame)).await,
                    Some(UpstreamCommand::KeepAlive) => deepgram_tx.send(control("KeepAlive")).await,
                    Some(UpstreamCommand::Finalize) => deepgram_tx.send(control("Finalize")).await,
                    Some(UpstreamCommand::Close) | None => {
                        let _ = deepgram_tx.send(control("CloseStream")).await;
                        let _ = deepgram_tx.close().await;
                        break None;
                    }
                };
                if let Err(e) = result {
                    break Some(format!("send failed: {e}"));
                }
            },
            msg = deepgram_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(event) = parse_message(&text) {
                            if events.send(event).await.is_err() {
                                break None;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        break Some(
                            frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "closed by provider".to_string()),
                        );
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break Some("stream ended".to_string()),
                }
            },
        }
    };

    match lost {
        Some(reason) => {
            warn!(%reason, "Deepgram link lost.");
            let _ = events.send(UpstreamEvent::Closed { reason }).await;
        }
        None => debug!("Deepgram link closed."),
    }
}

#[derive(Deserialize, Debug)]
struct DeepgramMessage {
    #[serde(rename = "type")]
    kind: String,
    /// An object for `Results`, an array of channel indices for `UtteranceEnd`.
    #[serde(default)]
    channel: Value,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    #[serde(default)]
    from_finalize: bool,
    description: Option<String>,
}

/// Maps one provider message to a session event, if it carries one.
fn parse_message(text: &str) -> Option<UpstreamEvent> {
    let msg: DeepgramMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Unparsable Deepgram message");
            return None;
        }
    };

    match msg.kind.as_str() {
        "Results" => {
            let transcript = msg
                .channel
                .pointer("/alternatives/0/transcript")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim();
            // Results answering a Finalize close the utterance too.
            let speech_final = msg.speech_final || msg.from_finalize;
            if transcript.is_empty() && !(msg.is_final && speech_final) {
                return None;
            }
            Some(UpstreamEvent::Transcript(TranscriptEvent::new(
                transcript,
                msg.is_final,
                speech_final,
            )))
        }
        "UtteranceEnd" => Some(UpstreamEvent::UtteranceEnd),
        "Error" => {
            warn!(description = ?msg.description, "Deepgram reported an error");
            None
        }
        other => {
            debug!(kind = other, "Ignoring Deepgram message");
            None
        }
    }
}
