//! Defines the WebSocket message protocol between the browser client and the API server.

use crate::audio;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server, as they appear on the wire.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Begins the listening phase.
    Start,
    /// One base64 encoded PCM16 mono 16 kHz frame.
    Audio { audio: String },
    /// Ends the utterance stream and flushes the upstream link.
    Stop,
}

/// A decoded client message, audio payloads already turned into bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Start,
    Audio(Bytes),
    Stop,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidJson(String),
    #[error("audio payload is not valid base64")]
    InvalidAudioEncoding,
    #[error("binary frames are not supported, send audio as base64 JSON")]
    UnexpectedBinary,
}

/// Parses one inbound text frame.
pub fn decode(text: &str) -> Result<ControlMessage, ProtocolError> {
    let msg: ClientMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    Ok(match msg {
        ClientMessage::Start => ControlMessage::Start,
        ClientMessage::Audio { audio } => ControlMessage::Audio(
            audio::decode_base64(&audio).map_err(|_| ProtocolError::InvalidAudioEncoding)?,
        ),
        ClientMessage::Stop => ControlMessage::Stop,
    })
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Listening,
    Processing,
    Ready,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A pipeline phase change.
    Status {
        status: SessionStatus,
        message: String,
    },
    /// An interim or final transcription of the user's speech.
    Transcript {
        text: String,
        is_final: bool,
        speech_final: bool,
    },
    /// The agent's reply to a completed utterance.
    Response {
        text: String,
        #[serde(rename = "toolsUsed")]
        tools_used: Vec<String>,
    },
    /// A human-readable error. The session stays open.
    Error { message: String },
}

impl ServerMessage {
    pub fn status(status: SessionStatus, message: impl Into<String>) -> Self {
        ServerMessage::Status {
            status,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_control_messages() {
        assert_eq!(decode(r#"{"type":"start"}"#), Ok(ControlMessage::Start));
        assert_eq!(decode(r#"{"type":"stop"}"#), Ok(ControlMessage::Stop));
        assert_eq!(
            decode(r#"{"type":"audio","audio":"AAEC"}"#),
            Ok(ControlMessage::Audio(Bytes::from_static(&[0, 1, 2])))
        );
    }

    #[test]
    fn test_decode_rejects_malformed_messages() {
        assert!(matches!(
            decode("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            decode(r#"{"type":"dance"}"#),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            decode(r#"{"type":"audio"}"#),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert_eq!(
            decode(r#"{"type":"audio","audio":"%%%"}"#),
            Err(ProtocolError::InvalidAudioEncoding)
        );
    }

    #[test]
    fn test_server_message_wire_shape() {
        let response = ServerMessage::Response {
            text: "Two items are low on stock.".into(),
            tools_used: vec!["get_low_stock_alerts".into()],
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "type": "response",
                "text": "Two items are low on stock.",
                "toolsUsed": ["get_low_stock_alerts"]
            })
        );

        let status = ServerMessage::status(SessionStatus::Listening, "Listening...");
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"type": "status", "status": "listening", "message": "Listening..."})
        );

        let transcript = ServerMessage::Transcript {
            text: "show low stock".into(),
            is_final: true,
            speech_final: false,
        };
        assert_eq!(
            serde_json::to_value(&transcript).unwrap(),
            json!({"type": "transcript", "text": "show low stock", "is_final": true, "speech_final": false})
        );
    }
}
