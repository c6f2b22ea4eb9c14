//! Streaming speech-to-text providers.
//!
//! A provider link is a pair of channels driven by a background task: the
//! session pushes [`UpstreamCommand`]s in and reads [`UpstreamEvent`]s out.

pub mod deepgram;

use crate::audio::AudioFormat;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

/// Something the session asks the upstream link to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    Audio(Bytes),
    KeepAlive,
    /// Flush buffered audio and emit final results.
    Finalize,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
    pub speech_final: bool,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, is_final: bool, speech_final: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            speech_final,
            timestamp: Utc::now(),
        }
    }
}

/// Something the upstream link reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Transcript(TranscriptEvent),
    /// The provider detected the end of an utterance.
    UtteranceEnd,
    /// The link ended without us asking it to.
    Closed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("could not connect to the transcription service: {0}")]
    Connect(String),
    #[error("transcription link closed: {0}")]
    Closed(String),
    #[error("no transcription link is open")]
    NotOpen,
    #[error("transcription link is not keeping up")]
    Backlogged,
}

/// One open upstream connection.
///
/// Closing is idempotent and also happens on drop.
#[derive(Debug)]
pub struct SttLink {
    commands: mpsc::Sender<UpstreamCommand>,
    events: Option<mpsc::Receiver<UpstreamEvent>>,
    closed: bool,
}

impl SttLink {
    pub fn new(
        commands: mpsc::Sender<UpstreamCommand>,
        events: mpsc::Receiver<UpstreamEvent>,
    ) -> Self {
        Self {
            commands,
            events: Some(events),
            closed: false,
        }
    }

    /// Hands the event stream to a single consumer.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UpstreamEvent>> {
        self.events.take()
    }

    pub fn commands(&self) -> &mpsc::Sender<UpstreamCommand> {
        &self.commands
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.commands.is_closed()
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // A full or dropped command channel ends the link task all the same.
        if let Err(e) = self.commands.try_send(UpstreamCommand::Close) {
            debug!(error = %e, "Close command not delivered to link task");
        }
    }
}

impl Drop for SttLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens upstream links.
#[async_trait]
pub trait SttConnector: Send + Sync {
    async fn connect(&self, format: AudioFormat) -> Result<SttLink, LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_is_sent_once() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);
        let (_evt_tx, evt_rx) = mpsc::channel(4);
        let mut link = SttLink::new(cmd_tx, evt_rx);

        link.close();
        link.close();
        drop(link);

        assert_eq!(cmd_rx.recv().await, Some(UpstreamCommand::Close));
        assert_eq!(cmd_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_events_can_be_taken_once() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        let (evt_tx, evt_rx) = mpsc::channel(1);
        let mut link = SttLink::new(cmd_tx, evt_rx);

        let mut events = link.take_events().unwrap();
        assert!(link.take_events().is_none());

        evt_tx.send(UpstreamEvent::UtteranceEnd).await.unwrap();
        assert_eq!(events.recv().await, Some(UpstreamEvent::UtteranceEnd));
    }
}
