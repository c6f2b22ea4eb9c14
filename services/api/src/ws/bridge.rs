//! The session's side of the upstream transcription link.

use super::{
    provider::{LinkError, SttLink, UpstreamCommand},
    session::SessionEvent,
};
use crate::audio::{self, AudioFormat, FrameRejected};
use bytes::Bytes;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error(transparent)]
    Rejected(#[from] FrameRejected),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Owns at most one open [`SttLink`] and pumps its events into the session
/// mailbox, tagged with the link's generation.
pub struct TranscriptionBridge {
    format: AudioFormat,
    link: Option<SttLink>,
    pump: Option<JoinHandle<()>>,
    generation: u64,
}

impl TranscriptionBridge {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            link: None,
            pump: None,
            generation: 0,
        }
    }

    /// Takes ownership of a freshly opened link, closing any previous one.
    pub fn attach(&mut self, mut link: SttLink, generation: u64, mailbox: mpsc::Sender<SessionEvent>) {
        self.close();
        if let Some(mut events) = link.take_events() {
            self.pump = Some(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if mailbox
                        .send(SessionEvent::Upstream { generation, event })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }));
        }
        self.link = Some(link);
        self.generation = generation;
    }

    pub fn is_open(&self) -> bool {
        self.link.as_ref().is_some_and(|link| !link.is_closed())
    }

    fn open_link(&self) -> Result<&SttLink, LinkError> {
        self.link
            .as_ref()
            .filter(|link| !link.is_closed())
            .ok_or(LinkError::NotOpen)
    }

    /// Queues a command without waiting. A link that stopped draining its
    /// queue must never stall the session loop.
    fn push(&self, command: UpstreamCommand) -> Result<(), LinkError> {
        self.open_link()?
            .commands()
            .try_send(command)
            .map_err(|e| match e {
                TrySendError::Full(_) => LinkError::Backlogged,
                TrySendError::Closed(_) => LinkError::Closed("link task ended".to_string()),
            })
    }

    /// Validates a client frame and streams it upstream unchanged.
    pub fn forward_audio(&self, frame: Bytes) -> Result<(), ForwardError> {
        audio::validate_frame(&frame, &self.format)?;
        let len = frame.len();
        self.push(UpstreamCommand::Audio(frame))?;
        debug!(bytes = len, generation = self.generation, "Forwarded audio frame");
        Ok(())
    }

    /// Asks the provider to flush buffered audio into final results.
    pub fn finalize(&self) -> Result<(), LinkError> {
        self.push(UpstreamCommand::Finalize)
    }

    /// A handle for sending control frames without going through the session.
    pub fn command_sender(&self) -> Option<mpsc::Sender<UpstreamCommand>> {
        self.open_link().ok().map(|link| link.commands().clone())
    }

    /// Closes the current link, if any. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut link) = self.link.take() {
            debug!(generation = self.generation, "Closing transcription link");
            link.close();
        }
    }
}

impl Drop for TranscriptionBridge {
    fn drop(&mut self) {
        self.close();
    }
}
