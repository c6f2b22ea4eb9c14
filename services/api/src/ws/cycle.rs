//! Runs one utterance through the agent and folds the outcome back into the session.

use super::{protocol::ServerMessage, session::SessionEvent};
use std::sync::Arc;
use stockvoice_core::{
    agent::{AgentDispatcher, DispatchError},
    conversation::{AgentResult, ConversationHistory, Turn},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, error, info, info_span};

/// Dispatches `utterance` on its own task; the outcome comes back through the mailbox.
///
/// The session loop keeps running meanwhile, so audio and transcripts are not
/// held up by a slow agent.
pub fn spawn_dispatch(
    dispatcher: Arc<dyn AgentDispatcher>,
    utterance: String,
    history: Vec<Turn>,
    mailbox: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    let span = info_span!("dispatch", history_len = history.len());
    tokio::spawn(
        async move {
            let outcome = dispatcher.dispatch(&utterance, &history).await;
            // A closed mailbox means the session is gone; the result is discarded.
            let _ = mailbox
                .send(SessionEvent::DispatchDone { utterance, outcome })
                .await;
        }
        .instrument(span),
    )
}

/// Records a finished dispatch and builds the message for the client.
///
/// History changes only on success.
pub fn apply_outcome(
    history: &mut ConversationHistory,
    utterance: &str,
    outcome: Result<AgentResult, DispatchError>,
) -> ServerMessage {
    match outcome {
        Ok(result) => {
            info!(tools = ?result.tools_used, "Agent replied");
            history.record_exchange(utterance, &result.reply);
            ServerMessage::Response {
                text: result.reply,
                tools_used: result.tools_used,
            }
        }
        Err(e) => {
            error!(error = %e, "Agent dispatch failed");
            ServerMessage::error("Sorry, I couldn't process that request. Please try again.")
        }
    }
}
