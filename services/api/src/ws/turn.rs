//! Turn detection: folds transcript events into complete user utterances.

use super::provider::TranscriptEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    /// Nothing to do yet.
    Pending,
    /// A complete utterance ready for the agent.
    Dispatch(String),
    /// A complete utterance arrived while the agent was still busy and was dropped.
    DroppedBusy(String),
}

/// Accumulates final transcript text until an utterance boundary.
///
/// Utterances completing while a dispatch is in flight are dropped, not queued.
#[derive(Debug, Default)]
pub struct TurnController {
    buffer: String,
}

impl TurnController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_transcript(&mut self, event: &TranscriptEvent, processing: bool) -> TurnDecision {
        if event.is_final {
            let text = event.text.trim();
            if !text.is_empty() {
                if !self.buffer.is_empty() {
                    self.buffer.push(' ');
                }
                self.buffer.push_str(text);
            }
        }
        if event.speech_final {
            self.on_boundary(processing)
        } else {
            TurnDecision::Pending
        }
    }

    pub fn on_boundary(&mut self, processing: bool) -> TurnDecision {
        let utterance = std::mem::take(&mut self.buffer);
        if utterance.is_empty() {
            TurnDecision::Pending
        } else if processing {
            TurnDecision::DroppedBusy(utterance)
        } else {
            TurnDecision::Dispatch(utterance)
        }
    }

    pub fn pending_text(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interim(text: &str) -> TranscriptEvent {
        TranscriptEvent::new(text, false, false)
    }

    fn final_(text: &str) -> TranscriptEvent {
        TranscriptEvent::new(text, true, false)
    }

    #[test]
    fn test_interim_then_final_dispatches_final_text_once() {
        let mut turns = TurnController::new();

        assert_eq!(turns.on_transcript(&interim("add"), false), TurnDecision::Pending);
        assert_eq!(
            turns.on_transcript(&final_("add ten towels"), false),
            TurnDecision::Pending
        );
        assert_eq!(
            turns.on_boundary(false),
            TurnDecision::Dispatch("add ten towels".to_string())
        );
        assert_eq!(turns.on_boundary(false), TurnDecision::Pending);
    }

    #[test]
    fn test_finals_are_space_joined() {
        let mut turns = TurnController::new();
        turns.on_transcript(&final_(" record a sale "), false);
        turns.on_transcript(&final_("of two sarees"), false);

        assert_eq!(turns.pending_text(), "record a sale of two sarees");
    }

    #[test]
    fn test_speech_final_result_closes_the_turn() {
        let mut turns = TurnController::new();
        turns.on_transcript(&final_("show"), false);

        let decision = turns.on_transcript(&TranscriptEvent::new("low stock", true, true), false);

        assert_eq!(decision, TurnDecision::Dispatch("show low stock".to_string()));
        assert_eq!(turns.pending_text(), "");
    }

    #[test]
    fn test_boundary_while_busy_drops_the_utterance() {
        let mut turns = TurnController::new();
        turns.on_transcript(&final_("what sold today"), true);

        assert_eq!(
            turns.on_boundary(true),
            TurnDecision::DroppedBusy("what sold today".to_string())
        );
        assert_eq!(turns.pending_text(), "");
    }

    #[test]
    fn test_empty_boundary_is_a_no_op() {
        let mut turns = TurnController::new();
        turns.on_transcript(&interim("uh"), false);
        assert_eq!(turns.on_boundary(false), TurnDecision::Pending);
        assert_eq!(
            turns.on_transcript(&TranscriptEvent::new("", true, true), true),
            TurnDecision::Pending
        );
    }

    #[test]
    fn test_clear() {
        let mut turns = TurnController::new();
        turns.on_transcript(&final_("half a sentence"), false);
        turns.clear();
        assert_eq!(turns.on_boundary(false), TurnDecision::Pending);
    }
}
