//! Live session state: transcript, opaque context, and turn status.

use mate_ai::{ChatMessage, ContextTokens};

/// Where the current (or most recent) turn stands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnState {
    #[default]
    Idle,
    /// Request issued, no chunk yet
    Sending,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

/// Transcript and context for one session.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Opaque continuation state returned by the server
    pub context: ContextTokens,
    /// Messages shown and persisted, in order
    pub history: Vec<ChatMessage>,
    /// Last message id handed out
    pub message_counter: u64,
    pub turn: TurnState,
    /// Saved conversation this session was restored from
    pub current_conversation_id: Option<String>,
}

impl SessionState {
    pub(crate) fn next_message_id(&mut self) -> u64 {
        self.message_counter += 1;
        self.message_counter
    }

    pub(crate) fn reset(&mut self) {
        self.context.clear();
        self.history.clear();
        self.message_counter = 0;
        self.turn = TurnState::Idle;
        self.current_conversation_id = None;
    }

    /// Replace the transcript with `messages` (role and content only)
    pub(crate) fn replace(&mut self, context: ContextTokens, messages: &[ChatMessage]) {
        self.context = context;
        self.history = messages.iter().map(ChatMessage::stripped).collect();
        self.message_counter = self.history.len() as u64;
        self.turn = TurnState::Idle;
    }
}
