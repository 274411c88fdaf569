//! Session event types

use mate_ai::{ContextTokens, Role};
use serde::{Deserialize, Serialize};

/// Events emitted while a session runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message entered the transcript (assistant placeholders start empty)
    MessageAdded {
        id: u64,
        role: Role,
        content: String,
    },

    /// Message content changed; `append` carries a delta, otherwise a full replacement
    MessageUpdated {
        id: u64,
        content: String,
        append: bool,
    },

    /// A turn reached a terminal state
    TurnComplete {
        id: u64,
        /// Chunks received; absent when the turn was aborted
        chunk_count: Option<u32>,
        duration_ms: u64,
        /// Context after the turn; absent when the turn was aborted
        context_snapshot: Option<ContextTokens>,
    },

    /// Context size or message count changed
    ContextInfoChanged {
        context_size: usize,
        message_count: usize,
    },

    /// The transcript was reset
    ChatCleared,

    /// The active profile rewrote an assistant response
    PostProcessed { id: u64, profile_id: String },
}

impl SessionEvent {
    /// Check if this event ends a turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::TurnComplete { .. })
    }
}
