//! mate-agent: chat session runtime
//!
//! This crate drives streaming chat turns against an inference provider,
//! post-processes replies through user-defined rule profiles, and saves
//! conversations to disk.

pub mod compaction;
pub mod conversation;
pub mod error;
pub mod events;
pub mod handle;
pub mod persistence;
pub mod profile;
pub mod rules;
pub mod session;
pub mod settings;
pub mod store;

pub use conversation::{SessionState, TurnState};
pub use error::{Error, Result};
pub use events::SessionEvent;
pub use handle::SessionHandle;
pub use persistence::{Conversation, ConversationStore, ConversationSummary};
pub use profile::{Profile, RuleRegistry};
pub use rules::{Rule, RuleKind};
pub use session::{Session, TurnOutcome, TurnReport};
pub use settings::{MemorySettings, PipelineSettings, SettingsBackend, TomlSettingsFile};
pub use store::{NewProfile, NewRule, ProfilePatch, RulePatch, RuleStore, SharedRuleStore};
