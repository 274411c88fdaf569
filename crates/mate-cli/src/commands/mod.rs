//! Slash commands for interactive mode

pub mod conversation;
mod fork;
mod info;
mod model;
pub mod profile;

pub use conversation::ConversationCommand;
pub use fork::ForkCommand;
pub use info::InfoCommand;
pub use model::ModelCommand;
pub use profile::ProfileCommand;

use mate_agent::{ConversationStore, Session};

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Clear the conversation
    Clear,
    /// Summarize the history into one message
    Compress,
    /// Save the session, optionally under a new name
    Save(Option<String>),
    /// Replace the session with a saved conversation
    Load(String),
    /// Continue from the message at this index
    ForkFrom(usize),
    /// List models on the server
    ListModels,
    /// Switch model
    ChangeModel(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(
    input: &str,
    session: &Session,
    conversations: &ConversationStore,
) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "compress" => CommandResult::Compress,

        "save" => CommandResult::Save((!args.is_empty()).then(|| args.to_string())),

        "load" => match args {
            "" => CommandResult::Message("Usage: /load <conversation-id>".to_string()),
            id => CommandResult::Load(id.to_string()),
        },

        "list" | "ls" => ConversationCommand::list(conversations),

        "delete" => ConversationCommand::delete(args, conversations),

        "rename" => ConversationCommand::rename(args, conversations),

        "fork" | "f" => ForkCommand::execute(args, session.history()),

        "profile" | "p" => ProfileCommand::execute(args, session.rules()),

        "profiles" => ProfileCommand::list(session.rules()),

        "models" => CommandResult::ListModels,

        "model" | "m" => ModelCommand::execute(args, &session.config().model),

        "info" | "i" => InfoCommand::execute(session),

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?          Show this help message
  /clear, /c             Clear conversation history
  /compress              Summarize the conversation to free up context
  /save [name]           Save the conversation
  /load <id>             Load a saved conversation
  /list, /ls             List saved conversations
  /delete <id>           Delete a saved conversation
  /rename <id> <name>    Rename a saved conversation
  /fork, /f <index>      Continue from the message at <index>
  /profile, /p [id|none] Show, activate, or deactivate a post-processing profile
  /profiles              List profiles and rules
  /models                List models on the server
  /model, /m <name>      Switch model
  /info, /i              Show session info
  /quit, /exit, /q       Exit codemate

Press Ctrl-C while a response is streaming to stop it."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mate_agent::{MemorySettings, RuleStore};
    use mate_ai::{ClientConfig, OllamaProvider};
    use std::sync::Arc;

    fn setup() -> (Session, ConversationStore, tempfile::TempDir) {
        let rules = RuleStore::open(MemorySettings::new()).unwrap().into_shared();
        let provider = Arc::new(OllamaProvider::new("http://127.0.0.1:9"));
        let session = Session::new(ClientConfig::default(), provider, rules);
        let dir = tempfile::tempdir().unwrap();
        let conversations = ConversationStore::new(dir.path());
        (session, conversations, dir)
    }

    #[test]
    fn test_not_a_command() {
        let (session, conversations, _dir) = setup();
        assert!(execute_command("hello", &session, &conversations).is_none());
    }

    #[test]
    fn test_simple_commands() {
        let (session, conversations, _dir) = setup();
        let run = |input: &str| execute_command(input, &session, &conversations).unwrap();

        assert_eq!(run("/clear"), CommandResult::Clear);
        assert_eq!(run("/q"), CommandResult::Exit);
        assert_eq!(run("/compress"), CommandResult::Compress);
        assert_eq!(run("/save"), CommandResult::Save(None));
        assert_eq!(run("/save  My chat "), CommandResult::Save(Some("My chat".into())));
        assert_eq!(run("/load conv-1"), CommandResult::Load("conv-1".into()));
        assert_eq!(run("/model llama3"), CommandResult::ChangeModel("llama3".into()));
        assert_eq!(run("/bogus"), CommandResult::Unknown("bogus".into()));
        assert!(matches!(run("/help"), CommandResult::Message(m) if m.contains("/compress")));
    }

    #[test]
    fn test_list_empty() {
        let (session, conversations, _dir) = setup();
        assert!(matches!(
            execute_command("/list", &session, &conversations),
            Some(CommandResult::Message(m)) if m.contains("No saved conversations")
        ));
    }
}
