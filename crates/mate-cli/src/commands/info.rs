//! /info command - show session info

use super::CommandResult;
use mate_agent::Session;
use mate_ai::Role;

pub struct InfoCommand;

impl InfoCommand {
    pub fn execute(session: &Session) -> CommandResult {
        let history = session.history();
        let count = |role: Role| history.iter().filter(|m| m.role == role).count();
        let config = session.config();

        let profile = {
            let store = session.rules().read();
            store
                .active_profile()
                .map(|p| format!("{} ({})", p.name, p.id))
                .unwrap_or_else(|| "none".to_string())
        };

        let mut info = format!(
            "Session info:\n  Server: {}\n  Model: {}\n  Temperature: {}\n  Context window: {}\n",
            config.base_url, config.model, config.temperature, config.context_size
        );
        info.push_str(&format!(
            "  Messages: {} ({} user, {} assistant, {} system)\n",
            history.len(),
            count(Role::User),
            count(Role::Assistant),
            count(Role::System)
        ));
        info.push_str(&format!("  Context tokens: {}\n", session.context().len()));
        info.push_str(&format!("  Post-processing profile: {}\n", profile));
        info.push_str(&format!(
            "  Saved as: {}",
            session.current_conversation_id().unwrap_or("(unsaved)")
        ));

        CommandResult::Message(info)
    }
}
