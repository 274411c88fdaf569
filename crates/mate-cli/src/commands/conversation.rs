//! Saved conversation commands: /list, /delete, /rename

use super::CommandResult;
use crate::utils::{format_time, truncate_chars};
use mate_agent::{Conversation, ConversationStore, ConversationSummary};

pub struct ConversationCommand;

impl ConversationCommand {
    pub fn list(store: &ConversationStore) -> CommandResult {
        match store.list() {
            Ok(summaries) => CommandResult::Message(list_text(&summaries)),
            Err(e) => CommandResult::Message(format!("Failed to list conversations: {}", e)),
        }
    }

    pub fn delete(args: &str, store: &ConversationStore) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message("Usage: /delete <conversation-id>".to_string());
        }
        CommandResult::Message(match store.delete(args) {
            Ok(true) => format!("Deleted {}", args),
            Ok(false) => format!("No conversation with id {}", args),
            Err(e) => format!("Failed to delete {}: {}", args, e),
        })
    }

    pub fn rename(args: &str, store: &ConversationStore) -> CommandResult {
        let Some((id, name)) = args
            .split_once(' ')
            .map(|(id, name)| (id, name.trim()))
            .filter(|(_, name)| !name.is_empty())
        else {
            return CommandResult::Message("Usage: /rename <conversation-id> <name>".to_string());
        };
        CommandResult::Message(match store.rename(id, name) {
            Ok(true) => format!("Renamed {} to '{}'", id, name),
            Ok(false) => format!("No conversation with id {}", id),
            Err(e) => format!("Failed to rename {}: {}", id, e),
        })
    }
}

/// Table of saved conversations
pub fn list_text(summaries: &[ConversationSummary]) -> String {
    if summaries.is_empty() {
        return "No saved conversations.".to_string();
    }

    let mut output = String::from("Saved conversations:\n");
    for summary in summaries {
        output.push_str(&format!(
            "  {}  {}  ({} messages, updated {})\n",
            summary.id,
            summary.name,
            summary.message_count,
            format_time(&summary.updated_at)
        ));
        if !summary.preview.is_empty() {
            output.push_str(&format!(
                "      {}\n",
                truncate_chars(&summary.preview.replace('\n', " "), 70)
            ));
        }
    }
    output.push_str("\nLoad with: /load <id>");
    output
}

/// Full transcript of a saved conversation
pub fn show_text(conversation: &Conversation) -> String {
    let mut output = format!(
        "{} ({})\nCreated {}, updated {}",
        conversation.name,
        conversation.id,
        format_time(&conversation.created_at),
        format_time(&conversation.updated_at)
    );
    if let Some(model) = &conversation.model {
        output.push_str(&format!("\nModel: {}", model));
    }
    output.push_str(&format!(
        "\nContext: {} tokens\n",
        conversation.context.len()
    ));

    for message in &conversation.messages {
        output.push_str(&format!("\n[{}]\n{}\n", message.role, message.content));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mate_ai::ChatMessage;

    fn saved(store: &ConversationStore, id: &str) -> Conversation {
        let conversation = Conversation {
            id: id.to_string(),
            name: "Borrow checker".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages: vec![
                ChatMessage::user("why does this not compile"),
                ChatMessage::assistant("you moved the value"),
            ],
            context: vec![1, 2, 3],
            model: Some("mistral".to_string()),
            last_context_size: Some(3),
        };
        store.save(&conversation).unwrap();
        conversation
    }

    #[test]
    fn test_list_and_show() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let conversation = saved(&store, "conv-1");

        let CommandResult::Message(listed) = ConversationCommand::list(&store) else {
            panic!("expected message");
        };
        assert!(listed.contains("conv-1  Borrow checker  (2 messages"));

        let shown = show_text(&conversation);
        assert!(shown.contains("Model: mistral"));
        assert!(shown.contains("Context: 3 tokens"));
        assert!(shown.contains("[assistant]\nyou moved the value"));
    }

    #[test]
    fn test_rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        saved(&store, "conv-1");

        assert!(matches!(
            ConversationCommand::rename("conv-1", &store),
            CommandResult::Message(m) if m.starts_with("Usage")
        ));
        ConversationCommand::rename("conv-1 Lifetimes 101", &store);
        assert_eq!(store.load("conv-1").unwrap().unwrap().name, "Lifetimes 101");

        assert!(matches!(
            ConversationCommand::delete("conv-1", &store),
            CommandResult::Message(m) if m == "Deleted conv-1"
        ));
        assert!(matches!(
            ConversationCommand::delete("conv-1", &store),
            CommandResult::Message(m) if m.starts_with("No conversation")
        ));
    }
}
