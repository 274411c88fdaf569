//! /fork command - continue from an earlier point in the conversation

use super::CommandResult;
use mate_ai::ChatMessage;

pub struct ForkCommand;

impl ForkCommand {
    /// Execute /fork command
    /// - No args: list messages with their indices
    /// - With index: fork from that message index
    pub fn execute(args: &str, messages: &[ChatMessage]) -> CommandResult {
        let message_count = messages.len();
        if message_count == 0 {
            return CommandResult::Message(
                "No messages to fork from. Start a conversation first.".to_string(),
            );
        }

        if args.is_empty() {
            return CommandResult::Message(Self::list_messages_text(messages));
        }

        match args.parse::<usize>() {
            Ok(index) if index < message_count => CommandResult::ForkFrom(index),
            Ok(index) => CommandResult::Message(format!(
                "Invalid index {}. Valid range: 0-{}",
                index,
                message_count - 1
            )),
            Err(_) => CommandResult::Message(format!(
                "Invalid index '{}'. Use a number (0-{}).",
                args,
                message_count - 1
            )),
        }
    }

    fn list_messages_text(messages: &[ChatMessage]) -> String {
        let mut output = String::from("Messages in conversation:\n");
        for (i, message) in messages.iter().enumerate() {
            let preview = crate::utils::truncate_chars(&message.content.replace('\n', " "), 60);
            output.push_str(&format!("  {}: [{}] {}\n", i, message.role, preview));
        }
        output.push_str("\nUse /fork <index> to continue from that message.");
        output
    }
}
