//! Conversation compression
//!
//! A conversation is summarized by the model and replaced with a single
//! system message carrying the summary. The summarizing request starts from an
//! empty context, and the context it returns becomes the new context.

use chrono::Utc;
use mate_ai::{ChatMessage, ClientConfig, ContextTokens, InferenceProvider, ResponseAccumulator};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::persistence::{Conversation, ConversationStore};
use crate::session::{StreamEnd, consume_stream, open_stream};

/// Characters of each message included in the summarization prompt
pub const PREVIEW_CHARS: usize = 100;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a conversation summarizer. Create a brief, \
     concise summary of the conversation in 2-3 sentences.";

/// Shown while a compression is running
pub const COMPRESSING_NOTICE: &str = "📦 Compressing conversation history...";

/// A finished summary and the context the server returned with it
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub context: ContextTokens,
}

/// Build the summarization prompt from role-tagged message previews
pub fn build_summary_prompt(messages: &[ChatMessage]) -> String {
    let transcript = messages
        .iter()
        .map(|m| {
            let preview: String = m.content.chars().take(PREVIEW_CHARS).collect();
            format!("{}: {}...", m.role.label(), preview)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Summarize this conversation concisely in 2-3 sentences:\n\n{}",
        transcript
    )
}

/// The message that replaces a compressed history
pub fn compressed_message(summary: &str) -> ChatMessage {
    ChatMessage::system(format!("[Compressed: {}]", summary))
}

/// Ask the model to summarize `messages`.
///
/// Fails with [`mate_ai::Error::Aborted`] if `cancel` fires first.
pub async fn summarize(
    provider: &dyn InferenceProvider,
    config: &ClientConfig,
    messages: &[ChatMessage],
    cancel: &CancellationToken,
) -> mate_ai::Result<Summary> {
    let request = config
        .request(build_summary_prompt(messages))
        .with_system(SUMMARY_SYSTEM_PROMPT);
    tracing::debug!("Summarizing {} messages", messages.len());

    let mut acc = ResponseAccumulator::new();
    let end = match open_stream(provider, request, cancel).await {
        Ok(stream) => consume_stream(stream, cancel, &mut acc, |_, _| {}).await,
        Err(end) => end,
    };

    match end {
        StreamEnd::Completed => {}
        StreamEnd::Aborted => return Err(mate_ai::Error::Aborted),
        StreamEnd::Failed(e) => return Err(e),
    }

    let (text, context) = acc.into_parts();
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(mate_ai::Error::UnexpectedResponse(
            "summarizer returned an empty response".into(),
        ));
    }

    Ok(Summary {
        text,
        context: context.unwrap_or_default(),
    })
}

/// Compress a saved conversation in place and write it back
pub async fn compress_conversation(
    store: &ConversationStore,
    provider: &dyn InferenceProvider,
    config: &ClientConfig,
    id: &str,
) -> Result<Conversation> {
    let mut conversation = store
        .load(id)?
        .ok_or_else(|| Error::not_found("Conversation", id))?;
    if conversation.messages.is_empty() {
        return Err(Error::EmptyHistory);
    }

    let summary = summarize(
        provider,
        config,
        &conversation.messages,
        &CancellationToken::new(),
    )
    .await?;

    let before = conversation.messages.len();
    conversation.messages = vec![compressed_message(&summary.text)];
    conversation.last_context_size = Some(summary.context.len());
    conversation.context = summary.context;
    conversation.updated_at = Utc::now();
    store.save(&conversation)?;

    tracing::info!(
        "Compressed conversation {} ({} messages -> 1)",
        conversation.id,
        before
    );
    Ok(conversation)
}
