//! Streaming chunk types and utilities

use crate::error::{Error, Result};
use crate::types::ContextTokens;
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// One line of a streaming generate response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateChunk {
    /// Incremental text fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Replacement opaque context; the final chunk's value is authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextTokens>,
    #[serde(default)]
    pub done: bool,
    /// Tokens generated, reported on the final chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u32>,
    /// Server-side duration in nanoseconds, reported on the final chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    /// Error reported in-band by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerateChunk {
    /// Chunk carrying only a text fragment
    pub fn text(fragment: impl Into<String>) -> Self {
        Self {
            response: Some(fragment.into()),
            ..Default::default()
        }
    }

    /// Final chunk carrying the authoritative context
    pub fn done(context: ContextTokens) -> Self {
        Self {
            context: Some(context),
            done: true,
            ..Default::default()
        }
    }

    /// The text fragment, if non-empty
    pub fn fragment(&self) -> Option<&str> {
        self.response.as_deref().filter(|s| !s.is_empty())
    }
}

/// Longest line accepted before the body is treated as malformed
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// A stream of generate chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<GenerateChunk>> + Send>>;

/// Parse a newline-delimited JSON body into generate chunks.
///
/// Lines may be split across network reads; bytes are buffered until a full
/// line is available. Unparseable lines are skipped, except a trailing one:
/// a body cut off mid-line never delivered its final chunk. A transport
/// error, an in-band `error` field, or a line longer than [`MAX_LINE_BYTES`]
/// ends the stream with an `Err` item.
pub fn ndjson_chunks<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<GenerateChunk>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<Error> + Send,
{
    stream! {
        let mut buffer: Vec<u8> = Vec::new();
        tokio::pin!(byte_stream);

        while let Some(item) = byte_stream.next().await {
            let bytes = match item {
                Ok(b) => b,
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            };
            buffer.extend_from_slice(bytes.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    Some(Ok(chunk)) => yield Ok(chunk),
                    Some(Err(e)) => {
                        yield Err(e);
                        return;
                    }
                    None => {}
                }
            }

            if buffer.len() > MAX_LINE_BYTES {
                yield Err(Error::UnexpectedResponse(format!(
                    "stream line exceeds {} bytes",
                    MAX_LINE_BYTES
                )));
                return;
            }
        }

        // Trailing line without a newline terminator
        match parse_line(&buffer) {
            Some(Ok(chunk)) => yield Ok(chunk),
            Some(Err(e)) => yield Err(e),
            None if !buffer.iter().all(u8::is_ascii_whitespace) => {
                yield Err(Error::UnexpectedResponse(format!(
                    "stream ended mid-line after {} bytes",
                    buffer.len()
                )));
            }
            None => {}
        }
    }
}

fn parse_line(line: &[u8]) -> Option<Result<GenerateChunk>> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(text) {
        Ok(chunk) => match chunk.error {
            Some(message) => Some(Err(Error::UnexpectedResponse(message))),
            None => Some(Ok(chunk)),
        },
        Err(e) => {
            tracing::debug!("Skipping unparseable stream line ({}): {}", e, text);
            None
        }
    }
}

/// Accumulates text and context from a chunk stream
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    context: Option<ContextTokens>,
    chunk_count: u32,
    eval_count: Option<u32>,
}

impl ResponseAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk in, returning the text delta it carried
    pub fn process<'a>(&mut self, chunk: &'a GenerateChunk) -> Option<&'a str> {
        if let Some(ref context) = chunk.context {
            self.context = Some(context.clone());
        }
        if chunk.eval_count.is_some() {
            self.eval_count = chunk.eval_count;
        }
        let delta = chunk.fragment()?;
        self.text.push_str(delta);
        self.chunk_count += 1;
        Some(delta)
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of chunks that carried text
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Token count reported by the server, if any
    pub fn eval_count(&self) -> Option<u32> {
        self.eval_count
    }

    /// Consume into `(text, context)`
    pub fn into_parts(self) -> (String, Option<ContextTokens>) {
        (self.text, self.context)
    }
}
