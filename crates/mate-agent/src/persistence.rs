//! Saved conversations, one JSON file per conversation

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use mate_ai::{ChatMessage, ContextTokens};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::settings::write_atomic;

/// Characters of the last message shown in a listing
const PREVIEW_CHARS: usize = 100;

/// A saved conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    /// Opaque server context at save time
    pub context: ContextTokens,
    pub model: Option<String>,
    pub last_context_size: Option<usize>,
}

/// Listing entry for a saved conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub preview: String,
    pub context_size: usize,
    pub last_context_size: Option<usize>,
}

/// On-disk layout of a conversation file
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRecord {
    id: String,
    name: String,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    /// gzip-compressed JSON array, base64 encoded
    #[serde(
        default,
        alias = "ollamaContextCompressed",
        skip_serializing_if = "Option::is_none"
    )]
    context_compressed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context_size: Option<usize>,
    /// Uncompressed array from records that predate compression
    #[serde(
        default,
        rename = "ollamaContext",
        skip_serializing_if = "Option::is_none"
    )]
    legacy_context: Option<ContextTokens>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_context_size: Option<usize>,
}

impl ConversationRecord {
    fn encode(conversation: &Conversation) -> Result<Self> {
        Ok(Self {
            id: conversation.id.clone(),
            name: conversation.name.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            messages: conversation.messages.clone(),
            context_compressed: Some(compress_context(&conversation.context)?),
            context_size: Some(conversation.context.len()),
            legacy_context: None,
            model: conversation.model.clone(),
            last_context_size: conversation.last_context_size,
        })
    }

    fn decode(self) -> Conversation {
        // An empty blob means an empty context
        let blob = self.context_compressed.as_deref().filter(|b| !b.trim().is_empty());
        let context = match (blob, self.legacy_context) {
            (Some(blob), _) => decompress_context(blob).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable context for {}: {}", self.id, e);
                Vec::new()
            }),
            (None, Some(legacy)) => legacy,
            (None, None) => Vec::new(),
        };

        Conversation {
            id: self.id,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
            messages: self.messages,
            context,
            model: self.model,
            last_context_size: self.last_context_size,
        }
    }

    fn summary(&self) -> ConversationSummary {
        let preview = match self.messages.last() {
            None => "(empty)".to_string(),
            Some(last) => {
                let mut preview: String = last.content.chars().take(PREVIEW_CHARS).collect();
                if last.content.chars().count() > PREVIEW_CHARS {
                    preview.push_str("...");
                }
                preview
            }
        };

        let context_size = self
            .context_size
            .or_else(|| self.legacy_context.as_ref().map(Vec::len))
            .or(self.last_context_size)
            .unwrap_or(0);

        ConversationSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len(),
            preview,
            context_size,
            last_context_size: self.last_context_size,
        }
    }
}

/// Timestamps are written as epoch milliseconds and read from either
/// milliseconds or an RFC 3339 string
mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        chrono::serde::ts_milliseconds::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", ms))),
            Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| D::Error::custom(format!("invalid timestamp {:?}: {}", text, e))),
        }
    }
}

fn compress_context(context: &[i64]) -> Result<String> {
    let json = serde_json::to_vec(context)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let bytes = encoder.finish()?;
    Ok(BASE64.encode(bytes))
}

fn decompress_context(blob: &str) -> Result<ContextTokens> {
    let bytes = BASE64
        .decode(blob.trim())
        .map_err(|e| Error::Persistence(format!("invalid base64: {}", e)))?;
    let mut json = Vec::new();
    GzDecoder::new(bytes.as_slice()).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Directory of saved conversations
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_local_dir>/codemate/chats`
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codemate")
            .join("chats")
    }

    /// Directory the conversations are written to
    pub fn storage_path(&self) -> &Path {
        &self.dir
    }

    /// New conversation id: `conv-<millis>-<8 hex>`
    pub fn generate_id() -> String {
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("conv-{}-{}", Utc::now().timestamp_millis(), &random[..8])
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(Error::Validation(format!("invalid conversation id: {}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    fn read_record(path: &Path) -> Result<ConversationRecord> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write a conversation, replacing any previous save with the same id
    pub fn save(&self, conversation: &Conversation) -> Result<()> {
        let path = self.record_path(&conversation.id)?;
        let record = ConversationRecord::encode(conversation)?;
        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic(&path, &json)?;
        tracing::debug!(
            "Saved conversation {} ({} messages) to {}",
            conversation.id,
            conversation.messages.len(),
            path.display()
        );
        Ok(())
    }

    /// Load a conversation; `None` if it does not exist
    pub fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Self::read_record(&path)?.decode()))
    }

    /// Summaries of all saved conversations, most recently updated first
    pub fn list(&self) -> Result<Vec<ConversationSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Delete a conversation; returns whether it existed
    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.record_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename a conversation; returns whether it existed
    pub fn rename(&self, id: &str, name: &str) -> Result<bool> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Ok(false);
        }
        let mut record = Self::read_record(&path)?;
        record.name = name.to_string();
        record.updated_at = Utc::now();
        write_atomic(&path, &serde_json::to_vec_pretty(&record)?)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conversation(id: &str, updated_at: DateTime<Utc>, messages: Vec<ChatMessage>) -> Conversation {
        Conversation {
            id: id.into(),
            name: format!("Chat {}", id),
            created_at: updated_at,
            updated_at,
            messages,
            context: vec![101, 202, 303, -4],
            model: Some("mistral".into()),
            last_context_size: Some(4),
        }
    }

    /// Millisecond precision is what survives a save
    fn now_ms() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let original = conversation("conv-1", now_ms(), vec![ChatMessage::user("hi")]);

        store.save(&original).unwrap();
        assert_eq!(store.load("conv-1").unwrap(), Some(original));
        assert_eq!(store.load("conv-missing").unwrap(), None);
    }

    #[test]
    fn test_record_uses_compressed_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store
            .save(&conversation("conv-1", now_ms(), vec![]))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("conv-1.json")).unwrap())
                .unwrap();
        assert!(raw["contextCompressed"].is_string());
        assert_eq!(raw["contextSize"], 4);
        assert!(raw.get("ollamaContext").is_none());
    }

    #[test]
    fn test_uncompressed_record_with_iso_timestamps_loads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("conv-old.json"),
            r#"{"id":"conv-old","name":"Old","createdAt":"2024-05-01T10:00:00.000Z",
               "updatedAt":"2024-05-01T10:30:00.000Z",
               "messages":[{"role":"user","content":"hello","tokenCount":3}],
               "ollamaContext":[1,2,3],"model":"mistral"}"#,
        )
        .unwrap();

        let store = ConversationStore::new(dir.path());
        let loaded = store.load("conv-old").unwrap().unwrap();
        assert_eq!(loaded.context, vec![1, 2, 3]);
        assert_eq!(loaded.created_at.timestamp_millis(), 1_714_557_600_000);
        assert_eq!(loaded.messages[0].token_count, Some(3));

        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].context_size, 3);
        assert_eq!(list[0].updated_at.timestamp_millis(), 1_714_559_400_000);
    }

    #[test]
    fn test_compressed_record_with_iso_timestamps_loads() {
        let dir = tempfile::tempdir().unwrap();
        let blob = compress_context(&[7, 8, 9, 10]).unwrap();
        let record = serde_json::json!({
            "id": "conv-gz",
            "name": "Gz",
            "createdAt": "2024-05-01T10:00:00+02:00",
            "updatedAt": "2024-05-01T10:00:00+02:00",
            "messages": [],
            "ollamaContextCompressed": blob,
            "contextSize": 4,
            "lastContextSize": 2
        });
        fs::write(dir.path().join("conv-gz.json"), record.to_string()).unwrap();

        let store = ConversationStore::new(dir.path());
        let loaded = store.load("conv-gz").unwrap().unwrap();
        assert_eq!(loaded.context, vec![7, 8, 9, 10]);
        assert_eq!(loaded.created_at.timestamp_millis(), 1_714_550_400_000);
        assert_eq!(loaded.last_context_size, Some(2));

        // Re-saving keeps the data and writes millisecond timestamps
        store.save(&loaded).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("conv-gz.json")).unwrap())
                .unwrap();
        assert_eq!(raw["createdAt"], 1_714_550_400_000_i64);
        assert_eq!(store.load("conv-gz").unwrap().unwrap(), loaded);
    }

    #[test]
    fn test_empty_compressed_context_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("conv-empty.json"),
            r#"{"id":"conv-empty","name":"Empty","createdAt":"2024-05-01T10:00:00.000Z",
               "updatedAt":"2024-05-01T10:00:00.000Z","messages":[],
               "ollamaContextCompressed":"","contextSize":0}"#,
        )
        .unwrap();

        let store = ConversationStore::new(dir.path());
        assert!(store.load("conv-empty").unwrap().unwrap().context.is_empty());
    }

    #[test]
    fn test_bad_timestamp_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("conv-t.json"),
            r#"{"id":"conv-t","name":"T","createdAt":"yesterday","updatedAt":0,"messages":[]}"#,
        )
        .unwrap();
        let store = ConversationStore::new(dir.path());
        assert!(matches!(store.load("conv-t"), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_corrupt_context_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("conv-bad.json"),
            r#"{"id":"conv-bad","name":"Bad","createdAt":0,"updatedAt":0,
               "messages":[],"contextCompressed":"not-gzip!!","contextSize":9}"#,
        )
        .unwrap();

        let store = ConversationStore::new(dir.path());
        let loaded = store.load("conv-bad").unwrap().unwrap();
        assert!(loaded.context.is_empty());
        assert_eq!(store.list().unwrap()[0].context_size, 9);
    }

    #[test]
    fn test_unparseable_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("conv-x.json"), "{ nope").unwrap();
        let store = ConversationStore::new(dir.path());
        assert!(matches!(store.load("conv-x"), Err(Error::Persistence(_))));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_sorted_with_previews() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let now = now_ms();

        store
            .save(&conversation("conv-a", now - Duration::hours(2), vec![]))
            .unwrap();
        store
            .save(&conversation(
                "conv-b",
                now,
                vec![ChatMessage::user("q"), ChatMessage::assistant("y".repeat(120))],
            ))
            .unwrap();
        store
            .save(&conversation(
                "conv-c",
                now - Duration::hours(1),
                vec![ChatMessage::assistant("short")],
            ))
            .unwrap();

        let list = store.list().unwrap();
        let ids: Vec<_> = list.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["conv-b", "conv-c", "conv-a"]);

        assert_eq!(list[0].preview, format!("{}...", "y".repeat(100)));
        assert_eq!(list[0].message_count, 2);
        assert_eq!(list[1].preview, "short");
        assert_eq!(list[2].preview, "(empty)");
        assert_eq!(list[2].context_size, 4);
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store
            .save(&conversation("conv-1", now_ms(), vec![]))
            .unwrap();

        assert!(store.delete("conv-1").unwrap());
        assert!(!store.delete("conv-1").unwrap());
        assert!(store.load("conv-1").unwrap().is_none());
    }

    #[test]
    fn test_rename() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let saved = conversation("conv-1", now_ms() - Duration::minutes(5), vec![]);
        store.save(&saved).unwrap();

        assert!(store.rename("conv-1", "Lifetimes").unwrap());
        let loaded = store.load("conv-1").unwrap().unwrap();
        assert_eq!(loaded.name, "Lifetimes");
        assert!(loaded.updated_at > saved.updated_at);
        assert_eq!(loaded.context, saved.context);

        assert!(!store.rename("conv-404", "x").unwrap());
    }

    #[test]
    fn test_ids() {
        let id = ConversationStore::generate_id();
        assert!(id.starts_with("conv-"));
        assert_eq!(id.rsplit('-').next().unwrap().len(), 8);

        let store = ConversationStore::new("/tmp/unused");
        assert!(matches!(store.load("../etc/passwd"), Err(Error::Validation(_))));
    }
}
