//! Configuration file support

use mate_agent::{ConversationStore, TomlSettingsFile};
use mate_ai::ClientConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for codemate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inference server URL
    pub url: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Context window requested from the server (`num_ctx`)
    pub context_size: Option<u32>,
    /// Custom system prompt
    pub system_prompt: Option<String>,
    /// Where saved conversations live
    pub chats_dir: Option<String>,
    /// Where rules and profiles live
    pub rules_file: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codemate")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CODEMATE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let defaults = ClientConfig::default();
        let default_config = Config {
            url: Some(defaults.base_url),
            model: Some(defaults.model),
            temperature: Some(defaults.temperature),
            context_size: Some(defaults.context_size),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Client settings from this file, with built-in defaults for anything unset
    pub fn client_config(&self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            base_url: self.url.clone().unwrap_or(defaults.base_url),
            model: self.model.clone().unwrap_or(defaults.model),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            context_size: self.context_size.unwrap_or(defaults.context_size),
            system_prompt: self.system_prompt.clone(),
        }
    }

    pub fn chats_dir(&self) -> PathBuf {
        self.chats_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(ConversationStore::default_dir)
    }

    pub fn rules_path(&self) -> PathBuf {
        self.rules_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(TomlSettingsFile::default_path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# codemate configuration file
# Place at ~/.config/codemate/config.toml (Linux) or set CODEMATE_CONFIG_PATH

# Ollama server URL
url = "http://localhost:11434"

# Default model to use
model = "mistral"

# Sampling temperature
temperature = 0.7

# Context window requested from the server
context_size = 4096

# Custom system prompt (optional)
# system_prompt = "You are a terse Rust reviewer."

# Storage locations (optional)
# chats_dir = "~/.local/share/codemate/chats"
# rules_file = "~/.config/codemate/post_processors.toml"
"#
}
