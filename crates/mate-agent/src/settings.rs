//! Storage backends for the rule and profile configuration

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::rules::Rule;

/// Everything the rule store persists, written and read as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_profile_id: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// Where pipeline settings live
pub trait SettingsBackend: Send + Sync {
    /// Read the full snapshot; a missing store yields the default snapshot
    fn load(&self) -> Result<PipelineSettings>;

    /// Replace the stored snapshot
    fn save(&self, settings: &PipelineSettings) -> Result<()>;
}

/// Settings kept in a TOML file
pub struct TomlSettingsFile {
    path: PathBuf,
}

impl TomlSettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/codemate/post_processors.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codemate")
            .join("post_processors.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsBackend for TomlSettingsFile {
    fn load(&self) -> Result<PipelineSettings> {
        if !self.path.exists() {
            return Ok(PipelineSettings::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(PipelineSettings::default());
        }
        Ok(toml::from_str(&content)?)
    }

    fn save(&self, settings: &PipelineSettings) -> Result<()> {
        let content = toml::to_string_pretty(settings)?;
        write_atomic(&self.path, content.as_bytes())
    }
}

/// Write `contents` to a uniquely named sibling temp file, then rename it over `path`
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Persistence(format!("{} has no parent directory", path.display())))?;
    let dir = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        fs::create_dir_all(parent)?;
        parent
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// In-process settings, mostly for tests
#[derive(Default)]
pub struct MemorySettings {
    settings: Mutex<PipelineSettings>,
    fail_writes: AtomicBool,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `save` fail until turned off again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// What was last saved
    pub fn snapshot(&self) -> PipelineSettings {
        self.settings.lock().clone()
    }
}

impl SettingsBackend for MemorySettings {
    fn load(&self) -> Result<PipelineSettings> {
        Ok(self.settings.lock().clone())
    }

    fn save(&self, settings: &PipelineSettings) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("settings backend rejected the write".into()));
        }
        *self.settings.lock() = settings.clone();
        Ok(())
    }
}

impl<T: SettingsBackend + ?Sized> SettingsBackend for std::sync::Arc<T> {
    fn load(&self) -> Result<PipelineSettings> {
        (**self).load()
    }

    fn save(&self, settings: &PipelineSettings) -> Result<()> {
        (**self).save(settings)
    }
}
