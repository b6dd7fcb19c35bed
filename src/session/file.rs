use anyhow::{Context, Result};
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::CredentialStore;
use crate::runtime::Runtime;

/// Session file name under the configuration directory.
pub const SESSION_FILE: &str = "session.json";

/// The session file holds bearer tokens: owner read/write only.
const SESSION_FILE_MODE: u32 = 0o600;

/// Credential store persisted as a flat JSON object on disk.
///
/// Every operation re-reads the file, so several processes sharing one file
/// see each other's writes. There is no locking between them.
pub struct FileStore<R: Runtime> {
    runtime: R,
    path: PathBuf,
}

impl<R: Runtime> FileStore<R> {
    pub fn new(runtime: R, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    /// Store at `<config_dir>/ictdesk/session.json`.
    pub fn in_config_dir(runtime: R) -> Result<Self> {
        let dir = runtime
            .config_dir()
            .or_else(|| runtime.home_dir().map(|h| h.join(".config")))
            .context("Could not determine a configuration directory")?;
        let path = dir.join("ictdesk").join(SESSION_FILE);
        Ok(Self::new(runtime, path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.runtime.exists(&self.path) {
            return Ok(BTreeMap::new());
        }
        let contents = self.runtime.read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse session file {}", self.path.display()))
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        self.runtime.write(&self.path, json.as_bytes())?;
        self.runtime.set_permissions(&self.path, SESSION_FILE_MODE)?;
        debug!("Saved session file {}", self.path.display());
        Ok(())
    }
}

impl<R: Runtime> CredentialStore for FileStore<R> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.load()?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        if entries.is_empty() {
            self.runtime.remove_file(&self.path)?;
            debug!("Removed empty session file {}", self.path.display());
            return Ok(());
        }
        self.save(&entries)
    }
}
