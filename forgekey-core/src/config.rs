//! Host configuration storage.
//!
//! The configuration holds one host and the username/token last used for it.
//! Resolution reads it, fills it in from the OS credential helper, and
//! persists credentials obtained through an interactive login.
//!
//! # Storage Location
//!
//! [`FileConfigStore`] keeps its data at `~/.config/forgekey/config.toml` on
//! Linux, the platform equivalent elsewhere, or at an explicit path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::model::{normalize_host, HostCredentials};
use crate::secret::Secret;

/// Host used when nothing has been configured.
pub const DEFAULT_HOST: &str = "github.com";

/// Error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading or writing the config file.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML.
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Configuration directory not available.
    #[error("configuration directory not available")]
    ConfigDirUnavailable,
}

/// Readable/writable host configuration.
///
/// `set_in_memory` only changes what [`current`](ConfigStore::current)
/// returns; `update` also persists.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Snapshot of the configured host credentials.
    fn current(&self) -> HostCredentials;

    /// Replace username and token without persisting.
    fn set_in_memory(&self, username: Option<String>, token: Option<Secret>);

    /// Replace username and token and persist them.
    async fn update(&self, username: Option<String>, token: Option<Secret>) -> Result<(), ConfigError>;
}

/// In-memory configuration for tests and ephemeral use.
#[derive(Debug)]
pub struct MemoryConfigStore {
    data: Mutex<HostCredentials>,
}

impl MemoryConfigStore {
    /// Create a store seeded with `credentials`.
    pub fn new(credentials: HostCredentials) -> Self {
        Self {
            data: Mutex::new(credentials),
        }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new(HostCredentials::new(DEFAULT_HOST))
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    fn current(&self) -> HostCredentials {
        self.data.lock().clone()
    }

    fn set_in_memory(&self, username: Option<String>, token: Option<Secret>) {
        let mut data = self.data.lock();
        data.username = username;
        data.token = token;
    }

    async fn update(&self, username: Option<String>, token: Option<Secret>) -> Result<(), ConfigError> {
        self.set_in_memory(username, token);
        Ok(())
    }
}

/// On-disk format of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Host the stored credentials belong to.
    #[serde(default = "default_host", deserialize_with = "deserialize_host")]
    pub host: String,

    /// Account name on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Token for the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Secret>,

    /// OAuth client ID used by the device login flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// When credentials were last persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn deserialize_host<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|host| normalize_host(&host))
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: None,
            token: None,
            client_id: None,
            updated_at: None,
        }
    }
}

/// TOML-file-backed configuration.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    data: Mutex<ConfigFile>,
}

impl FileConfigStore {
    /// Get the default path of the config file.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("dev", "forgekey", "forgekey")
            .ok_or(ConfigError::ConfigDirUnavailable)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load the config from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the config from a specific path.
    ///
    /// A missing file yields the defaults; nothing is written until the
    /// first save.
    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            debug!("no config at {:?}, using defaults", path);
            ConfigFile::default()
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the whole file contents.
    pub fn snapshot(&self) -> ConfigFile {
        self.data.lock().clone()
    }

    /// OAuth client ID for the device login flow, if configured.
    pub fn client_id(&self) -> Option<String> {
        self.data.lock().client_id.clone()
    }

    /// Point the config at a different host, dropping the old host's
    /// credentials, and persist.
    pub async fn set_host(&self, host: impl Into<String>) -> Result<(), ConfigError> {
        {
            let mut data = self.data.lock();
            data.host = normalize_host(&host.into());
            data.username = None;
            data.token = None;
        }
        self.save().await
    }

    async fn save(&self) -> Result<(), ConfigError> {
        let contents = {
            let data = self.data.lock();
            toml::to_string_pretty(&*data)?
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!("saved config to {:?}", self.path);
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    fn current(&self) -> HostCredentials {
        let data = self.data.lock();
        HostCredentials {
            host: data.host.clone(),
            username: data.username.clone(),
            token: data.token.clone(),
        }
    }

    fn set_in_memory(&self, username: Option<String>, token: Option<Secret>) {
        let mut data = self.data.lock();
        data.username = username;
        data.token = token;
    }

    /// Replace the credentials in memory, then write the file.
    ///
    /// The in-memory record is changed first and kept even when the write
    /// fails, so a failed save leaves memory ahead of the file on disk.
    async fn update(&self, username: Option<String>, token: Option<Secret>) -> Result<(), ConfigError> {
        {
            let mut data = self.data.lock();
            data.username = username;
            data.token = token;
            data.updated_at = Some(Utc::now());
        }
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (FileConfigStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");
        let store = FileConfigStore::load_from_path(path).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (store, _temp) = temp_store();

        let creds = store.current();
        assert_eq!(creds.host, DEFAULT_HOST);
        assert!(creds.username.is_none());
        assert!(!creds.has_token());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_update_persists_and_reloads() {
        let (store, _temp) = temp_store();

        store
            .update(Some("octocat".to_string()), Some(Secret::new("t1")))
            .await
            .unwrap();

        let reloaded = FileConfigStore::load_from_path(store.path()).unwrap();
        let creds = reloaded.current();
        assert_eq!(creds.username.as_deref(), Some("octocat"));
        assert_eq!(creds.token.unwrap().expose(), "t1");
        assert!(reloaded.snapshot().updated_at.is_some());
    }

    #[test]
    fn test_set_in_memory_does_not_persist() {
        let (store, _temp) = temp_store();

        store.set_in_memory(Some("u".to_string()), Some(Secret::new("p")));

        assert_eq!(store.current().username.as_deref(), Some("u"));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_set_host_clears_credentials() {
        let (store, _temp) = temp_store();
        store
            .update(Some("octocat".to_string()), Some(Secret::new("t1")))
            .await
            .unwrap();

        store.set_host("ghe.example.com").await.unwrap();

        let reloaded = FileConfigStore::load_from_path(store.path()).unwrap();
        let creds = reloaded.current();
        assert_eq!(creds.host, "ghe.example.com");
        assert!(creds.username.is_none());
        assert!(creds.token.is_none());
    }

    #[test]
    fn test_parse_error_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "host = [").unwrap();

        let err = FileConfigStore::load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_host_is_lowercased_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "host = \"GitHub.com\"\ntoken = \"t\"\n").unwrap();

        let store = FileConfigStore::load_from_path(&path).unwrap();
        assert_eq!(store.current().host, "github.com");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory_update() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = FileConfigStore::load_from_path(blocker.join("config.toml")).unwrap();

        let result = store
            .update(Some("u".to_string()), Some(Secret::new("t")))
            .await;

        assert!(matches!(result, Err(ConfigError::Io { .. })));
        assert_eq!(store.current().token.unwrap().expose(), "t");
    }

    #[test]
    fn test_client_id_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "host = \"github.com\"\nclient_id = \"Iv1.abc\"\n").unwrap();

        let store = FileConfigStore::load_from_path(&path).unwrap();
        assert_eq!(store.client_id().as_deref(), Some("Iv1.abc"));
    }

    #[tokio::test]
    async fn test_memory_store_update() {
        let store = MemoryConfigStore::default();
        store
            .update(Some("u".to_string()), Some(Secret::new("t")))
            .await
            .unwrap();
        assert!(store.current().has_token());
    }
}
