//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, request timeout, where the credential is
//! kept, and the last email used to log in.
//!
//! Configuration is stored at `~/.config/coursepilot/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::auth::{CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "coursepilot";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Title appended to every window title
const DEFAULT_APP_TITLE: &str = "CoursePilot";

/// Where the access credential is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// `session.json` in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Not persisted; lost when the process exits
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub credential_backend: CredentialBackend,
    pub app_title: String,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            credential_backend: CredentialBackend::default(),
            app_title: DEFAULT_APP_TITLE.to_string(),
            last_email: None,
        }
    }
}

/// Environment variable overriding `api_base_url`
pub const ENV_API_BASE: &str = "COURSEPILOT_API_BASE";

/// Environment variable supplying the login email
pub const ENV_EMAIL: &str = "COURSEPILOT_EMAIL";

impl Config {
    /// Location of the config file under the user's config directory.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Read `path`, or return defaults when it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read config file {}", path.display())),
        }
    }

    /// Write the config to `path`, replacing any previous file in one step.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Apply `COURSEPILOT_*` overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base) = lookup(ENV_API_BASE).filter(|v| !v.trim().is_empty()) {
            debug!(api_base_url = %base, "API base overridden from environment");
            self.api_base_url = Some(base);
        }
        self
    }

    /// Email to prefill at login: the environment first, then the last one used.
    pub fn login_email(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        lookup(ENV_EMAIL)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.last_email.clone())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_API_BASE_URL)
    }

    /// Build the credential store selected by `credential_backend`.
    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.credential_backend {
            CredentialBackend::File => Arc::new(FileCredentialStore::new(self.cache_dir()?)),
            CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new()),
            CredentialBackend::Memory => Arc::new(MemoryCredentialStore::new()),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.credential_backend, CredentialBackend::File);
        assert_eq!(config.app_title, "CoursePilot");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"api_base_url": "https://school.example/api", "credential_backend": "keyring"}"#,
        )
        .expect("partial config parses");
        assert_eq!(config.api_base_url(), "https://school.example/api");
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert!(config.last_email.is_none());
    }

    #[test]
    fn test_blank_base_url_uses_default() {
        let config = Config {
            api_base_url: Some("  ".to_string()),
            ..Config::default()
        };
        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let config = Config::load_from(&dir.path().join("config.json")).expect("defaults");
        assert_eq!(config.app_title, "CoursePilot");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            last_email: Some("ada@example.edu".to_string()),
            credential_backend: CredentialBackend::Memory,
            ..Config::default()
        };

        config.save_to(&path).expect("config saves");
        let loaded = Config::load_from(&path).expect("config loads");
        assert_eq!(loaded.last_email.as_deref(), Some("ada@example.edu"));
        assert_eq!(loaded.credential_backend, CredentialBackend::Memory);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").expect("write corrupt file");
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env = |key: &str| match key {
            ENV_API_BASE => Some("https://school.example/api".to_string()),
            ENV_EMAIL => Some("env@example.edu".to_string()),
            _ => None,
        };
        let config = Config {
            last_email: Some("last@example.edu".to_string()),
            ..Config::default()
        }
        .with_env_overrides(env);

        assert_eq!(config.api_base_url(), "https://school.example/api");
        assert_eq!(config.login_email(env).as_deref(), Some("env@example.edu"));
        assert_eq!(config.login_email(|_| None).as_deref(), Some("last@example.edu"));

        let untouched = Config::default().with_env_overrides(|_| Some("  ".to_string()));
        assert_eq!(untouched.api_base_url(), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_memory_backend_store() {
        let config = Config {
            credential_backend: CredentialBackend::Memory,
            ..Config::default()
        };
        let store = config.credential_store().expect("memory store builds");
        store.set("tok");
        assert!(store.get().is_some());
    }
}
