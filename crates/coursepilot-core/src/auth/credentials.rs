//! Durable storage for the access credential and the cached user profile.
//!
//! Every operation is synchronous and total: storage failures are logged and
//! swallowed, so callers never have to handle a half-failed logout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::UserProfile;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
const SERVICE_NAME: &str = "coursepilot";

const TOKEN_ACCOUNT: &str = "access_token";
const PROFILE_ACCOUNT: &str = "user_profile";

/// Opaque bearer token. Always non-empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for empty or whitespace-only input. Anything else is
    /// kept byte for byte.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

/// Durable key/value persistence of one credential and an optional profile cache.
///
/// The cached profile is a display fallback only; it is never trusted for
/// authorization until a profile fetch confirms it.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<Credential>;

    /// Store a credential. Empty or whitespace-only values clear the store.
    fn set(&self, value: &str);

    fn clear(&self);

    fn cached_profile(&self) -> Option<UserProfile>;

    fn set_cached_profile(&self, profile: Option<&UserProfile>);
}

// ============================================================================
// File backend
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<UserProfile>,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
}

/// JSON file in the cache directory, replaced atomically on every write.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
    // Serializes read-modify-write cycles on the session file.
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn read(&self) -> StoredSession {
        let path = self.path();
        if !path.exists() {
            return StoredSession::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Failed to parse session file, ignoring it");
                    StoredSession::default()
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to read session file");
                StoredSession::default()
            }
        }
    }

    fn write(&self, stored: &StoredSession) {
        let path = self.path();
        if stored.token.is_none() && stored.user.is_none() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(error = %e, "Failed to remove session file");
                }
            }
            return;
        }
        if let Err(e) = write_atomic(&path, stored) {
            warn!(error = %e, "Failed to save session file");
        }
    }

    fn update(&self, f: impl FnOnce(&mut StoredSession)) {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = self.read();
        f(&mut stored);
        stored.saved_at = Some(Utc::now());
        self.write(&stored);
    }
}

fn write_atomic(path: &Path, stored: &StoredSession) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(stored)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<Credential> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read().token.and_then(Credential::new)
    }

    fn set(&self, value: &str) {
        match Credential::new(value) {
            Some(credential) => self.update(|s| s.token = Some(credential.0)),
            None => self.clear(),
        }
    }

    fn clear(&self) {
        debug!("Clearing stored credential");
        self.update(|s| s.token = None);
    }

    fn cached_profile(&self) -> Option<UserProfile> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read().user
    }

    fn set_cached_profile(&self, profile: Option<&UserProfile>) {
        self.update(|s| s.user = profile.cloned());
    }
}

// ============================================================================
// Keyring backend
// ============================================================================

/// OS keychain backend. The profile cache is stored as JSON in a second entry.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, account: &str) -> Option<Entry> {
        match Entry::new(&self.service, account) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, account, "Failed to create keyring entry");
                None
            }
        }
    }

    fn read(&self, account: &str) -> Option<String> {
        let entry = self.entry(account)?;
        match entry.get_password() {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, account, "Failed to read from keychain");
                None
            }
        }
    }

    fn write(&self, account: &str, value: &str) {
        if let Some(entry) = self.entry(account) {
            if let Err(e) = entry.set_password(value) {
                warn!(error = %e, account, "Failed to store value in keychain");
            }
        }
    }

    fn delete(&self, account: &str) {
        if let Some(entry) = self.entry(account) {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => warn!(error = %e, account, "Failed to delete keychain entry"),
            }
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.read(TOKEN_ACCOUNT).and_then(Credential::new)
    }

    fn set(&self, value: &str) {
        match Credential::new(value) {
            Some(credential) => self.write(TOKEN_ACCOUNT, credential.as_str()),
            None => self.clear(),
        }
    }

    fn clear(&self) {
        self.delete(TOKEN_ACCOUNT);
    }

    fn cached_profile(&self) -> Option<UserProfile> {
        let raw = self.read(PROFILE_ACCOUNT)?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached profile");
                None
            }
        }
    }

    fn set_cached_profile(&self, profile: Option<&UserProfile>) {
        match profile.map(serde_json::to_string) {
            Some(Ok(json)) => self.write(PROFILE_ACCOUNT, &json),
            Some(Err(e)) => warn!(error = %e, "Failed to serialize profile for keychain"),
            None => self.delete(PROFILE_ACCOUNT),
        }
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredSession>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a credential already persisted, as after a previous run.
    pub fn with_credential(value: &str) -> Self {
        let store = Self::new();
        store.set(value);
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.token.clone().and_then(Credential::new)
    }

    fn set(&self, value: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.token = Credential::new(value).map(|c| c.0);
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.token = None;
    }

    fn cached_profile(&self) -> Option<UserProfile> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.user.clone()
    }

    fn set_cached_profile(&self, profile: Option<&UserProfile>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.user = profile.cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use tempfile::TempDir;

    fn profile() -> UserProfile {
        UserProfile {
            id: 1,
            name: "Ada".to_string(),
            email: "ada@example.edu".to_string(),
            role: Role::Teacher,
        }
    }

    #[test]
    fn test_credential_rejects_blank() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new("   ").is_none());
        assert_eq!(Credential::new(" tok ").map(|c| c.0), Some(" tok ".to_string()));
        assert_eq!(Credential::new("a.b-c_d=").map(|c| c.0), Some("a.b-c_d=".to_string()));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("secret-token").expect("non-empty");
        let shown = format!("{:?}", credential);
        assert!(!shown.contains("secret-token"));
    }

    #[test]
    fn test_memory_store_set_get_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().is_none());

        store.set("tok123");
        assert_eq!(store.get().map(|c| c.as_str().to_string()), Some("tok123".to_string()));

        store.clear();
        assert!(store.get().is_none());
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_memory_store_empty_set_clears() {
        let store = MemoryCredentialStore::with_credential("tok123");
        store.set("");
        assert!(store.get().is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileCredentialStore::new(dir.path().to_path_buf());

        store.set("tok123");
        store.set_cached_profile(Some(&profile()));

        let reopened = FileCredentialStore::new(dir.path().to_path_buf());
        assert_eq!(reopened.get().map(|c| c.as_str().to_string()), Some("tok123".to_string()));
        assert_eq!(reopened.cached_profile(), Some(profile()));
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileCredentialStore::new(dir.path().to_path_buf());

        store.set("tok123");
        assert!(store.path().exists());

        store.clear();
        store.set_cached_profile(None);
        assert!(!store.path().exists());
        assert!(store.get().is_none());

        // Idempotent
        store.clear();
        assert!(store.get().is_none());
    }

    #[test]
    fn test_file_store_whitespace_set_clears() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileCredentialStore::new(dir.path().to_path_buf());

        store.set("tok123");
        store.set("  ");
        assert!(store.get().is_none());
    }

    #[test]
    fn test_file_store_ignores_corrupt_file() {
        let dir = TempDir::new().expect("temp dir");
        let store = FileCredentialStore::new(dir.path().to_path_buf());
        std::fs::write(store.path(), "{not json").expect("write corrupt file");

        assert!(store.get().is_none());
        assert!(store.cached_profile().is_none());

        store.set("fresh");
        assert_eq!(store.get().map(|c| c.as_str().to_string()), Some("fresh".to_string()));
    }
}
