use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::credentials::{Credential, CredentialStore};
use crate::models::{Role, UserProfile};

/// Capacity of the session event channel.
/// Events are rare (login, logout, expiry) so a small buffer is plenty.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Why a session was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// Explicit logout
    LoggedOut,
    /// An authenticated request came back unauthorized
    Expired,
    /// The profile fetch for a stored credential failed
    VerificationFailed,
}

/// Session transitions observed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established { user_id: i64, role: Role },
    Verified { user_id: i64, role: Role },
    Cleared(ClearReason),
}

/// Point-in-time view of the session used for navigation decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub profile: Option<UserProfile>,
    pub verified: bool,
}

impl SessionSnapshot {
    /// The profile, only if a server response has confirmed it.
    pub fn verified_profile(&self) -> Option<&UserProfile> {
        if self.verified {
            self.profile.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct SessionData {
    credential: Option<Credential>,
    profile: Option<UserProfile>,
    verified: bool,
    /// Bumped on every establish/clear so late results can detect they are stale.
    epoch: u64,
    /// False until the durable store has been loaded into memory.
    initialized: bool,
}

/// In-memory session state, mirrored to the credential store on every mutation.
///
/// Mutations happen with the write lock held, including the store write, so
/// readers never observe memory and storage disagreeing.
pub struct Session {
    store: Arc<dyn CredentialStore>,
    data: RwLock<SessionData>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            data: RwLock::new(SessionData::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionData> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionData> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Load the stored credential and cached profile into memory.
    ///
    /// The cached profile comes back unverified. Returns true if a credential
    /// was found.
    pub fn restore(&self) -> bool {
        let mut data = self.write();
        self.load_locked(&mut data);
        data.epoch += 1;
        debug!(
            has_credential = data.credential.is_some(),
            has_cached_profile = data.profile.is_some(),
            "Session restored from store"
        );
        data.credential.is_some()
    }

    fn load_locked(&self, data: &mut SessionData) {
        data.credential = self.store.get();
        data.profile = if data.credential.is_some() {
            self.store.cached_profile()
        } else {
            None
        };
        data.verified = false;
        data.initialized = true;
    }

    /// Write guard over state that reflects the store.
    ///
    /// A session used before `restore` is loaded here without bumping the
    /// epoch, so a verification started against the stored credential still
    /// applies.
    fn write_loaded(&self) -> RwLockWriteGuard<'_, SessionData> {
        let mut data = self.write();
        if !data.initialized {
            self.load_locked(&mut data);
        }
        data
    }

    /// Current credential. Falls back to the store until `restore` has run.
    pub fn token(&self) -> Option<Credential> {
        let data = self.read();
        if data.initialized {
            data.credential.clone()
        } else {
            self.store.get()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let data = self.read();
        if data.initialized {
            SessionSnapshot {
                authenticated: data.credential.is_some(),
                profile: data.profile.clone(),
                verified: data.verified,
            }
        } else {
            SessionSnapshot {
                authenticated: self.store.get().is_some(),
                profile: None,
                verified: false,
            }
        }
    }

    /// Install a freshly issued credential and its verified profile.
    pub(crate) fn establish(&self, credential: Credential, profile: UserProfile) {
        let event = SessionEvent::Established {
            user_id: profile.id,
            role: profile.role,
        };
        {
            let mut data = self.write();
            self.store.set(credential.as_str());
            self.store.set_cached_profile(Some(&profile));
            data.credential = Some(credential);
            data.profile = Some(profile);
            data.verified = true;
            data.epoch += 1;
            data.initialized = true;
        }
        info!("Session established");
        self.emit(event);
    }

    /// Record a verified profile, unless the session changed since `epoch`.
    pub(crate) fn apply_verified(&self, epoch: u64, profile: UserProfile) -> bool {
        let event = SessionEvent::Verified {
            user_id: profile.id,
            role: profile.role,
        };
        {
            let mut data = self.write_loaded();
            if data.epoch != epoch || data.credential.is_none() {
                debug!("Discarding stale profile verification");
                return false;
            }
            self.store.set_cached_profile(Some(&profile));
            data.profile = Some(profile);
            data.verified = true;
        }
        self.emit(event);
        true
    }

    /// Clear credential then profile, in memory and in the store.
    ///
    /// Returns true if there was anything to clear. Idempotent.
    pub(crate) fn clear(&self, reason: ClearReason) -> bool {
        let mut data = self.write_loaded();
        self.clear_locked(&mut data, reason)
    }

    /// Clear only if nothing replaced the session since `epoch`.
    pub(crate) fn clear_if_epoch(&self, epoch: u64, reason: ClearReason) -> bool {
        let mut data = self.write_loaded();
        if data.epoch != epoch {
            return false;
        }
        self.clear_locked(&mut data, reason)
    }

    /// Clear only if the session still holds the credential a request was sent with.
    pub(crate) fn clear_if_credential(&self, sent: Option<&Credential>, reason: ClearReason) -> bool {
        let mut data = self.write_loaded();
        if data.credential.as_ref() != sent {
            debug!("Credential changed while request was in flight, keeping session");
            return false;
        }
        self.clear_locked(&mut data, reason)
    }

    fn clear_locked(&self, data: &mut SessionData, reason: ClearReason) -> bool {
        let had_state = data.credential.is_some() || data.profile.is_some();

        data.credential = None;
        data.profile = None;
        data.verified = false;
        data.epoch += 1;
        self.store.clear();
        self.store.set_cached_profile(None);

        if had_state {
            info!(?reason, "Session cleared");
            self.emit(SessionEvent::Cleared(reason));
        }
        had_state
    }
}
