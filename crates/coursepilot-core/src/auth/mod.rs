//! Authentication module for managing the user session and its credential.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for the access token (file, keyring, memory)
//! - `Session`: in-memory session state mirrored to the store
//! - `SessionManager`: login, register, logout and profile verification
//!
//! The credential is the single source of truth for "is anyone logged in";
//! the profile loaded from storage stays unverified until `/auth/me` confirms it.

pub mod credentials;
pub mod error;
pub mod manager;
pub mod session;

pub use credentials::{
    Credential, CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
};
pub use error::AuthError;
pub use manager::{NewAccount, SessionManager};
pub use session::{ClearReason, Session, SessionEvent, SessionSnapshot};
