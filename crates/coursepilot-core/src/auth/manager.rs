//! Login, registration, logout and profile verification.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::credentials::{Credential, CredentialStore};
use super::error::AuthError;
use super::session::{ClearReason, Session, SessionEvent, SessionSnapshot};
use crate::api::{ApiClient, ApiError, RequestAuth};
use crate::config::Config;
use crate::models::{Role, UserProfile};

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const PROFILE_PATH: &str = "/auth/me";

type VerificationResult = Result<Option<UserProfile>, AuthError>;
type SharedVerification = Shared<BoxFuture<'static, VerificationResult>>;

/// A verification in flight, tagged with the session epoch it checks.
struct PendingVerification {
    epoch: u64,
    result: SharedVerification,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: Option<String>,
    user: Option<UserProfile>,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
}

/// Details for a new account. The server defaults the role to teacher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
}

/// Owns the session and every operation that changes it.
///
/// Created once at start-up and shared by `Arc` with the navigation guard.
/// The `ApiClient` it hands out reads the same session on every request.
pub struct SessionManager {
    session: Arc<Session>,
    api: ApiClient,
    in_flight: Arc<Mutex<Option<PendingVerification>>>,
}

impl SessionManager {
    pub fn new(api: ApiClient) -> Self {
        Self {
            session: api.session().clone(),
            api,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Build the session, gateway and manager from configuration.
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let session = Arc::new(Session::new(store));
        let api = ApiClient::new(
            config.api_base_url(),
            Duration::from_secs(config.request_timeout_secs),
            session,
        )?;
        Ok(Self::new(api))
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Load the persisted credential into memory. Call once at start-up.
    pub fn restore(&self) -> bool {
        self.session.restore()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// The current profile, verified or not. Display use only.
    pub fn current_user(&self) -> Option<UserProfile> {
        self.session.snapshot().profile
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    /// Authenticate and install the returned credential and profile.
    ///
    /// On any failure the previous session is left exactly as it was.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<UserProfile, AuthError> {
        let request = LoginRequest {
            email: identifier.trim(),
            password: secret,
        };

        let response: LoginResponse = self
            .api
            .send(Method::POST, LOGIN_PATH, Some(&request), RequestAuth::Anonymous)
            .await
            .map_err(|e| {
                warn!(error = %e, "Login failed");
                AuthError::from_auth_endpoint(e)
            })?;

        let credential = response
            .access_token
            .and_then(Credential::new)
            .ok_or_else(|| {
                error!("Login response did not include an access token");
                AuthError::MalformedResponse("login response is missing access_token".to_string())
            })?;
        let profile = response.user.ok_or_else(|| {
            error!("Login response did not include the user");
            AuthError::MalformedResponse("login response is missing user".to_string())
        })?;

        self.session.establish(credential, profile.clone());
        info!(user_id = profile.id, role = %profile.role, "Login successful");
        Ok(profile)
    }

    /// Create an account, then log in with the same email and secret.
    pub async fn register(&self, account: &NewAccount, secret: &str) -> Result<UserProfile, AuthError> {
        let request = RegisterRequest {
            name: account.name.trim(),
            email: account.email.trim(),
            password: secret,
            role: account.role,
        };

        let _: Value = self
            .api
            .send(Method::POST, REGISTER_PATH, Some(&request), RequestAuth::Anonymous)
            .await
            .map_err(|e| {
                warn!(error = %e, "Registration failed");
                AuthError::from_auth_endpoint(e)
            })?;
        info!("Registration succeeded, signing in");

        self.login(&account.email, secret)
            .await
            .map_err(|e| AuthError::AutoLoginFailed(Box::new(e)))
    }

    /// Confirm the current credential with the server and refresh the profile.
    ///
    /// Returns `Ok(None)` without touching the network when there is no
    /// credential. Concurrent callers on the same session share one in-flight
    /// request; once the session changes, a new request is made. Any failure
    /// clears the session it was started for.
    pub async fn fetch_profile(&self) -> VerificationResult {
        if self.session.token().is_none() {
            return Ok(None);
        }

        let verification = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            let epoch = self.session.epoch();
            match slot.as_ref() {
                Some(pending) if pending.epoch == epoch => {
                    debug!(epoch, "Joining in-flight profile verification");
                    pending.result.clone()
                }
                _ => {
                    let pending = self.spawn_verification(epoch);
                    let result = pending.result.clone();
                    *slot = Some(pending);
                    result
                }
            }
        };

        verification.await
    }

    /// Run the verification as its own task so it completes, and its result
    /// is applied, even if every caller stops waiting.
    fn spawn_verification(&self, epoch: u64) -> PendingVerification {
        let api = self.api.clone();
        let session = self.session.clone();
        let in_flight = self.in_flight.clone();

        let handle = tokio::spawn(async move {
            let result = Self::verify(&api, &session, epoch).await;
            let mut slot = in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|pending| pending.epoch == epoch) {
                slot.take();
            }
            result
        });

        let result = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(AuthError::VerificationAborted(e.to_string())))
            })
            .boxed()
            .shared();

        PendingVerification { epoch, result }
    }

    async fn verify(api: &ApiClient, session: &Session, epoch: u64) -> VerificationResult {
        if session.token().is_none() {
            return Ok(None);
        }

        debug!(epoch, "Verifying stored credential");
        match api.get::<UserProfile>(PROFILE_PATH).await {
            Ok(profile) => {
                if session.apply_verified(epoch, profile.clone()) {
                    info!(user_id = profile.id, role = %profile.role, "Profile verified");
                }
                Ok(Some(profile))
            }
            Err(e) => {
                warn!(error = %e, "Profile verification failed, clearing session");
                session.clear_if_epoch(epoch, ClearReason::VerificationFailed);
                Err(AuthError::from_session_call(e))
            }
        }
    }

    /// Forget the credential and profile. Never fails; safe to repeat.
    pub fn logout(&self) {
        if self.session.clear(ClearReason::LoggedOut) {
            info!("Logged out");
        }
    }
}
