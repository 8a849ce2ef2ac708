use thiserror::Error;

use crate::api::ApiError;

/// Errors surfaced by session operations.
///
/// `Clone` so a single in-flight verification can hand the same result to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Unable to reach the server: {0}")]
    NetworkFailure(String),

    #[error("{}", .0.as_deref().unwrap_or("Invalid email or password"))]
    RejectedCredentials(Option<String>),

    #[error("Session expired. Please log in again.")]
    SessionExpired,

    #[error("Unexpected response from server: {0}")]
    MalformedResponse(String),

    #[error("Account created, but signing in failed: {0}")]
    AutoLoginFailed(Box<AuthError>),

    #[error("Profile verification was interrupted: {0}")]
    VerificationAborted(String),

    #[error(transparent)]
    Api(ApiError),
}

impl AuthError {
    /// Map a gateway error from the login or register endpoint.
    ///
    /// A 401 here means the server refused the submitted credentials, not
    /// that an existing session expired.
    pub(crate) fn from_auth_endpoint(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { message } => AuthError::RejectedCredentials(message),
            ApiError::BadRequest(message) | ApiError::AccessDenied(message) => {
                AuthError::RejectedCredentials(Some(message))
            }
            ApiError::Network(e) => AuthError::NetworkFailure(e),
            ApiError::InvalidResponse(e) => AuthError::MalformedResponse(e),
            other => AuthError::Api(other),
        }
    }

    /// Map a gateway error from a request made with the session credential.
    pub(crate) fn from_session_call(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { .. } => AuthError::SessionExpired,
            ApiError::Network(e) => AuthError::NetworkFailure(e),
            ApiError::InvalidResponse(e) => AuthError::MalformedResponse(e),
            other => AuthError::Api(other),
        }
    }

    /// True when the caller should send the user back to the login page.
    pub fn requires_login(&self) -> bool {
        match self {
            AuthError::SessionExpired | AuthError::AutoLoginFailed(_) => true,
            AuthError::RejectedCredentials(_) => true,
            _ => false,
        }
    }
}
