//! API client for communicating with the course assistant REST API.
//!
//! Every outbound call goes through `ApiClient::send`, which attaches the
//! session credential and clears the session when an authenticated request
//! comes back unauthorized.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::{ClearReason, Credential, Session};

// ============================================================================
// Constants
// ============================================================================

/// Default base URL for the API when none is configured
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000/api";

/// HTTP request timeout in seconds.
/// 10s matches the web front end; long enough for slow queries, short enough to
/// surface outages quickly.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// How a request relates to the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAuth {
    /// Attach the session credential if there is one; a 401 clears the session.
    Session,
    /// Send without a credential; a 401 is returned as-is. Used by login and
    /// registration, where 401 means the submitted credentials were wrong.
    Anonymous,
}

/// API client for the course assistant backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<Session>,
}

impl ApiClient {
    /// Create a new API client bound to a session
    pub fn new(base_url: &str, timeout: Duration, session: Arc<Session>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn auth_headers(credential: Option<&Credential>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(credential) = credential {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", credential.as_str()))
                .map_err(|_| ApiError::BadRequest("Stored credential is not a valid header value".to_string()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Decode a success body, unwrapping the `{"data": ...}` envelope.
    fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
        let value: Value = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body)
                .map_err(|e| ApiError::InvalidResponse(format!("Body is not JSON: {}", e)))?
        };

        let payload = match value {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        };

        serde_json::from_value(payload).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Send a request and decode the response.
    ///
    /// Never retries. Transport failures come back as `ApiError::Network` and
    /// leave the session alone.
    pub async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        auth: RequestAuth,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let credential = match auth {
            RequestAuth::Session => self.session.token(),
            RequestAuth::Anonymous => None,
        };

        debug!(method = %method, path, authenticated = credential.is_some(), "Sending request");

        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(Self::auth_headers(credential.as_ref())?);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(method = %method, path, error = %e, "Request failed without a response");
                return Err(e.into());
            }
        };

        let response = match Self::check_response(response).await {
            Ok(response) => response,
            Err(err) => {
                if err.is_unauthorized() && auth == RequestAuth::Session {
                    warn!(method = %method, path, "Request unauthorized, clearing session");
                    self.session
                        .clear_if_credential(credential.as_ref(), ClearReason::Expired);
                } else {
                    debug!(method = %method, path, error = %err, "Request returned an error");
                }
                return Err(err);
            }
        };

        let text = response.text().await.map_err(ApiError::from)?;
        Self::decode(&text)
    }

    // ===== Convenience wrappers for session-authenticated calls =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, ()>(Method::GET, path, None, RequestAuth::Session).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(Method::POST, path, Some(body), RequestAuth::Session).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(Method::PUT, path, Some(body), RequestAuth::Session).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send::<T, ()>(Method::DELETE, path, None, RequestAuth::Session).await
    }
}
