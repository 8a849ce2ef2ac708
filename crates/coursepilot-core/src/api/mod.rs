//! REST API gateway for the course assistant backend.
//!
//! This module provides the `ApiClient`, the single interception point for
//! every outbound call. It attaches the session's bearer credential and
//! clears the session when an authenticated call comes back unauthorized.
//!
//! Endpoint wrappers for courses, materials, attendance and the rest are thin
//! calls to `ApiClient::get/post/put/delete`.

pub mod client;
pub mod error;

pub use client::{ApiClient, RequestAuth, DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
