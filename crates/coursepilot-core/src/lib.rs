//! Core library for coursepilot.
//!
//! This crate contains the client-side session and routing logic of the
//! course assistant, independent of any front end:
//! - `api`: HTTP gateway that attaches credentials and reacts to expiry
//! - `auth`: credential storage, session state, login/register/verify
//! - `config`: application configuration
//! - `models`: user profile and roles
//! - `navigation`: route table and the navigation guard

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod navigation;

pub use api::{ApiClient, ApiError};
pub use auth::{AuthError, SessionManager};
pub use config::Config;
pub use navigation::NavigationGuard;
