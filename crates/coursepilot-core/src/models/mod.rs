//! Data models shared by the session, gateway and navigation layers.
//!
//! - `UserProfile`: the remote user record mirrored locally
//! - `Role`: the fixed set of account roles
//! - `RoleArea`: the top-level partition of destinations each role lives in

pub mod user;

pub use user::{Role, RoleArea, UserProfile};
