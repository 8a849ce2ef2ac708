//! Route-level access control.
//!
//! Every destination carries an `AccessPolicy`. Before a page is shown the
//! `NavigationGuard` checks it against the current session and either allows
//! it, redirects, or (for a credential restored from storage) verifies the
//! session with the server first.

pub mod guard;
pub mod policy;
pub mod routes;

pub use guard::{
    evaluate, Decision, Navigation, NavigationGuard, Outcome, Redirect, RedirectReason, Verdict,
};
pub use policy::{AccessPolicy, Route};
pub use routes::{RouteMatch, RouteTable, FALLBACK_PATH, LOGIN_PATH, LOGIN_ROUTE};
