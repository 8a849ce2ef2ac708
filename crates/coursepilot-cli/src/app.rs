//! Application state for the coursepilot command line.
//!
//! `App` owns the configuration, the session manager and the navigation
//! guard, and turns each command into calls on them.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use coursepilot_core::auth::{AuthError, ClearReason, NewAccount, SessionEvent};
use coursepilot_core::config::Config;
use coursepilot_core::models::Role;
use coursepilot_core::navigation::{NavigationGuard, Outcome, RouteTable, LOGIN_ROUTE};
use coursepilot_core::SessionManager;

// ============================================================================
// Environment
// ============================================================================

const ENV_PASSWORD: &str = "COURSEPILOT_PASSWORD";

pub struct App {
    config: Config,
    sessions: Arc<SessionManager>,
    guard: NavigationGuard,
    events: broadcast::Receiver<SessionEvent>,
}

impl App {
    /// Load configuration, open the credential store and restore the session.
    pub fn new() -> Result<Self> {
        let config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        }
        .with_env_overrides(env_var);

        let store = config
            .credential_store()
            .context("Failed to open credential store")?;
        let sessions = Arc::new(
            SessionManager::from_config(&config, store).context("Failed to build API client")?,
        );

        let events = sessions.subscribe();
        let restored = sessions.restore();
        debug!(restored, backend = ?config.credential_backend, "Session restored");

        let guard = NavigationGuard::new(sessions.clone(), RouteTable::standard(), &config.app_title);

        Ok(Self {
            config,
            sessions,
            guard,
            events,
        })
    }

    /// Report session changes made while running a command.
    ///
    /// A cleared session is only announced when the command itself succeeded;
    /// a failed command has already explained itself.
    pub fn report_session_events(&mut self, command_failed: bool) {
        loop {
            match self.events.try_recv() {
                Ok(SessionEvent::Cleared(reason)) if !command_failed => match reason {
                    ClearReason::Expired => {
                        eprintln!("Your session has expired. Please log in again.");
                    }
                    ClearReason::VerificationFailed => {
                        eprintln!("Your saved session is no longer valid. Please log in again.");
                    }
                    ClearReason::LoggedOut => {}
                },
                Ok(event) => debug!(?event, "Session event"),
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Session event receiver lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    pub async fn login(&mut self, email: Option<String>, resume: Option<String>) -> Result<()> {
        let email = match email {
            Some(email) => email,
            None => self.prompt_email()?,
        };
        let password = Self::password()?;

        println!("Logging in...");
        match self.sessions.login(&email, &password).await {
            Ok(profile) => {
                self.remember_email(&email);
                println!("Logged in as {} ({})", profile.display_name(), profile.role);
                let target = self.guard.resume_target(resume.as_deref());
                self.open(&target).await
            }
            Err(e) => Err(anyhow::anyhow!(user_message(&e))),
        }
    }

    pub async fn register(&mut self, name: String, email: String, role: Option<Role>) -> Result<()> {
        let password = Self::password()?;
        let account = NewAccount { name, email, role };

        println!("Creating account...");
        match self.sessions.register(&account, &password).await {
            Ok(profile) => {
                self.remember_email(&account.email);
                println!("Welcome, {} ({})", profile.display_name(), profile.role);
                let target = self.guard.resume_target(None);
                self.open(&target).await
            }
            Err(e) => Err(anyhow::anyhow!(user_message(&e))),
        }
    }

    pub fn logout(&self) {
        self.sessions.logout();
        println!("Logged out.");
    }

    /// Print the verified profile, checking the stored credential first.
    pub async fn whoami(&self) -> Result<()> {
        match self.sessions.fetch_profile().await {
            Ok(Some(profile)) => {
                println!("{} <{}>", profile.display_name(), profile.email);
                println!("Role: {}", profile.role);
            }
            Ok(None) => println!("Not logged in."),
            Err(e) => return Err(anyhow::anyhow!(user_message(&e))),
        }
        Ok(())
    }

    /// Show local session state without contacting the server.
    pub fn status(&self) {
        let snapshot = self.sessions.snapshot();
        println!("API:        {}", self.config.api_base_url());
        println!("Storage:    {:?}", self.config.credential_backend);
        println!("Logged in:  {}", if snapshot.authenticated { "yes" } else { "no" });
        if let Some(profile) = self.sessions.current_user() {
            let state = if snapshot.verified { "verified" } else { "cached" };
            println!("User:       {} ({}, {})", profile.display_name(), profile.role, state);
        }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Navigate to `location` and print where the user ended up.
    pub async fn open(&self, location: &str) -> Result<()> {
        match self.guard.navigate(location).await {
            Outcome::Rendered(nav) => {
                if nav.was_redirected() {
                    info!(requested = %nav.requested, path = %nav.path, redirects = ?nav.redirects, "Redirected");
                }
                println!("{}", self.guard.window_title());
                println!("  {}", nav.path);
                for (name, value) in &nav.params {
                    println!("  {} = {}", name, value);
                }
                if nav.route == LOGIN_ROUTE {
                    match nav.resume.as_deref() {
                        Some(target) => println!(
                            "Log in to continue: coursepilot login --then {}",
                            target
                        ),
                        None => println!("Log in to continue: coursepilot login"),
                    }
                }
            }
            Outcome::Superseded => debug!(location, "Navigation superseded"),
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn remember_email(&mut self, email: &str) {
        self.config.last_email = Some(email.to_string());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
    }

    fn prompt_email(&self) -> Result<String> {
        let default = self.config.login_email(env_var);
        match default.as_deref() {
            Some(last) => print!("Email [{}]: ", last),
            None => print!("Email: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        match (input.is_empty(), default) {
            (true, Some(last)) => Ok(last),
            (true, None) => Err(anyhow::anyhow!("Email is required")),
            (false, _) => Ok(input.to_string()),
        }
    }

    fn password() -> Result<String> {
        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            return Ok(password);
        }
        let password = rpassword::prompt_password("Password: ")?;
        Ok(password)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Short, human-readable explanation of an authentication failure.
fn user_message(err: &AuthError) -> String {
    let message = describe(err);
    if err.requires_login() && !matches!(err, AuthError::RejectedCredentials(_)) {
        format!("{} Run `coursepilot login` to sign in.", message)
    } else {
        message
    }
}

fn describe(err: &AuthError) -> String {
    match err {
        AuthError::NetworkFailure(_) => {
            "Unable to connect to server. Check your connection.".to_string()
        }
        AuthError::RejectedCredentials(Some(message)) => message.clone(),
        AuthError::RejectedCredentials(None) => "Invalid email or password".to_string(),
        AuthError::SessionExpired => "Your session has expired.".to_string(),
        AuthError::AutoLoginFailed(inner) => {
            format!("Account created, but logging in failed: {}", describe(inner))
        }
        AuthError::Api(api) => match api.message() {
            Some(message) => format!("Request failed: {}", message),
            None => format!("Request failed: {}", api),
        },
        other => format!("Request failed: {}", other),
    }
}
