//! Per-navigation access checks.
//!
//! `evaluate` is the pure rule set. `NavigationGuard` wraps it with the one
//! side effect a decision may need: verifying a stored credential before the
//! role rules can run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use super::policy::Route;
use super::routes::{RouteTable, FALLBACK_PATH, LOGIN_PATH, LOGIN_ROUTE};
use crate::auth::{SessionManager, SessionSnapshot};

/// Upper bound on redirects followed by a single `navigate` call.
const MAX_REDIRECTS: usize = 5;

/// Why a navigation was sent somewhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    /// No credential; go log in
    LoginRequired,
    /// Logged-in user asked for the login page
    AlreadyAuthenticated,
    /// Destination belongs to another role's area
    WrongArea,
    /// Destination's allowed roles exclude the user
    RoleNotAllowed,
    /// No route matches the path
    UnknownPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub to: String,
    pub reason: RedirectReason,
    /// Originally requested location, kept so login can resume it
    pub resume: Option<String>,
}

impl Redirect {
    fn to_login(requested: &str) -> Self {
        Self {
            to: LOGIN_PATH.to_string(),
            reason: RedirectReason::LoginRequired,
            resume: Some(requested.to_string()),
        }
    }

    fn to_landing(path: &str, reason: RedirectReason) -> Self {
        Self {
            to: path.to_string(),
            reason,
            resume: None,
        }
    }
}

/// Outcome of the pure rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Redirect(Redirect),
    /// Credential present but profile unconfirmed; verify, then evaluate again
    Verify,
}

/// Decide a navigation from the destination and the current session.
///
/// Rules, first match wins:
/// 1. Public pages are open, except the login page for a logged-in user.
/// 2. No credential sends the user to login, remembering the destination.
/// 3. An unverified profile must be verified first.
/// 4. Destinations in another role's area send the user to their own landing.
/// 5. Roles outside `allowed_roles` go to their landing as well.
/// 6. Everything else is allowed.
pub fn evaluate(route: &Route, snapshot: &SessionSnapshot, requested: &str) -> Verdict {
    if route.policy.public {
        if route.name == LOGIN_ROUTE && snapshot.authenticated {
            let landing = snapshot
                .verified_profile()
                .map(|p| p.role.landing_path())
                .unwrap_or(FALLBACK_PATH);
            return Verdict::Redirect(Redirect::to_landing(landing, RedirectReason::AlreadyAuthenticated));
        }
        return Verdict::Allow;
    }

    if !snapshot.authenticated {
        return Verdict::Redirect(Redirect::to_login(requested));
    }

    let Some(profile) = snapshot.verified_profile() else {
        return Verdict::Verify;
    };

    if !route.policy.matches_area(profile.role) {
        return Verdict::Redirect(Redirect::to_landing(
            profile.role.landing_path(),
            RedirectReason::WrongArea,
        ));
    }

    if !route.policy.permits_role(profile.role) {
        return Verdict::Redirect(Redirect::to_landing(
            profile.role.landing_path(),
            RedirectReason::RoleNotAllowed,
        ));
    }

    Verdict::Allow
}

/// Result of checking one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow {
        route: &'static str,
        params: HashMap<String, String>,
        title: Option<String>,
    },
    Redirect(Redirect),
    /// A newer navigation started while this one waited on verification
    Superseded,
}

/// A completed navigation, after following redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub requested: String,
    pub path: String,
    pub route: &'static str,
    pub params: HashMap<String, String>,
    pub title: Option<String>,
    pub resume: Option<String>,
    pub redirects: Vec<RedirectReason>,
}

impl Navigation {
    pub fn was_redirected(&self) -> bool {
        !self.redirects.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Rendered(Navigation),
    Superseded,
}

/// Gate in front of every navigation.
pub struct NavigationGuard {
    sessions: Arc<SessionManager>,
    routes: RouteTable,
    app_title: String,
    window_title: RwLock<String>,
    latest: AtomicU64,
}

impl NavigationGuard {
    pub fn new(sessions: Arc<SessionManager>, routes: RouteTable, app_title: &str) -> Self {
        Self {
            sessions,
            routes,
            app_title: app_title.to_string(),
            window_title: RwLock::new(app_title.to_string()),
            latest: AtomicU64::new(0),
        }
    }

    /// Title of the destination most recently rendered.
    pub fn window_title(&self) -> String {
        self.window_title
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_window_title(&self, title: &str) {
        let full = format!("{} - {}", title, self.app_title);
        *self.window_title.write().unwrap_or_else(|e| e.into_inner()) = full;
    }

    fn begin(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket
    }

    /// Decide a single location without following redirects.
    pub async fn check(&self, location: &str) -> Decision {
        let ticket = self.begin();
        self.check_with_ticket(location, ticket).await
    }

    async fn check_with_ticket(&self, location: &str, ticket: u64) -> Decision {
        let Some(matched) = self.routes.resolve(location) else {
            debug!(location, "No route for location");
            return Decision::Redirect(Redirect::to_landing(FALLBACK_PATH, RedirectReason::UnknownPath));
        };
        let route = matched.route;

        let snapshot = self.sessions.snapshot();
        let verdict = match evaluate(route, &snapshot, &matched.full_path) {
            Verdict::Verify => {
                debug!(route = route.name, "Verifying session before navigation");
                let result = self.sessions.fetch_profile().await;

                // The result is already applied to the session; a newer
                // navigation decides where the user ends up.
                if !self.is_current(ticket) {
                    debug!(route = route.name, "Navigation superseded during verification");
                    return Decision::Superseded;
                }

                match result {
                    Ok(_) => {
                        let fresh = self.sessions.snapshot();
                        match evaluate(route, &fresh, &matched.full_path) {
                            Verdict::Verify => Verdict::Redirect(Redirect::to_login(&matched.full_path)),
                            verdict => verdict,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, route = route.name, "Verification failed, sending to login");
                        Verdict::Redirect(Redirect::to_login(&matched.full_path))
                    }
                }
            }
            verdict => verdict,
        };

        match verdict {
            Verdict::Allow => {
                if let Some(title) = route.title {
                    self.set_window_title(title);
                }
                Decision::Allow {
                    route: route.name,
                    params: matched.params,
                    title: route.title.map(str::to_string),
                }
            }
            Verdict::Redirect(redirect) => {
                debug!(route = route.name, to = %redirect.to, reason = ?redirect.reason, "Navigation redirected");
                Decision::Redirect(redirect)
            }
            Verdict::Verify => Decision::Redirect(Redirect::to_login(&matched.full_path)),
        }
    }

    /// Navigate to `location`, following redirects to the page actually shown.
    pub async fn navigate(&self, location: &str) -> Outcome {
        let ticket = self.begin();
        let mut current = location.to_string();
        let mut resume = None;
        let mut redirects = Vec::new();

        for _ in 0..=MAX_REDIRECTS {
            match self.check_with_ticket(&current, ticket).await {
                Decision::Allow { route, params, title } => {
                    info!(requested = location, path = %current, route, "Navigated");
                    return Outcome::Rendered(Navigation {
                        requested: location.to_string(),
                        path: current,
                        route,
                        params,
                        title,
                        resume,
                        redirects,
                    });
                }
                Decision::Redirect(redirect) => {
                    if redirect.resume.is_some() {
                        resume = redirect.resume;
                    }
                    redirects.push(redirect.reason);
                    current = redirect.to;
                }
                Decision::Superseded => return Outcome::Superseded,
            }
        }

        warn!(requested = location, "Too many redirects, showing login");
        Outcome::Rendered(Navigation {
            requested: location.to_string(),
            path: LOGIN_PATH.to_string(),
            route: LOGIN_ROUTE,
            params: HashMap::new(),
            title: None,
            resume,
            redirects,
        })
    }

    /// Where to go after a successful login.
    ///
    /// Uses the remembered location when it is an in-app path that is not the
    /// login page; otherwise the user's landing page.
    pub fn resume_target(&self, resume: Option<&str>) -> String {
        let remembered = resume.filter(|target| {
            target.starts_with('/')
                && !target.starts_with("//")
                && self
                    .routes
                    .resolve(target)
                    .is_some_and(|m| m.route.name != LOGIN_ROUTE)
        });

        match remembered {
            Some(target) => target.to_string(),
            None => self
                .sessions
                .snapshot()
                .verified_profile()
                .map(|p| p.role.landing_path())
                .unwrap_or(FALLBACK_PATH)
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::auth::{CredentialStore, MemoryCredentialStore, Session};
    use crate::models::{Role, RoleArea, UserProfile};
    use crate::navigation::AccessPolicy;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profile(role: Role) -> UserProfile {
        UserProfile {
            id: 1,
            name: "Test".to_string(),
            email: "test@example.edu".to_string(),
            role,
        }
    }

    fn verified(role: Role) -> SessionSnapshot {
        SessionSnapshot {
            authenticated: true,
            profile: Some(profile(role)),
            verified: true,
        }
    }

    fn teacher_only() -> Route {
        Route::new("a", "/a", AccessPolicy::authenticated().with_roles(&[Role::Teacher]))
    }

    fn student_only() -> Route {
        Route::new("b", "/b", AccessPolicy::authenticated().with_roles(&[Role::Student]))
    }

    fn unrestored_guard(server: &MockServer, store: Arc<MemoryCredentialStore>) -> NavigationGuard {
        let session = Arc::new(Session::new(store));
        let api = ApiClient::new(&format!("{}/api", server.uri()), Duration::from_secs(5), session)
            .expect("client builds");
        let sessions = Arc::new(SessionManager::new(api));
        NavigationGuard::new(sessions, RouteTable::standard(), "CoursePilot")
    }

    fn guard_for(server: &MockServer, store: Arc<MemoryCredentialStore>) -> NavigationGuard {
        let guard = unrestored_guard(server, store);
        guard.sessions.restore();
        guard
    }

    fn me_ok(role: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"data": {"id": 9, "role": role}}))
    }

    // -------------------------------------------------------------------------
    // Pure rules
    // -------------------------------------------------------------------------

    #[test]
    fn test_public_allowed_for_anyone() {
        let register = Route::new("register", "/register", AccessPolicy::public());
        assert_eq!(evaluate(&register, &SessionSnapshot::default(), "/register"), Verdict::Allow);
        assert_eq!(evaluate(&register, &verified(Role::Student), "/register"), Verdict::Allow);
    }

    #[test]
    fn test_login_page_redirects_authenticated_user() {
        let login = Route::new(LOGIN_ROUTE, LOGIN_PATH, AccessPolicy::public());
        assert_eq!(evaluate(&login, &SessionSnapshot::default(), "/login"), Verdict::Allow);

        match evaluate(&login, &verified(Role::Student), "/login") {
            Verdict::Redirect(r) => {
                assert_eq!(r.to, "/student");
                assert_eq!(r.reason, RedirectReason::AlreadyAuthenticated);
            }
            other => panic!("expected redirect, got {:?}", other),
        }

        let unverified = SessionSnapshot {
            authenticated: true,
            profile: None,
            verified: false,
        };
        assert!(matches!(
            evaluate(&login, &unverified, "/login"),
            Verdict::Redirect(Redirect { ref to, .. }) if to == "/"
        ));
    }

    #[test]
    fn test_unauthenticated_redirects_to_login_with_target() {
        let route = teacher_only();
        let verdict = evaluate(&route, &SessionSnapshot::default(), "/a?tab=2");
        assert_eq!(
            verdict,
            Verdict::Redirect(Redirect {
                to: "/login".to_string(),
                reason: RedirectReason::LoginRequired,
                resume: Some("/a?tab=2".to_string()),
            })
        );
    }

    #[test]
    fn test_unverified_profile_needs_verification() {
        let cached_only = SessionSnapshot {
            authenticated: true,
            profile: Some(profile(Role::Teacher)),
            verified: false,
        };
        assert_eq!(evaluate(&teacher_only(), &cached_only, "/a"), Verdict::Verify);
    }

    #[test]
    fn test_role_gating() {
        let student = verified(Role::Student);

        match evaluate(&teacher_only(), &student, "/a") {
            Verdict::Redirect(r) => {
                assert_eq!(r.to, "/student");
                assert_eq!(r.reason, RedirectReason::RoleNotAllowed);
            }
            other => panic!("expected redirect, got {:?}", other),
        }
        assert_eq!(evaluate(&student_only(), &student, "/b"), Verdict::Allow);
        assert_eq!(evaluate(&teacher_only(), &verified(Role::Teacher), "/a"), Verdict::Allow);
    }

    #[test]
    fn test_area_check_precedes_allowed_roles() {
        let route = Route::new(
            "staff-report",
            "/report",
            AccessPolicy::in_area(RoleArea::Staff).with_roles(&[Role::Admin]),
        );

        match evaluate(&route, &verified(Role::Student), "/report") {
            Verdict::Redirect(r) => assert_eq!(r.reason, RedirectReason::WrongArea),
            other => panic!("expected redirect, got {:?}", other),
        }
        match evaluate(&route, &verified(Role::Teacher), "/report") {
            Verdict::Redirect(r) => {
                assert_eq!(r.reason, RedirectReason::RoleNotAllowed);
                assert_eq!(r.to, "/");
            }
            other => panic!("expected redirect, got {:?}", other),
        }
        assert_eq!(evaluate(&route, &verified(Role::Admin), "/report"), Verdict::Allow);
    }

    #[test]
    fn test_student_area_rejects_staff() {
        let table = RouteTable::standard();
        let route = table.by_name("student-grades").expect("route");
        match evaluate(route, &verified(Role::Teacher), "/student/courses/1/grades") {
            Verdict::Redirect(r) => {
                assert_eq!(r.to, "/");
                assert_eq!(r.reason, RedirectReason::WrongArea);
            }
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    // -------------------------------------------------------------------------
    // Guard with session
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_navigate_unauthenticated_lands_on_login() {
        let server = MockServer::start().await;
        let guard = guard_for(&server, Arc::new(MemoryCredentialStore::new()));

        match guard.navigate("/courses/3/grades").await {
            Outcome::Rendered(nav) => {
                assert_eq!(nav.route, LOGIN_ROUTE);
                assert_eq!(nav.resume.as_deref(), Some("/courses/3/grades"));
                assert_eq!(nav.redirects, vec![RedirectReason::LoginRequired]);
                assert_eq!(guard.window_title(), "Log in - CoursePilot");
            }
            Outcome::Superseded => panic!("nothing else was navigating"),
        }
    }

    #[tokio::test]
    async fn test_login_then_teacher_page_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"access_token": "tok123", "user": {"id": 1, "role": "teacher"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(me_ok("teacher"))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let guard = guard_for(&server, store.clone());
        guard.sessions.login("u1", "p1").await.expect("login succeeds");

        assert!(guard.sessions.is_authenticated());
        assert_eq!(store.get().map(|c| c.as_str().to_string()), Some("tok123".to_string()));

        match guard.check("/courses/3/members").await {
            Decision::Allow { route, params, title } => {
                assert_eq!(route, "members");
                assert_eq!(params.get("courseId").map(String::as_str), Some("3"));
                assert_eq!(title.as_deref(), Some("Course members"));
            }
            other => panic!("expected allow, got {:?}", other),
        }
        assert_eq!(guard.window_title(), "Course members - CoursePilot");
    }

    #[tokio::test]
    async fn test_stale_credential_verified_once_then_login() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "token expired"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential("stale"));
        let guard = guard_for(&server, store.clone());

        match guard.navigate("/ai").await {
            Outcome::Rendered(nav) => {
                assert_eq!(nav.path, "/login");
                assert_eq!(nav.resume.as_deref(), Some("/ai"));
            }
            Outcome::Superseded => panic!("nothing else was navigating"),
        }
        assert!(!guard.sessions.is_authenticated());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_stored_student_sent_to_student_area() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(me_ok("student"))
            .expect(1)
            .mount(&server)
            .await;

        let guard = guard_for(&server, Arc::new(MemoryCredentialStore::with_credential("tok")));

        match guard.navigate("/courses/3/members").await {
            Outcome::Rendered(nav) => {
                assert_eq!(nav.route, "student-dashboard");
                assert_eq!(nav.path, "/student");
                assert_eq!(nav.redirects, vec![RedirectReason::WrongArea]);
                assert!(nav.resume.is_none());
            }
            Outcome::Superseded => panic!("nothing else was navigating"),
        }
        assert_eq!(guard.window_title(), "My courses - CoursePilot");
    }

    #[tokio::test]
    async fn test_rapid_navigations_share_verification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(me_ok("teacher").set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let guard = guard_for(&server, Arc::new(MemoryCredentialStore::with_credential("tok")));

        let (first, second) = tokio::join!(guard.navigate("/courses/1/grades"), guard.navigate("/ai"));

        // The first navigation was overtaken by the second
        assert_eq!(first, Outcome::Superseded);
        match second {
            Outcome::Rendered(nav) => assert_eq!(nav.route, "ai-hub"),
            Outcome::Superseded => panic!("latest navigation must render"),
        }
        assert!(guard.sessions.snapshot().verified);
    }

    #[tokio::test]
    async fn test_navigate_before_restore_verifies_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(me_ok("teacher"))
            .expect(1)
            .mount(&server)
            .await;

        let guard = unrestored_guard(&server, Arc::new(MemoryCredentialStore::with_credential("tok")));

        match guard.navigate("/ai").await {
            Outcome::Rendered(nav) => {
                assert_eq!(nav.route, "ai-hub");
                assert!(!nav.was_redirected());
            }
            Outcome::Superseded => panic!("nothing else was navigating"),
        }
        assert!(guard.sessions.snapshot().verified);
    }

    #[tokio::test]
    async fn test_superseded_navigation_still_applies_failed_verification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::with_credential("stale"));
        let guard = guard_for(&server, store.clone());

        let (first, second) = tokio::join!(guard.navigate("/courses/1/grades"), guard.navigate("/ai"));

        // The overtaken navigation neither renders nor redirects
        assert_eq!(first, Outcome::Superseded);
        match second {
            Outcome::Rendered(nav) => {
                assert_eq!(nav.route, LOGIN_ROUTE);
                assert_eq!(nav.resume.as_deref(), Some("/ai"));
            }
            Outcome::Superseded => panic!("latest navigation must render"),
        }
        assert!(!guard.sessions.is_authenticated());
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_unknown_path_falls_back_to_dashboard() {
        let server = MockServer::start().await;
        let guard = guard_for(&server, Arc::new(MemoryCredentialStore::new()));

        match guard.navigate("/does/not/exist").await {
            Outcome::Rendered(nav) => {
                assert_eq!(nav.redirects[0], RedirectReason::UnknownPath);
                // Not logged in, so the dashboard bounces to login
                assert_eq!(nav.route, LOGIN_ROUTE);
                assert_eq!(nav.resume.as_deref(), Some("/"));
            }
            Outcome::Superseded => panic!("nothing else was navigating"),
        }
    }

    #[tokio::test]
    async fn test_resume_target() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let guard = guard_for(&server, store.clone());

        assert_eq!(guard.resume_target(Some("/courses/2/grades?x=1")), "/courses/2/grades?x=1");
        assert_eq!(guard.resume_target(Some("//evil.example")), "/");
        assert_eq!(guard.resume_target(Some("https://evil.example")), "/");
        assert_eq!(guard.resume_target(Some("/login")), "/");
        assert_eq!(guard.resume_target(None), "/");
        assert!(store.get().is_none());
    }
}
