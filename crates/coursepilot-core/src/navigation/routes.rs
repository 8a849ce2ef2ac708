//! Route table and path matching.

use std::collections::HashMap;

use super::policy::{AccessPolicy, Route};
use crate::models::{Role, RoleArea};

/// Route name of the login page
pub const LOGIN_ROUTE: &str = "login";

/// Path of the login page
pub const LOGIN_PATH: &str = "/login";

/// Where unknown paths are sent
pub const FALLBACK_PATH: &str = "/";

/// A location matched against a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub params: HashMap<String, String>,
    /// The location as requested, query string included
    pub full_path: String,
}

/// Ordered list of routes; the first match wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// The application's routes: public auth pages, the staff area, and the
    /// student area.
    pub fn standard() -> Self {
        let staff = || AccessPolicy::in_area(RoleArea::Staff);
        let student = || AccessPolicy::in_area(RoleArea::Student);

        Self::new(vec![
            Route::new(LOGIN_ROUTE, LOGIN_PATH, AccessPolicy::public()).titled("Log in"),
            Route::new("register", "/register", AccessPolicy::public()).titled("Register"),
            // Staff area
            Route::new("dashboard", "/", staff()).titled("Overview"),
            Route::new("materials", "/courses/:courseId/materials", staff()).titled("Materials"),
            Route::new("attendance", "/courses/:courseId/attendance", staff()).titled("Attendance"),
            Route::new(
                "members",
                "/courses/:courseId/members",
                staff().with_roles(&[Role::Teacher, Role::Admin]),
            )
            .titled("Course members"),
            Route::new("grades", "/courses/:courseId/grades", staff()).titled("Grade analysis"),
            Route::new("interaction", "/courses/:courseId/interaction", staff())
                .titled("Classroom interaction"),
            Route::new("ai-hub", "/ai", staff()).titled("AI hub"),
            // Student area
            Route::new("student-dashboard", "/student", student()).titled("My courses"),
            Route::new("student-materials", "/student/courses/:courseId/materials", student())
                .titled("Course materials"),
            Route::new("student-attendance", "/student/courses/:courseId/attendance", student())
                .titled("My attendance"),
            Route::new("student-grades", "/student/courses/:courseId/grades", student())
                .titled("My grades"),
            Route::new("student-polls", "/student/courses/:courseId/polls", student())
                .titled("Polls"),
        ])
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn by_name(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// Match a location such as `/courses/3/grades?tab=final`.
    pub fn resolve(&self, location: &str) -> Option<RouteMatch<'_>> {
        let path = path_part(location);
        self.routes.iter().find_map(|route| {
            match_pattern(route.pattern, path).map(|params| RouteMatch {
                route,
                params,
                full_path: location.to_string(),
            })
        })
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Strip query string and fragment.
fn path_part(location: &str) -> &str {
    let end = location
        .find(|c: char| c == '?' || c == '#')
        .unwrap_or(location.len());
    &location[..end]
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let mut params = HashMap::new();
    let mut pattern_segments = segments(pattern);
    let mut path_segments = segments(path);

    loop {
        match (pattern_segments.next(), path_segments.next()) {
            (None, None) => return Some(params),
            (Some(expected), Some(actual)) => {
                if let Some(name) = expected.strip_prefix(':') {
                    params.insert(name.to_string(), actual.to_string());
                } else if expected != actual {
                    return None;
                }
            }
            _ => return None,
        }
    }
}
