use std::collections::HashSet;

use crate::models::{Role, RoleArea};

/// Who may reach a destination.
///
/// A non-public policy with no `allowed_roles` admits any authenticated role.
/// `area` ties the destination to one role area; users from the other area
/// are sent to their own landing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub public: bool,
    pub allowed_roles: Option<HashSet<Role>>,
    pub area: Option<RoleArea>,
}

impl AccessPolicy {
    /// Reachable without logging in.
    pub fn public() -> Self {
        Self {
            public: true,
            ..Self::default()
        }
    }

    /// Any logged-in user.
    pub fn authenticated() -> Self {
        Self::default()
    }

    /// Logged-in users whose role belongs to `area`.
    pub fn in_area(area: RoleArea) -> Self {
        Self {
            area: Some(area),
            ..Self::default()
        }
    }

    pub fn with_roles(mut self, roles: &[Role]) -> Self {
        self.allowed_roles = Some(roles.iter().copied().collect());
        self
    }

    /// Whether `allowed_roles` admits `role`. Unset or empty admits everyone.
    pub fn permits_role(&self, role: Role) -> bool {
        match &self.allowed_roles {
            Some(roles) if !roles.is_empty() => roles.contains(&role),
            _ => true,
        }
    }

    /// Whether the destination's area (if any) is the one `role` lives in.
    pub fn matches_area(&self, role: Role) -> bool {
        self.area.map_or(true, |area| area == role.area())
    }
}

/// A navigable destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: &'static str,
    /// Path pattern; `:name` segments capture a parameter.
    pub pattern: &'static str,
    pub policy: AccessPolicy,
    pub title: Option<&'static str>,
}

impl Route {
    pub fn new(name: &'static str, pattern: &'static str, policy: AccessPolicy) -> Self {
        Self {
            name,
            pattern,
            policy,
            title: None,
        }
    }

    pub fn titled(mut self, title: &'static str) -> Self {
        self.title = Some(title);
        self
    }
}
