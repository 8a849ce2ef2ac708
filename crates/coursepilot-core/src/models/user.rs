use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Account role as reported by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// The area of the app this role is designated to.
    pub fn area(&self) -> RoleArea {
        match self {
            Role::Admin | Role::Teacher => RoleArea::Staff,
            Role::Student => RoleArea::Student,
        }
    }

    /// Path of the landing page for this role.
    pub fn landing_path(&self) -> &'static str {
        self.area().landing_path()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Top-level partition of destinations reserved for a group of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum RoleArea {
    /// Teachers and admins: dashboard, course management, AI hub
    Staff,
    /// Student-only section under `/student`
    Student,
}

impl RoleArea {
    pub fn landing_path(&self) -> &'static str {
        match self {
            RoleArea::Staff => "/",
            RoleArea::Student => "/student",
        }
    }
}

/// User record mirrored from the remote API.
///
/// `name` and `email` are display attributes; only `id` and `role` are
/// required for a response to be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    pub role: Role,
}

impl UserProfile {
    /// Name to show in greetings and status lines, falling back to email.
    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            self.name.trim()
        } else if !self.email.is_empty() {
            &self.email
        } else {
            "unknown user"
        }
    }
}
