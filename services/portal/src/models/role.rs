//! Role model and required-role sets

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of portal roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    User,
    Student,
    Teacher,
    FormationManager,
    Administration,
    Staff,
    Tutor,
}

impl Role {
    /// Every role, in declaration order
    pub const ALL: [Role; 8] = [
        Role::Admin,
        Role::User,
        Role::Student,
        Role::Teacher,
        Role::FormationManager,
        Role::Administration,
        Role::Staff,
        Role::Tutor,
    ];

    /// Wire name of the role
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::User => "USER",
            Role::Student => "STUDENT",
            Role::Teacher => "TEACHER",
            Role::FormationManager => "FORMATION_MANAGER",
            Role::Administration => "ADMINISTRATION",
            Role::Staff => "STAFF",
            Role::Tutor => "TUTOR",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role name is not part of the closed set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Set of roles allowed on a route
///
/// An empty set places no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    /// The unrestricted set
    pub fn any() -> Self {
        Self::default()
    }

    /// Build a set from the given roles
    pub fn of(roles: impl IntoIterator<Item = Role>) -> Self {
        Self(roles.into_iter().collect())
    }

    /// Whether the set places no restriction
    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `role` may pass. Always true for the unrestricted set.
    pub fn permits(&self, role: Role) -> bool {
        self.is_unrestricted() || self.0.contains(&role)
    }

    /// Iterate the roles in the set
    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

impl<const N: usize> From<[Role; N]> for RoleSet {
    fn from(roles: [Role; N]) -> Self {
        Self::of(roles)
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self::of(iter)
    }
}
