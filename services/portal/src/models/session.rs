//! Session model

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use super::{Identity, Role};

/// Authenticated identity together with its bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Identity,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session that expires at `expires_at`
    pub fn new(identity: Identity, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            token: token.into(),
            expires_at,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.identity.id
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    pub fn email(&self) -> &str {
        &self.identity.email
    }

    pub fn role(&self) -> Role {
        self.identity.role
    }

    /// Whether the credential is no longer valid at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, negative once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> TimeDelta {
        self.expires_at - now
    }
}

// The token never shows up in logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
